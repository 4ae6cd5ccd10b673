//! Namespaced key layout.
//!
//! - `plan:{plan_id}`
//! - `result:{plan_id}:{agent_name}:{step_id}`
//! - `context:{plan_id}:{source_identifier}`
//!
//! Plan ids and agent names may not contain `:`; the source identifier is the
//! trailing segment and may.

use std::fmt;

use blackboard_shared::{BlackboardError, Result, StepId};

const SEP: char = ':';

/// A typed, validated store key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKey {
    Plan {
        plan_id: String,
    },
    Result {
        plan_id: String,
        agent_name: String,
        step_id: StepId,
    },
    Context {
        plan_id: String,
        source_identifier: String,
    },
}

impl StoreKey {
    pub fn plan(plan_id: &str) -> Result<Self> {
        check_segment("plan id", plan_id)?;
        Ok(Self::Plan {
            plan_id: plan_id.to_string(),
        })
    }

    pub fn result(plan_id: &str, agent_name: &str, step_id: StepId) -> Result<Self> {
        check_segment("plan id", plan_id)?;
        check_segment("agent name", agent_name)?;
        Ok(Self::Result {
            plan_id: plan_id.to_string(),
            agent_name: agent_name.to_string(),
            step_id,
        })
    }

    pub fn context(plan_id: &str, source_identifier: &str) -> Result<Self> {
        check_segment("plan id", plan_id)?;
        if source_identifier.trim().is_empty() {
            return Err(BlackboardError::validation(
                "source identifier must not be empty",
            ));
        }
        Ok(Self::Context {
            plan_id: plan_id.to_string(),
            source_identifier: source_identifier.to_string(),
        })
    }

    /// Namespace tag, also stored in the `kind` column.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Plan { .. } => "plan",
            Self::Result { .. } => "result",
            Self::Context { .. } => "context",
        }
    }

    /// Parse an encoded key back into its parts.
    pub fn parse(raw: &str) -> Result<Self> {
        let (kind, rest) = raw.split_once(SEP).ok_or_else(|| {
            BlackboardError::validation(format!("key '{raw}' has no namespace"))
        })?;

        match kind {
            "plan" => Self::plan(rest),
            "result" => {
                let mut parts = rest.splitn(3, SEP);
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(plan_id), Some(agent), Some(step)) => {
                        let step_id = step.parse::<StepId>().map_err(|_| {
                            BlackboardError::validation(format!(
                                "result key '{raw}' has a non-numeric step id"
                            ))
                        })?;
                        Self::result(plan_id, agent, step_id)
                    }
                    _ => Err(BlackboardError::validation(format!(
                        "result key must be result:<plan_id>:<agent_name>:<step_id>, got '{raw}'"
                    ))),
                }
            }
            "context" => match rest.split_once(SEP) {
                Some((plan_id, source)) => Self::context(plan_id, source),
                None => Err(BlackboardError::validation(format!(
                    "context key must be context:<plan_id>:<source>, got '{raw}'"
                ))),
            },
            other => Err(BlackboardError::validation(format!(
                "key namespace must be plan, result, or context, got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan { plan_id } => write!(f, "plan{SEP}{plan_id}"),
            Self::Result {
                plan_id,
                agent_name,
                step_id,
            } => write!(f, "result{SEP}{plan_id}{SEP}{agent_name}{SEP}{step_id}"),
            Self::Context {
                plan_id,
                source_identifier,
            } => write!(f, "context{SEP}{plan_id}{SEP}{source_identifier}"),
        }
    }
}

/// Prefix shared by every result key of a plan.
pub fn results_prefix(plan_id: &str) -> Result<String> {
    check_segment("plan id", plan_id)?;
    Ok(format!("result{SEP}{plan_id}{SEP}"))
}

/// Prefix shared by every context key of a plan.
pub fn contexts_prefix(plan_id: &str) -> Result<String> {
    check_segment("plan id", plan_id)?;
    Ok(format!("context{SEP}{plan_id}{SEP}"))
}

fn check_segment(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BlackboardError::validation(format!("{what} must not be empty")));
    }
    if value.contains(SEP) {
        return Err(BlackboardError::validation(format!(
            "{what} '{value}' must not contain '{SEP}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_documented_layout() {
        assert_eq!(StoreKey::plan("p1").unwrap().to_string(), "plan:p1");
        assert_eq!(
            StoreKey::result("p1", "researcher", 3).unwrap().to_string(),
            "result:p1:researcher:3"
        );
        assert_eq!(
            StoreKey::context("p1", "https://example.com/a").unwrap().to_string(),
            "context:p1:https://example.com/a"
        );
    }

    #[test]
    fn parse_inverts_display() {
        for key in [
            StoreKey::plan("p1").unwrap(),
            StoreKey::result("p1", "writer", 12).unwrap(),
            StoreKey::context("p1", "file:///tmp/notes.md").unwrap(),
        ] {
            assert_eq!(StoreKey::parse(&key.to_string()).unwrap(), key);
        }
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(StoreKey::parse("invalid:p1").is_err());
        assert!(StoreKey::parse("plan").is_err());
        assert!(StoreKey::parse("result:p1:agent").is_err());
        assert!(StoreKey::parse("result:p1:agent:one").is_err());
        assert!(StoreKey::parse("context:p1").is_err());
        assert!(StoreKey::parse("plan:p1:extra").is_err());
    }

    #[test]
    fn segments_cannot_contain_separator() {
        let err = StoreKey::plan("a:b").unwrap_err();
        assert!(err.to_string().contains("must not contain"));
        assert!(StoreKey::result("p1", "bad:agent", 1).is_err());
        assert!(StoreKey::plan("  ").is_err());
        assert!(StoreKey::context("p1", "").is_err());
    }

    #[test]
    fn prefixes_do_not_overlap_between_plans() {
        let p1 = results_prefix("p1").unwrap();
        let p10 = StoreKey::result("p10", "a", 1).unwrap().to_string();
        assert!(!p10.starts_with(&p1));
        assert_eq!(contexts_prefix("p1").unwrap(), "context:p1:");
    }
}
