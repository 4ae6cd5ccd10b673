//! Core domain types shared by agents through the blackboard.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BlackboardError, Result};

/// Identifier of a step within a plan.
pub type StepId = u32;

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a single plan step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    /// A completed step never goes back to pending.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        !(self == StepStatus::Completed && next == StepStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = BlackboardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(StepStatus::Pending),
            "in_progress" | "in-progress" => Ok(StepStatus::InProgress),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(BlackboardError::validation(format!(
                "unknown step status '{other}': expected pending, in_progress, completed, or failed"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Plan / Step
// ---------------------------------------------------------------------------

/// One unit of work assigned to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the owning plan.
    pub id: StepId,
    /// Name of the agent responsible for the step.
    #[serde(default, alias = "agent_name")]
    pub agent: String,
    /// Instructions handed to the agent.
    #[serde(default)]
    pub prompt: String,
    /// Bumped by planners when a step is rewritten.
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub status: StepStatus,
    /// Steps that must finish before this one starts.
    #[serde(default)]
    pub depends_on: Vec<StepId>,
}

/// An identified, ordered collection of steps with dependency edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Filled from the storage key on save when empty.
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    /// Parse a plan supplied as JSON text at the boundary.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| BlackboardError::validation(format!("plan is not a valid document: {e}")))
    }

    /// Check structural well-formedness: unique step ids and resolvable dependencies.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !seen.insert(step.id) {
                return Err(BlackboardError::validation(format!(
                    "duplicate step id {}",
                    step.id
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if *dep == step.id {
                    return Err(BlackboardError::validation(format!(
                        "step {} depends on itself",
                        step.id
                    )));
                }
                if !seen.contains(dep) {
                    return Err(BlackboardError::validation(format!(
                        "step {} depends on unknown step {dep}",
                        step.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }
}

/// Accept `"p1"`, `1`, or null for identifiers coming from loosely-typed agents.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number identifier, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A result body: free text or a structured document.
///
/// Stored as `{"kind": "text" | "structured", "value": ...}` regardless of shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Structured(serde_json::Value),
}

impl Payload {
    /// Resolve raw caller input: JSON objects/arrays become structured, everything else text.
    pub fn from_input(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
                return Payload::Structured(value);
            }
        }
        Payload::Text(raw.to_string())
    }
}

// ---------------------------------------------------------------------------
// Results, context descriptions, snapshot
// ---------------------------------------------------------------------------

/// Output posted by an agent for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub plan_id: String,
    pub agent_name: String,
    pub step_id: StepId,
    pub description: String,
    pub result: Payload,
    pub updated_at: DateTime<Utc>,
}

/// Annotation about a referenced file or URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDescription {
    pub plan_id: String,
    pub source_identifier: String,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

/// Read-time aggregate of a plan with everything posted against it.
///
/// Assembled from several keys without a transaction; sub-values may come from
/// different moments when writers are active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackboardSnapshot {
    pub plan: Plan,
    pub results: Vec<ResultRecord>,
    pub contexts: Vec<ContextDescription>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: StepId, deps: &[StepId]) -> Step {
        Step {
            id,
            agent: "researcher".into(),
            prompt: format!("do step {id}"),
            revision: 0,
            status: StepStatus::Pending,
            depends_on: deps.to_vec(),
        }
    }

    #[test]
    fn plan_parses_loose_document() {
        let json = r#"{
            "id": 1,
            "goal": "Test goal",
            "steps": [
                {"id": 1, "agent": "researcher", "prompt": "Test prompt", "revision": 1,
                 "status": "pending", "depends_on": []},
                {"id": 2, "agent_name": "writer", "depends_on": [1]}
            ]
        }"#;
        let plan = Plan::from_json_str(json).expect("parse plan");
        assert_eq!(plan.id, "1");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].agent, "writer");
        assert_eq!(plan.steps[1].status, StepStatus::Pending);
        assert_eq!(plan.steps[1].revision, 0);
        plan.validate().expect("valid plan");
    }

    #[test]
    fn minimal_steps_take_defaults() {
        let plan = Plan::from_json_str(
            r#"{"steps":[{"id":1,"status":"pending","depends_on":[]},
                         {"id":2,"status":"pending","depends_on":[1]}]}"#,
        )
        .expect("parse plan");
        assert!(plan.id.is_empty());
        assert_eq!(plan.steps[0].agent, "");
        plan.validate().expect("valid plan");
    }

    #[test]
    fn plan_rejects_bad_json() {
        let err = Plan::from_json_str("not json").unwrap_err();
        assert!(matches!(err, BlackboardError::Validation { .. }));
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let plan = Plan {
            id: "p".into(),
            goal: String::new(),
            steps: vec![step(1, &[]), step(1, &[])],
        };
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate step id 1"));
    }

    #[test]
    fn validate_rejects_unknown_and_self_dependencies() {
        let unknown = Plan {
            id: "p".into(),
            goal: String::new(),
            steps: vec![step(1, &[]), step(2, &[7])],
        };
        assert!(unknown.validate().unwrap_err().to_string().contains("unknown step 7"));

        let selfdep = Plan {
            id: "p".into(),
            goal: String::new(),
            steps: vec![step(1, &[1])],
        };
        assert!(selfdep.validate().unwrap_err().to_string().contains("itself"));
    }

    #[test]
    fn forward_dependencies_are_allowed() {
        let plan = Plan {
            id: "p".into(),
            goal: String::new(),
            steps: vec![step(1, &[2]), step(2, &[])],
        };
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn status_transitions() {
        assert!(!StepStatus::Completed.can_transition_to(StepStatus::Pending));
        assert!(StepStatus::Completed.can_transition_to(StepStatus::Completed));
        assert!(StepStatus::Completed.can_transition_to(StepStatus::Failed));
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Completed));
        assert_eq!("in-progress".parse::<StepStatus>().unwrap(), StepStatus::InProgress);
        assert!("done".parse::<StepStatus>().is_err());
    }

    #[test]
    fn payload_resolution_and_canonical_form() {
        assert_eq!(Payload::from_input("plain words"), Payload::Text("plain words".into()));
        assert_eq!(Payload::from_input("{broken"), Payload::Text("{broken".into()));

        let structured = Payload::from_input(r#"{"answer": 42}"#);
        assert_eq!(structured, Payload::Structured(serde_json::json!({"answer": 42})));

        let stored = serde_json::to_value(&structured).unwrap();
        assert_eq!(stored["kind"], "structured");
        assert_eq!(stored["value"]["answer"], 42);

        let text = serde_json::to_value(Payload::Text("hi".into())).unwrap();
        assert_eq!(text, serde_json::json!({"kind": "text", "value": "hi"}));
    }
}
