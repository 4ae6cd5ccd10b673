//! Plan, result, and context-description operations over [`Storage`].

use blackboard_shared::{
    BlackboardError, BlackboardSnapshot, ContextDescription, Payload, Plan, Result, ResultRecord,
    StepId, StepStatus, StoreConfig,
};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::Storage;
use crate::keys::{StoreKey, contexts_prefix, results_prefix};
use crate::retry::{RetryPolicy, with_retry};

/// Compare-and-swap rounds before a contended status update gives up.
const MAX_CAS_ATTEMPTS: u32 = 16;

/// Shared blackboard state: plans, results, and context descriptions.
///
/// There is no caching layer; every read goes to the backing store.
pub struct BlackboardStore {
    storage: Storage,
    retry: RetryPolicy,
}

impl BlackboardStore {
    /// Connect to the configured backing store.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let storage = Storage::connect(config).await?;
        Ok(Self::new(storage, RetryPolicy::from(config)))
    }

    pub fn new(storage: Storage, retry: RetryPolicy) -> Self {
        Self { storage, retry }
    }

    /// Release the store connection.
    pub fn close(self) {
        self.storage.close();
    }

    // -----------------------------------------------------------------------
    // Plans
    // -----------------------------------------------------------------------

    /// Validate and overwrite the plan stored under `plan_id`.
    #[instrument(skip_all, fields(plan_id = %plan_id))]
    pub async fn save_plan(&self, plan_id: &str, plan: &Plan) -> Result<()> {
        let key = StoreKey::plan(plan_id)?;
        plan.validate()?;

        let mut plan = plan.clone();
        if plan.id.is_empty() {
            plan.id = plan_id.to_string();
        }
        let value = encode(&plan)?;

        self.put(&key, &value).await?;
        info!(steps = plan.steps.len(), "plan saved");
        Ok(())
    }

    pub async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>> {
        let key = StoreKey::plan(plan_id)?;
        self.get_decoded(&key).await
    }

    /// Set a step to `completed`. Repeating the call is a no-op.
    pub async fn mark_plan_as_completed(&self, plan_id: &str, step_id: StepId) -> Result<()> {
        self.update_step_status(plan_id, step_id, StepStatus::Completed)
            .await
    }

    /// Set a step's status with a read-modify-write of the whole plan.
    ///
    /// The write only lands if the stored plan is unchanged since it was read;
    /// otherwise the update is re-applied to the fresh value.
    #[instrument(skip_all, fields(plan_id = %plan_id, step_id = step_id, status = %status))]
    pub async fn update_step_status(
        &self,
        plan_id: &str,
        step_id: StepId,
        status: StepStatus,
    ) -> Result<()> {
        let key = StoreKey::plan(plan_id)?;
        let key_str = key.to_string();

        for round in 1..=MAX_CAS_ATTEMPTS {
            let raw = self
                .get_raw(&key_str)
                .await?
                .ok_or_else(|| BlackboardError::not_found(format!("plan {plan_id}")))?;
            let mut plan: Plan = decode(&key_str, &raw)?;

            let step = plan.step_mut(step_id).ok_or_else(|| {
                BlackboardError::not_found(format!("step {step_id} in plan {plan_id}"))
            })?;

            if step.status == status {
                debug!("step already has requested status");
                return Ok(());
            }
            if !step.status.can_transition_to(status) {
                return Err(BlackboardError::validation(format!(
                    "step {step_id} is {} and cannot move to {status}",
                    step.status
                )));
            }
            step.status = status;

            let updated = encode(&plan)?;
            let swapped = with_retry(&self.retry, "update_step_status", || {
                self.storage.compare_and_swap(&key_str, &raw, &updated)
            })
            .await?;

            if swapped {
                info!("step status updated");
                return Ok(());
            }
            debug!(round, "plan changed concurrently, re-reading");
        }

        Err(BlackboardError::Storage(format!(
            "plan {plan_id} kept changing during status update; gave up after {MAX_CAS_ATTEMPTS} attempts"
        )))
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    /// Upsert the result an agent posted for a step.
    #[instrument(skip_all, fields(plan_id = %plan_id, agent_name = %agent_name, step_id = step_id))]
    pub async fn save_result(
        &self,
        plan_id: &str,
        agent_name: &str,
        step_id: StepId,
        description: &str,
        result: Payload,
    ) -> Result<()> {
        let key = StoreKey::result(plan_id, agent_name, step_id)?;
        let record = ResultRecord {
            plan_id: plan_id.to_string(),
            agent_name: agent_name.to_string(),
            step_id,
            description: description.to_string(),
            result,
            updated_at: Utc::now(),
        };
        self.put(&key, &encode(&record)?).await?;
        debug!("result saved");
        Ok(())
    }

    pub async fn get_result(
        &self,
        plan_id: &str,
        agent_name: &str,
        step_id: StepId,
    ) -> Result<Option<ResultRecord>> {
        let key = StoreKey::result(plan_id, agent_name, step_id)?;
        self.get_decoded(&key).await
    }

    // -----------------------------------------------------------------------
    // Context descriptions
    // -----------------------------------------------------------------------

    /// Upsert an annotation about a referenced file or URL.
    #[instrument(skip_all, fields(plan_id = %plan_id, source = %source_identifier))]
    pub async fn save_context_description(
        &self,
        plan_id: &str,
        source_identifier: &str,
        description: &str,
    ) -> Result<()> {
        let key = StoreKey::context(plan_id, source_identifier)?;
        let record = ContextDescription {
            plan_id: plan_id.to_string(),
            source_identifier: source_identifier.to_string(),
            description: description.to_string(),
            updated_at: Utc::now(),
        };
        self.put(&key, &encode(&record)?).await?;
        debug!("context description saved");
        Ok(())
    }

    pub async fn get_context_description(
        &self,
        plan_id: &str,
        source_identifier: &str,
    ) -> Result<Option<ContextDescription>> {
        let key = StoreKey::context(plan_id, source_identifier)?;
        self.get_decoded(&key).await
    }

    // -----------------------------------------------------------------------
    // Aggregate view
    // -----------------------------------------------------------------------

    /// Assemble the plan with every result and description posted against it.
    ///
    /// The plan and the two prefix scans are separate reads, so a snapshot
    /// taken during concurrent writes may mix old and new sub-values.
    #[instrument(skip_all, fields(plan_id = %plan_id))]
    pub async fn get_blackboard(&self, plan_id: &str) -> Result<Option<BlackboardSnapshot>> {
        let Some(plan) = self.get_plan(plan_id).await? else {
            return Ok(None);
        };

        let result_prefix = results_prefix(plan_id)?;
        let mut results: Vec<ResultRecord> = self.scan_decoded(&result_prefix).await?;
        results.sort_by(|a, b| {
            (a.step_id, a.agent_name.as_str()).cmp(&(b.step_id, b.agent_name.as_str()))
        });

        let context_prefix = contexts_prefix(plan_id)?;
        let mut contexts: Vec<ContextDescription> = self.scan_decoded(&context_prefix).await?;
        contexts.sort_by(|a, b| a.source_identifier.cmp(&b.source_identifier));

        debug!(
            results = results.len(),
            contexts = contexts.len(),
            "blackboard assembled"
        );
        Ok(Some(BlackboardSnapshot {
            plan,
            results,
            contexts,
        }))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn put(&self, key: &StoreKey, value: &str) -> Result<()> {
        let key_str = key.to_string();
        let kind = key.kind();
        with_retry(&self.retry, "put", || self.storage.put(&key_str, kind, value)).await
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        with_retry(&self.retry, "get", || self.storage.get(key)).await
    }

    async fn get_decoded<T: DeserializeOwned>(&self, key: &StoreKey) -> Result<Option<T>> {
        let key_str = key.to_string();
        match self.get_raw(&key_str).await? {
            Some(raw) => Ok(Some(decode(&key_str, &raw)?)),
            None => Ok(None),
        }
    }

    /// Decode every row under `prefix`. Rows whose key does not follow the
    /// key layout were not written by this store and are skipped.
    async fn scan_decoded<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let rows = with_retry(&self.retry, "scan", || self.storage.scan_prefix(prefix)).await?;
        let mut decoded = Vec::with_capacity(rows.len());
        for (key, raw) in &rows {
            if let Err(e) = StoreKey::parse(key) {
                warn!(%key, error = %e, "skipping row with foreign key");
                continue;
            }
            decoded.push(decode(key, raw)?);
        }
        Ok(decoded)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| BlackboardError::Storage(format!("failed to serialize value: {e}")))
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| BlackboardError::Storage(format!("corrupt value at {key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use blackboard_shared::Step;
    use uuid::Uuid;

    async fn test_store() -> BlackboardStore {
        let tmp = std::env::temp_dir().join(format!("bb_store_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.expect("open test db");
        BlackboardStore::new(storage, RetryPolicy::default())
    }

    fn step(id: StepId, agent: &str, deps: &[StepId]) -> Step {
        Step {
            id,
            agent: agent.into(),
            prompt: format!("prompt {id}"),
            revision: 0,
            status: StepStatus::Pending,
            depends_on: deps.to_vec(),
        }
    }

    fn two_step_plan() -> Plan {
        Plan {
            id: String::new(),
            goal: "write a report".into(),
            steps: vec![step(1, "researcher", &[]), step(2, "writer", &[1])],
        }
    }

    #[tokio::test]
    async fn save_then_get_plan_roundtrips() {
        let store = test_store().await;
        let mut plan = two_step_plan();
        plan.id = "p1".into();

        store.save_plan("p1", &plan).await.expect("save plan");
        let loaded = store.get_plan("p1").await.unwrap().expect("plan present");
        assert_eq!(loaded, plan);
    }

    #[tokio::test]
    async fn save_plan_fills_missing_id() {
        let store = test_store().await;
        store.save_plan("p7", &two_step_plan()).await.unwrap();
        assert_eq!(store.get_plan("p7").await.unwrap().unwrap().id, "p7");
    }

    #[tokio::test]
    async fn invalid_plan_persists_nothing() {
        let store = test_store().await;
        let mut plan = two_step_plan();
        plan.steps.push(step(3, "writer", &[9]));

        let err = store.save_plan("bad", &plan).await.unwrap_err();
        assert!(matches!(err, BlackboardError::Validation { .. }));
        assert!(store.get_plan("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_reads_are_absent_not_errors() {
        let store = test_store().await;
        assert!(store.get_plan("nope").await.unwrap().is_none());
        assert!(store.get_result("nope", "a", 1).await.unwrap().is_none());
        assert!(store.get_blackboard("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_completed_updates_only_target_step() {
        let store = test_store().await;
        store.save_plan("p1", &two_step_plan()).await.unwrap();

        store.mark_plan_as_completed("p1", 1).await.expect("mark step 1");
        let plan = store.get_plan("p1").await.unwrap().unwrap();
        assert_eq!(plan.step(1).unwrap().status, StepStatus::Completed);
        assert_eq!(plan.step(2).unwrap().status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn mark_completed_is_idempotent() {
        let store = test_store().await;
        store.save_plan("p1", &two_step_plan()).await.unwrap();

        store.mark_plan_as_completed("p1", 2).await.unwrap();
        store
            .mark_plan_as_completed("p1", 2)
            .await
            .expect("second call succeeds");
        let plan = store.get_plan("p1").await.unwrap().unwrap();
        assert_eq!(plan.step(2).unwrap().status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn mark_completed_reports_missing_targets() {
        let store = test_store().await;
        let err = store.mark_plan_as_completed("ghost", 1).await.unwrap_err();
        assert!(matches!(err, BlackboardError::NotFound { .. }));

        store.save_plan("p1", &two_step_plan()).await.unwrap();
        let err = store.mark_plan_as_completed("p1", 42).await.unwrap_err();
        assert!(err.to_string().contains("step 42"));
    }

    #[tokio::test]
    async fn completed_step_never_returns_to_pending() {
        let store = test_store().await;
        store.save_plan("p1", &two_step_plan()).await.unwrap();
        store.mark_plan_as_completed("p1", 1).await.unwrap();

        let err = store
            .update_step_status("p1", 1, StepStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, BlackboardError::Validation { .. }));

        store
            .update_step_status("p1", 2, StepStatus::Failed)
            .await
            .expect("pending -> failed allowed");
        let plan = store.get_plan("p1").await.unwrap().unwrap();
        assert_eq!(plan.step(1).unwrap().status, StepStatus::Completed);
        assert_eq!(plan.step(2).unwrap().status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn result_keys_are_isolated() {
        let store = test_store().await;
        store
            .save_result("planA", "agentX", 1, "first", Payload::Text("x1".into()))
            .await
            .unwrap();
        store
            .save_result("planA", "agentY", 1, "other agent", Payload::Text("y1".into()))
            .await
            .unwrap();
        store
            .save_result("planB", "agentX", 1, "other plan", Payload::Text("b1".into()))
            .await
            .unwrap();

        store
            .save_result(
                "planA",
                "agentX",
                1,
                "rewritten",
                Payload::Structured(serde_json::json!({"rows": 3})),
            )
            .await
            .unwrap();

        let x = store.get_result("planA", "agentX", 1).await.unwrap().unwrap();
        assert_eq!(x.description, "rewritten");
        assert_eq!(x.result, Payload::Structured(serde_json::json!({"rows": 3})));

        let y = store.get_result("planA", "agentY", 1).await.unwrap().unwrap();
        assert_eq!(y.result, Payload::Text("y1".into()));
        let b = store.get_result("planB", "agentX", 1).await.unwrap().unwrap();
        assert_eq!(b.result, Payload::Text("b1".into()));
    }

    #[tokio::test]
    async fn blackboard_aggregates_plan_namespace() {
        let store = test_store().await;
        store.save_plan("p1", &two_step_plan()).await.unwrap();
        store.save_plan("p10", &two_step_plan()).await.unwrap();

        store
            .save_result("p1", "writer", 2, "draft", Payload::Text("draft".into()))
            .await
            .unwrap();
        store
            .save_result("p1", "researcher", 1, "notes", Payload::Text("notes".into()))
            .await
            .unwrap();
        store
            .save_result("p10", "researcher", 1, "elsewhere", Payload::Text("x".into()))
            .await
            .unwrap();
        store
            .save_context_description("p1", "https://example.com/guide", "the guide")
            .await
            .unwrap();
        store
            .save_context_description("p1", "file:///tmp/a.md", "local notes")
            .await
            .unwrap();

        let board = store.get_blackboard("p1").await.unwrap().expect("board");
        assert_eq!(board.plan.id, "p1");
        let steps: Vec<StepId> = board.results.iter().map(|r| r.step_id).collect();
        assert_eq!(steps, vec![1, 2]);
        assert_eq!(board.contexts.len(), 2);
        assert_eq!(board.contexts[0].source_identifier, "file:///tmp/a.md");
    }

    #[tokio::test]
    async fn blackboard_skips_rows_with_foreign_keys() {
        let store = test_store().await;
        store.save_plan("p1", &two_step_plan()).await.unwrap();
        store
            .save_result("p1", "writer", 2, "draft", Payload::Text("draft".into()))
            .await
            .unwrap();
        store
            .storage
            .put("result:p1:writer:latest", "result", "not json")
            .await
            .unwrap();

        let board = store.get_blackboard("p1").await.unwrap().expect("board");
        assert_eq!(board.results.len(), 1);
        assert_eq!(board.results[0].step_id, 2);
    }

    #[tokio::test]
    async fn context_description_last_write_wins() {
        let store = test_store().await;
        store
            .save_context_description("p1", "https://example.com/a", "v1")
            .await
            .unwrap();
        store
            .save_context_description("p1", "https://example.com/a", "v2")
            .await
            .unwrap();
        let found = store
            .get_context_description("p1", "https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.description, "v2");
    }

    #[tokio::test]
    async fn concurrent_status_updates_all_land() {
        let store = Arc::new(test_store().await);
        let plan = Plan {
            id: "p1".into(),
            goal: "parallel".into(),
            steps: (1..=8).map(|i| step(i, "worker", &[])).collect(),
        };
        store.save_plan("p1", &plan).await.unwrap();

        let mut handles = Vec::new();
        for id in 1..=8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.mark_plan_as_completed("p1", id).await
            }));
        }
        for handle in handles {
            handle.await.expect("task").expect("update");
        }

        let plan = store.get_plan("p1").await.unwrap().unwrap();
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Completed));
    }
}
