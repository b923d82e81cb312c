//! Client-facing control surface: start, signal, query, cancel, and
//! terminate workflows, and fetch their history.
//!
//! The engine itself addresses runs purely by internal `Uuid`. External
//! callers address them by a caller-assigned `workflow_id` string, optionally
//! pinned to a specific `run_id` (useful after a continue-as-new chain has
//! moved a workflow id onto a new run). This module owns that mapping; it is
//! the only place in the crate that needs to know about it.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::persistence::{TraceContext, WorkflowEventStore, WorkflowStatus};
use crate::workflow::{Workflow, WorkflowError, WorkflowEvent, WorkflowSignal};

use super::executor::{ExecutorError, ProcessResult, WorkflowExecutor};

/// Policy applied when `start_workflow` is called with a `workflow_id` that
/// already has a run on file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdReusePolicy {
    /// Always start a new run, regardless of the prior run's outcome.
    AllowDuplicate,
    /// Reject the call if any run is already on file for this id.
    RejectDuplicate,
    /// If a prior run with this id is still running, terminate it first.
    /// After `start_workflow` returns, the prior run is guaranteed to have
    /// a terminal event in its history.
    TerminateIfRunning,
}

impl Default for IdReusePolicy {
    fn default() -> Self {
        Self::RejectDuplicate
    }
}

/// Options accepted by `start_workflow`.
#[derive(Debug, Clone, Default)]
pub struct StartWorkflowOptions {
    /// What to do if `workflow_id` already has a run on file.
    pub id_reuse_policy: IdReusePolicy,
    /// Free-form metadata visible on list/describe calls. Not interpreted
    /// by the engine.
    pub memo: Option<Value>,
    /// Free-form attributes an admin surface could index for search. Not
    /// interpreted by the engine.
    pub search_attributes: Option<Value>,
    /// Trace context to thread through the new run's spans.
    pub trace_context: Option<TraceContext>,
}

/// Errors surfaced by the client control surface.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Error from the underlying executor
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// `workflow_id` already has a run on file and the reuse policy rejects
    /// starting another one.
    #[error("workflow id {0:?} already has a run on file and its reuse policy rejects duplicates")]
    DuplicateWorkflowId(String),

    /// No run is on file for a `workflow_id` that wasn't also given an
    /// explicit `run_id`.
    #[error("no run on file for workflow id {0:?}")]
    UnknownWorkflowId(String),
}

/// Client-facing control surface over a [`WorkflowExecutor`].
///
/// One client is typically shared (behind an `Arc`) across an application's
/// service frontends, the same way a single `WorkerPool` is shared across
/// worker tasks.
pub struct WorkflowClient<S: WorkflowEventStore> {
    executor: Arc<WorkflowExecutor<S>>,
    ids: DashMap<String, Uuid>,
}

impl<S: WorkflowEventStore> WorkflowClient<S> {
    /// Create a client over the given executor.
    pub fn new(executor: Arc<WorkflowExecutor<S>>) -> Self {
        Self {
            executor,
            ids: DashMap::new(),
        }
    }

    /// Access the underlying executor, e.g. to hand it to a `WorkerPool` or
    /// `TimerService`.
    pub fn executor(&self) -> &Arc<WorkflowExecutor<S>> {
        &self.executor
    }

    /// Start a new workflow run under a caller-assigned id.
    #[instrument(skip(self, input, options), fields(workflow_type = W::TYPE))]
    pub async fn start_workflow<W: Workflow>(
        &self,
        workflow_id: impl Into<String>,
        input: W::Input,
        options: StartWorkflowOptions,
    ) -> Result<Uuid, ClientError> {
        let workflow_id = workflow_id.into();

        if let Some(existing) = self.ids.get(&workflow_id).map(|entry| *entry) {
            match options.id_reuse_policy {
                IdReusePolicy::RejectDuplicate => {
                    return Err(ClientError::DuplicateWorkflowId(workflow_id));
                }
                IdReusePolicy::TerminateIfRunning => {
                    let status = self
                        .executor
                        .store()
                        .get_workflow_status(existing)
                        .await
                        .map_err(ExecutorError::from)?;
                    if !status.is_terminal() {
                        self.terminate_run(existing, "superseded by new run with the same workflow id".to_string())
                            .await?;
                    }
                }
                IdReusePolicy::AllowDuplicate => {}
            }
        }

        let run_id = self
            .executor
            .start_workflow::<W>(input, options.trace_context)
            .await?;
        self.ids.insert(workflow_id, run_id);
        Ok(run_id)
    }

    /// Resolve a caller-assigned id (plus optional explicit run pin) to the
    /// run id the engine actually addresses.
    fn resolve(&self, workflow_id: &str, run_id: Option<Uuid>) -> Result<Uuid, ClientError> {
        if let Some(run_id) = run_id {
            return Ok(run_id);
        }
        self.ids
            .get(workflow_id)
            .map(|entry| *entry)
            .ok_or_else(|| ClientError::UnknownWorkflowId(workflow_id.to_string()))
    }

    /// Deliver a signal. At-least-once from the caller's perspective; the
    /// engine dedups by `signal_id` when one is attached to `signal`.
    #[instrument(skip(self, signal))]
    pub async fn signal_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<Uuid>,
        signal: WorkflowSignal,
    ) -> Result<(), ClientError> {
        let run_id = self.resolve(workflow_id, run_id)?;
        self.executor.send_signal(run_id, signal).await?;
        Ok(())
    }

    /// Run a read-only query against a workflow's current replayed state.
    #[instrument(skip(self, args))]
    pub async fn query_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<Uuid>,
        query_name: &str,
        args: Value,
    ) -> Result<Value, ClientError> {
        let run_id = self.resolve(workflow_id, run_id)?;
        Ok(self.executor.query_workflow(run_id, query_name, args).await?)
    }

    /// Request cooperative cancellation. The workflow decides how (or
    /// whether) to react via `on_cancel_requested`.
    #[instrument(skip(self, reason))]
    pub async fn cancel_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<Uuid>,
        reason: impl Into<String>,
    ) -> Result<ProcessResult, ClientError> {
        let run_id = self.resolve(workflow_id, run_id)?;
        Ok(self.executor.request_cancellation(run_id, reason).await?)
    }

    /// Immediately and finally end a run without giving workflow code a
    /// chance to react. Idempotent: terminating an already-terminal run is
    /// a no-op, matching cancel's idempotency guarantee.
    #[instrument(skip(self, reason))]
    pub async fn terminate_workflow(
        &self,
        workflow_id: &str,
        run_id: Option<Uuid>,
        reason: impl Into<String>,
    ) -> Result<(), ClientError> {
        let run_id = self.resolve(workflow_id, run_id)?;
        self.terminate_run(run_id, reason.into()).await
    }

    /// Append `WorkflowTerminated` and settle terminal status for `run_id`,
    /// unless it's already terminal. Shared by `terminate_workflow` and the
    /// `TerminateIfRunning` id-reuse policy.
    async fn terminate_run(&self, run_id: Uuid, reason: String) -> Result<(), ClientError> {
        let status = self
            .executor
            .store()
            .get_workflow_status(run_id)
            .await
            .map_err(ExecutorError::from)?;
        if status.is_terminal() {
            return Ok(());
        }

        let events = self
            .executor
            .store()
            .load_events(run_id)
            .await
            .map_err(ExecutorError::from)?;
        let sequence = events.len() as i32;

        self.executor
            .store()
            .append_events(
                run_id,
                sequence,
                vec![WorkflowEvent::WorkflowTerminated {
                    reason: reason.clone(),
                }],
            )
            .await
            .map_err(ExecutorError::from)?;
        self.executor
            .store()
            .update_workflow_status(
                run_id,
                WorkflowStatus::Terminated,
                None,
                Some(WorkflowError::new(reason)),
            )
            .await
            .map_err(ExecutorError::from)?;

        warn!(%run_id, "workflow terminated");
        Ok(())
    }

    /// Fetch a run's full event history, in order.
    #[instrument(skip(self))]
    pub async fn get_workflow_history(
        &self,
        workflow_id: &str,
        run_id: Option<Uuid>,
    ) -> Result<Vec<(i32, WorkflowEvent)>, ClientError> {
        let run_id = self.resolve(workflow_id, run_id)?;
        Ok(self
            .executor
            .store()
            .load_events(run_id)
            .await
            .map_err(ExecutorError::from)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkflowEventStore;
    use crate::workflow::{WorkflowAction, WorkflowContext};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct EchoInput {
        value: i64,
    }

    struct EchoWorkflow {
        done: bool,
        value: i64,
    }

    impl Workflow for EchoWorkflow {
        const TYPE: &'static str = "echo_workflow";
        type Input = EchoInput;
        type Output = Value;

        fn new(input: Self::Input) -> Self {
            Self {
                done: false,
                value: input.value,
            }
        }

        fn on_start(&mut self, _ctx: &mut WorkflowContext) -> Vec<WorkflowAction> {
            self.done = true;
            vec![WorkflowAction::complete(serde_json::json!({ "value": self.value }))]
        }

        fn on_activity_completed(
            &mut self,
            _ctx: &mut WorkflowContext,
            _activity_id: &str,
            _result: Value,
        ) -> Vec<WorkflowAction> {
            vec![]
        }

        fn on_activity_failed(
            &mut self,
            _ctx: &mut WorkflowContext,
            _activity_id: &str,
            _error: &crate::activity::ActivityError,
        ) -> Vec<WorkflowAction> {
            vec![]
        }

        fn is_completed(&self) -> bool {
            self.done
        }

        fn result(&self) -> Option<Self::Output> {
            self.done.then(|| serde_json::json!({ "value": self.value }))
        }

        fn query(&self, name: &str, _args: Value) -> Result<Value, WorkflowError> {
            match name {
                "value" => Ok(serde_json::json!(self.value)),
                other => Err(WorkflowError::new(format!("unknown query {other}"))),
            }
        }
    }

    struct LongRunningWorkflow {
        started: bool,
    }

    impl Workflow for LongRunningWorkflow {
        const TYPE: &'static str = "long_running_workflow";
        type Input = EchoInput;
        type Output = Value;

        fn new(_input: Self::Input) -> Self {
            Self { started: false }
        }

        fn on_start(&mut self, _ctx: &mut WorkflowContext) -> Vec<WorkflowAction> {
            self.started = true;
            vec![WorkflowAction::schedule_activity(
                "step-1",
                "noop",
                Value::Null,
            )]
        }

        fn on_activity_completed(
            &mut self,
            _ctx: &mut WorkflowContext,
            _activity_id: &str,
            _result: Value,
        ) -> Vec<WorkflowAction> {
            vec![]
        }

        fn on_activity_failed(
            &mut self,
            _ctx: &mut WorkflowContext,
            _activity_id: &str,
            _error: &crate::activity::ActivityError,
        ) -> Vec<WorkflowAction> {
            vec![]
        }

        fn is_completed(&self) -> bool {
            false
        }

        fn result(&self) -> Option<Self::Output> {
            None
        }
    }

    fn new_client() -> WorkflowClient<InMemoryWorkflowEventStore> {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<EchoWorkflow>();
        executor.register::<LongRunningWorkflow>();
        WorkflowClient::new(Arc::new(executor))
    }

    #[tokio::test]
    async fn test_start_and_query_by_workflow_id() {
        let client = new_client();
        client
            .start_workflow::<EchoWorkflow>("order-1", EchoInput { value: 42 }, StartWorkflowOptions::default())
            .await
            .unwrap();

        let result = client
            .query_workflow("order-1", None, "value", Value::Null)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(42));
    }

    #[tokio::test]
    async fn test_reject_duplicate_id_policy() {
        let client = new_client();
        client
            .start_workflow::<EchoWorkflow>(
                "order-1",
                EchoInput { value: 1 },
                StartWorkflowOptions::default(),
            )
            .await
            .unwrap();

        let err = client
            .start_workflow::<EchoWorkflow>(
                "order-1",
                EchoInput { value: 2 },
                StartWorkflowOptions {
                    id_reuse_policy: IdReusePolicy::RejectDuplicate,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DuplicateWorkflowId(_)));
    }

    #[tokio::test]
    async fn test_reject_duplicate_is_the_default_policy() {
        let client = new_client();
        client
            .start_workflow::<EchoWorkflow>(
                "order-1",
                EchoInput { value: 1 },
                StartWorkflowOptions::default(),
            )
            .await
            .unwrap();

        // EchoWorkflow completes synchronously in on_start, so the prior run
        // is already terminal, but RejectDuplicate (the default) still
        // refuses a second start under the same id.
        let err = client
            .start_workflow::<EchoWorkflow>(
                "order-1",
                EchoInput { value: 2 },
                StartWorkflowOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DuplicateWorkflowId(_)));
    }

    #[tokio::test]
    async fn test_terminate_if_running_terminates_prior_run_before_starting_new() {
        let client = new_client();
        let old_run_id = client
            .start_workflow::<LongRunningWorkflow>(
                "order-1",
                EchoInput { value: 1 },
                StartWorkflowOptions::default(),
            )
            .await
            .unwrap();

        let new_run_id = client
            .start_workflow::<LongRunningWorkflow>(
                "order-1",
                EchoInput { value: 2 },
                StartWorkflowOptions {
                    id_reuse_policy: IdReusePolicy::TerminateIfRunning,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_ne!(old_run_id, new_run_id);

        let old_history = client.get_workflow_history("order-1", Some(old_run_id)).await.unwrap();
        assert!(old_history
            .iter()
            .any(|(_, e)| matches!(e, WorkflowEvent::WorkflowTerminated { .. })));

        assert_eq!(new_run_id, *client.ids.get("order-1").unwrap());
    }

    #[tokio::test]
    async fn test_unknown_workflow_id_rejected() {
        let client = new_client();
        let err = client
            .query_workflow("does-not-exist", None, "value", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnknownWorkflowId(_)));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent_and_final() {
        let client = new_client();
        client
            .start_workflow::<EchoWorkflow>(
                "order-1",
                EchoInput { value: 1 },
                StartWorkflowOptions::default(),
            )
            .await
            .unwrap();

        // Already completed; terminate is a no-op, not an error.
        client.terminate_workflow("order-1", None, "operator request").await.unwrap();
        client.terminate_workflow("order-1", None, "operator request").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_workflow_history_returns_full_sequence() {
        let client = new_client();
        client
            .start_workflow::<EchoWorkflow>(
                "order-1",
                EchoInput { value: 7 },
                StartWorkflowOptions::default(),
            )
            .await
            .unwrap();

        let history = client.get_workflow_history("order-1", None).await.unwrap();
        assert!(history.len() >= 2);
        assert!(matches!(history[0].1, WorkflowEvent::WorkflowStarted { .. }));
    }
}
