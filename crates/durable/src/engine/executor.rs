//! Workflow executor with replay support
//!
//! The `WorkflowExecutor` is responsible for:
//! - Starting new workflows
//! - Replaying workflows from event history to rebuild state
//! - Delivering live triggers (activity completion/failure, timers, signals,
//!   child workflow results, cancellation requests) and processing the
//!   resulting actions
//! - Propagating child workflow completion back to the parent's history
//! - Continue-as-new: closing a run and starting its successor

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::persistence::{
    StoreError, TaskDefinition, TraceContext, WorkflowEventStore, WorkflowStatus,
};
use crate::workflow::{
    action_type_name, TimeoutType, WorkflowAction, WorkflowContext, WorkflowError, WorkflowEvent,
    WorkflowSignal,
};

use super::registry::{AnyWorkflow, RegistryError, WorkflowRegistry, WorkflowWrapper};

/// A future boxed to allow the mutually-recursive calls between
/// `apply_and_finish`, `process_actions_internal`, `start_dynamic_workflow`,
/// and the child-notification helpers (parent completion can itself trigger
/// a grandparent completion, and so on up the chain).
type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Configuration for the workflow executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum events per workflow (for safety)
    pub max_events_per_workflow: usize,

    /// Whether to validate actions before persisting
    pub validate_actions: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_events_per_workflow: 10000,
            validate_actions: true,
        }
    }
}

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Workflow already completed
    #[error("workflow {0} already completed")]
    WorkflowCompleted(Uuid),

    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Replay error (non-determinism detected)
    #[error("replay error: {0}")]
    ReplayError(String),

    /// Too many events
    #[error("workflow {0} has too many events ({1} > {2})")]
    TooManyEvents(Uuid, usize, usize),

    /// Invalid action
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of processing a workflow
#[derive(Debug)]
pub struct ProcessResult {
    /// Whether the workflow completed
    pub completed: bool,

    /// Number of new events written
    pub events_written: usize,

    /// Number of tasks enqueued
    pub tasks_enqueued: usize,

    /// Number of signals processed
    pub signals_processed: usize,
}

impl ProcessResult {
    fn already_terminal() -> Self {
        Self {
            completed: true,
            events_written: 0,
            tasks_enqueued: 0,
            signals_processed: 0,
        }
    }
}

/// Fold a callback's pending side effects and continue-as-new request into
/// its returned actions, in the order the executor must persist them: any
/// markers recorded during this decision first, then the callback's own
/// actions, then continue-as-new last (since nothing after it can matter).
fn finalize_actions(ctx: &mut WorkflowContext, actions: Vec<WorkflowAction>) -> Vec<WorkflowAction> {
    let markers = ctx.take_pending_markers();
    let mut result = Vec::with_capacity(markers.len() + actions.len() + 1);
    result.extend(
        markers
            .into_iter()
            .map(|(marker_id, data)| WorkflowAction::RecordMarker { marker_id, data }),
    );
    result.extend(actions);
    if let Some(input) = ctx.take_continue_as_new() {
        result.push(WorkflowAction::ContinueAsNew { input });
    }
    result
}

/// Turn a fired timeout into the `ActivityError` delivered to a workflow's
/// `on_activity_failed`, since timeouts don't get their own callback.
fn timeout_activity_error(timeout_type: TimeoutType) -> ActivityError {
    let message = match timeout_type {
        TimeoutType::ScheduleToStart => "activity timed out waiting to start",
        TimeoutType::StartToClose => "activity execution timed out",
        TimeoutType::Heartbeat => "activity heartbeat timed out",
        TimeoutType::ScheduleToClose => "activity timed out across all attempts",
    };
    ActivityError::non_retryable(message)
}

/// Workflow executor
///
/// The executor drives workflow state machines by replaying events and
/// processing actions. It uses optimistic concurrency control to handle
/// concurrent updates.
///
/// # Example
///
/// ```ignore
/// use everruns_durable::prelude::*;
///
/// let store = InMemoryWorkflowEventStore::new();
/// let mut executor = WorkflowExecutor::new(store);
/// executor.register::<MyWorkflow>();
///
/// // Start a new workflow
/// let workflow_id = executor.start_workflow::<MyWorkflow>(input).await?;
///
/// // Process the workflow (after activities complete)
/// executor.process_workflow(workflow_id).await?;
/// ```
pub struct WorkflowExecutor<S: WorkflowEventStore> {
    store: Arc<S>,
    registry: WorkflowRegistry,
    config: ExecutorConfig,
}

impl<S: WorkflowEventStore> WorkflowExecutor<S> {
    /// Create a new executor with the given store
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            registry: WorkflowRegistry::new(),
            config: ExecutorConfig::default(),
        }
    }

    /// Create a new executor with custom config
    pub fn with_config(store: S, config: ExecutorConfig) -> Self {
        Self {
            store: Arc::new(store),
            registry: WorkflowRegistry::new(),
            config,
        }
    }

    /// Register a workflow type
    pub fn register<W: crate::workflow::Workflow>(&mut self) {
        self.registry.register::<W>();
        info!(workflow_type = W::TYPE, "registered workflow type");
    }

    /// Get a reference to the store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a cheaply-cloneable handle to the store, for callers (the worker
    /// pool, the timer service) that need to hold their own reference
    /// alongside the executor.
    pub fn store_handle(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Start a new workflow
    ///
    /// Creates the workflow instance, persists the start event, and
    /// processes initial actions.
    #[instrument(skip(self, input, trace_context), fields(workflow_type = W::TYPE))]
    pub async fn start_workflow<W: crate::workflow::Workflow>(
        &self,
        input: W::Input,
        trace_context: Option<TraceContext>,
    ) -> Result<Uuid, ExecutorError> {
        let workflow_id = Uuid::now_v7();
        let input_json = serde_json::to_value(&input)?;

        info!(%workflow_id, "starting new workflow");

        self.store
            .create_workflow(
                workflow_id,
                W::TYPE,
                input_json.clone(),
                trace_context.as_ref(),
            )
            .await?;

        let start_event = WorkflowEvent::WorkflowStarted {
            input: input_json.clone(),
        };
        let sequence = self
            .store
            .append_events(workflow_id, 0, vec![start_event])
            .await?;

        let mut workflow = WorkflowWrapper::new(W::new(input));
        let mut ctx = WorkflowContext::new(Utc::now(), 1, vec![]);
        let raw_actions = workflow.on_start(&mut ctx);
        let actions = finalize_actions(&mut ctx, raw_actions);

        self.apply_and_finish(
            workflow_id,
            &mut workflow,
            &mut ctx,
            sequence,
            actions,
            None,
            "client",
        )
        .await
    }

    /// Process a workflow after external events (activity completions, signals, etc.)
    ///
    /// Replays the workflow from its full event history to rebuild state,
    /// then delivers any signals that arrived since the last decision.
    #[instrument(skip(self))]
    pub async fn process_workflow(&self, workflow_id: Uuid) -> Result<ProcessResult, ExecutorError> {
        let info = self.store.get_workflow_info(workflow_id).await?;

        if info.status.is_terminal() {
            debug!(%workflow_id, status = ?info.status, "workflow already in terminal state");
            return Ok(ProcessResult::already_terminal());
        }

        let events = self.store.load_events(workflow_id).await?;
        self.check_history_bounds(workflow_id, &events)?;

        let (mut workflow, mut ctx) = self.rebuild(&info.workflow_type, info.input.clone(), &events)?;
        let sequence = events.len() as i32;

        self.apply_and_finish(
            workflow_id,
            workflow.as_mut(),
            &mut ctx,
            sequence,
            vec![],
            info.parent_workflow_id,
            "scheduler",
        )
        .await
    }

    /// Send a signal to a workflow
    #[instrument(skip(self, signal))]
    pub async fn send_signal(
        &self,
        workflow_id: Uuid,
        signal: WorkflowSignal,
    ) -> Result<(), ExecutorError> {
        let status = self.store.get_workflow_status(workflow_id).await?;

        if status.is_terminal() {
            warn!(%workflow_id, ?status, "cannot send signal to completed workflow");
            return Err(ExecutorError::WorkflowCompleted(workflow_id));
        }

        self.store.send_signal(workflow_id, signal).await?;
        info!(%workflow_id, "signal sent");

        Ok(())
    }

    /// Request cancellation of a running workflow.
    ///
    /// Records `WorkflowCancelRequested` and delivers `on_cancel_requested`
    /// to the workflow live, so the default (fail immediately) or an
    /// override (run compensation first) can act on it right away.
    #[instrument(skip(self, reason))]
    pub async fn request_cancellation(
        &self,
        workflow_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<ProcessResult, ExecutorError> {
        let reason = reason.into();
        let info = self.store.get_workflow_info(workflow_id).await?;
        if info.status.is_terminal() {
            return Ok(ProcessResult::already_terminal());
        }

        let events = self.store.load_events(workflow_id).await?;
        let (mut workflow, mut ctx) = self.rebuild(&info.workflow_type, info.input.clone(), &events)?;
        ctx.set_cancel_requested(true);
        let sequence_before = events.len() as i32;

        let raw_actions = workflow.on_cancel_requested(&mut ctx, &reason);
        let actions = finalize_actions(&mut ctx, raw_actions);

        let event = WorkflowEvent::WorkflowCancelRequested { reason };
        let sequence = self
            .store
            .append_events(workflow_id, sequence_before, vec![event])
            .await?;

        let mut result = self
            .apply_and_finish(
                workflow_id,
                workflow.as_mut(),
                &mut ctx,
                sequence,
                actions,
                info.parent_workflow_id,
                "client",
            )
            .await?;
        result.events_written += 1;
        Ok(result)
    }

    /// Answer a query against a workflow's current (replayed) state.
    ///
    /// Queries are read-only: the workflow is rebuilt from history but no
    /// events are appended and no actions are processed.
    #[instrument(skip(self, args))]
    pub async fn query_workflow(
        &self,
        workflow_id: Uuid,
        name: &str,
        args: Value,
    ) -> Result<Value, ExecutorError> {
        let info = self.store.get_workflow_info(workflow_id).await?;
        let events = self.store.load_events(workflow_id).await?;
        let (workflow, _ctx) = self.rebuild(&info.workflow_type, info.input.clone(), &events)?;

        workflow
            .query(name, args)
            .map_err(|e| ExecutorError::InvalidAction(e.message))
    }

    /// Record that a worker has claimed an activity and begun executing it.
    ///
    /// Called by the worker pool right before it invokes the activity
    /// handler. This is a bookkeeping event only: it doesn't rebuild the
    /// workflow or trigger a decision.
    #[instrument(skip(self))]
    pub async fn on_activity_started(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        attempt: u32,
        worker_id: &str,
    ) -> Result<(), ExecutorError> {
        let events = self.store.load_events(workflow_id).await?;
        let sequence = events.len() as i32;
        let event = WorkflowEvent::ActivityStarted {
            activity_id: activity_id.to_string(),
            attempt,
            worker_id: worker_id.to_string(),
        };
        self.store
            .append_events(workflow_id, sequence, vec![event])
            .await?;
        Ok(())
    }

    /// Handle activity completion
    ///
    /// Called by the worker pool when an activity completes successfully.
    #[instrument(skip(self, result))]
    pub async fn on_activity_completed(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        result: serde_json::Value,
        worker_id: &str,
    ) -> Result<ProcessResult, ExecutorError> {
        let info = self.store.get_workflow_info(workflow_id).await?;
        if info.status.is_terminal() {
            return Ok(ProcessResult::already_terminal());
        }

        let events = self.store.load_events(workflow_id).await?;
        let (mut workflow, mut ctx) = self.rebuild(&info.workflow_type, info.input.clone(), &events)?;
        let sequence_before = events.len() as i32;

        let raw_actions = workflow.on_activity_completed(&mut ctx, activity_id, result.clone());
        let actions = finalize_actions(&mut ctx, raw_actions);

        let completion_event = WorkflowEvent::ActivityCompleted {
            activity_id: activity_id.to_string(),
            result,
        };
        let sequence = self
            .store
            .append_events(workflow_id, sequence_before, vec![completion_event])
            .await?;

        let mut process_result = self
            .apply_and_finish(
                workflow_id,
                workflow.as_mut(),
                &mut ctx,
                sequence,
                actions,
                info.parent_workflow_id,
                worker_id,
            )
            .await?;
        process_result.events_written += 1;
        Ok(process_result)
    }

    /// Handle activity failure
    ///
    /// Called by the worker pool when an activity fails. Only the final
    /// failure (no more retries left) is delivered to the workflow; a
    /// failure that will retry is recorded for audit but doesn't trigger a
    /// decision.
    #[instrument(skip(self, error))]
    pub async fn on_activity_failed(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        error: ActivityError,
        will_retry: bool,
        worker_id: &str,
    ) -> Result<ProcessResult, ExecutorError> {
        let info = self.store.get_workflow_info(workflow_id).await?;
        if info.status.is_terminal() {
            return Ok(ProcessResult::already_terminal());
        }

        if !will_retry {
            let events = self.store.load_events(workflow_id).await?;
            let (mut workflow, mut ctx) =
                self.rebuild(&info.workflow_type, info.input.clone(), &events)?;
            let sequence_before = events.len() as i32;

            let raw_actions = workflow.on_activity_failed(&mut ctx, activity_id, &error);
            let actions = finalize_actions(&mut ctx, raw_actions);

            let failure_event = WorkflowEvent::ActivityFailed {
                activity_id: activity_id.to_string(),
                error,
                will_retry,
            };
            let sequence = self
                .store
                .append_events(workflow_id, sequence_before, vec![failure_event])
                .await?;

            let mut process_result = self
                .apply_and_finish(
                    workflow_id,
                    workflow.as_mut(),
                    &mut ctx,
                    sequence,
                    actions,
                    info.parent_workflow_id,
                    worker_id,
                )
                .await?;
            process_result.events_written += 1;
            Ok(process_result)
        } else {
            let events = self.store.load_events(workflow_id).await?;
            let sequence = events.len() as i32;
            let failure_event = WorkflowEvent::ActivityFailed {
                activity_id: activity_id.to_string(),
                error,
                will_retry,
            };
            self.store
                .append_events(workflow_id, sequence, vec![failure_event])
                .await?;

            Ok(ProcessResult {
                completed: false,
                events_written: 1,
                tasks_enqueued: 0,
                signals_processed: 0,
            })
        }
    }

    /// Handle timer fired
    #[instrument(skip(self))]
    pub async fn on_timer_fired(
        &self,
        workflow_id: Uuid,
        timer_id: &str,
    ) -> Result<ProcessResult, ExecutorError> {
        let info = self.store.get_workflow_info(workflow_id).await?;
        if info.status.is_terminal() {
            return Ok(ProcessResult::already_terminal());
        }

        let events = self.store.load_events(workflow_id).await?;
        let (mut workflow, mut ctx) = self.rebuild(&info.workflow_type, info.input.clone(), &events)?;
        let sequence_before = events.len() as i32;

        let raw_actions = workflow.on_timer_fired(&mut ctx, timer_id);
        let actions = finalize_actions(&mut ctx, raw_actions);

        let timer_event = WorkflowEvent::TimerFired {
            timer_id: timer_id.to_string(),
        };
        let sequence = self
            .store
            .append_events(workflow_id, sequence_before, vec![timer_event])
            .await?;

        let mut process_result = self
            .apply_and_finish(
                workflow_id,
                workflow.as_mut(),
                &mut ctx,
                sequence,
                actions,
                info.parent_workflow_id,
                "timer-service",
            )
            .await?;
        process_result.events_written += 1;
        Ok(process_result)
    }

    /// Handle an activity timeout (schedule-to-start, start-to-close, or heartbeat).
    ///
    /// Called by the timeout scanner once it has already failed the task in
    /// the queue. A timeout is always terminal for the attempt: the workflow
    /// sees it through `on_activity_failed`, same callback as any other
    /// non-retryable failure, but the history event is `ActivityTimedOut` so
    /// it can be told apart from a handler-raised error during audit/query.
    #[instrument(skip(self))]
    pub async fn on_activity_timed_out(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        timeout_type: TimeoutType,
    ) -> Result<ProcessResult, ExecutorError> {
        let info = self.store.get_workflow_info(workflow_id).await?;
        if info.status.is_terminal() {
            return Ok(ProcessResult::already_terminal());
        }

        let events = self.store.load_events(workflow_id).await?;
        let (mut workflow, mut ctx) = self.rebuild(&info.workflow_type, info.input.clone(), &events)?;
        let sequence_before = events.len() as i32;

        let error = timeout_activity_error(timeout_type);
        let raw_actions = workflow.on_activity_failed(&mut ctx, activity_id, &error);
        let actions = finalize_actions(&mut ctx, raw_actions);

        let timeout_event = WorkflowEvent::ActivityTimedOut {
            activity_id: activity_id.to_string(),
            timeout_type,
        };
        let sequence = self
            .store
            .append_events(workflow_id, sequence_before, vec![timeout_event])
            .await?;

        let mut process_result = self
            .apply_and_finish(
                workflow_id,
                workflow.as_mut(),
                &mut ctx,
                sequence,
                actions,
                info.parent_workflow_id,
                "timeout-scanner",
            )
            .await?;
        process_result.events_written += 1;
        Ok(process_result)
    }

    // =========================================================================
    // Internal Methods
    // =========================================================================

    /// Rebuild a workflow instance from its full event history so far,
    /// pre-loading `WorkflowContext` with any previously recorded markers.
    fn rebuild(
        &self,
        workflow_type: &str,
        input: serde_json::Value,
        events: &[(i32, WorkflowEvent)],
    ) -> Result<(Box<dyn AnyWorkflow>, WorkflowContext), ExecutorError> {
        if events.is_empty() {
            return Err(ExecutorError::ReplayError(
                "workflow has no events to replay".to_string(),
            ));
        }
        if !matches!(&events[0].1, WorkflowEvent::WorkflowStarted { .. }) {
            return Err(ExecutorError::ReplayError(
                "first event must be WorkflowStarted".to_string(),
            ));
        }

        let mut workflow = self.registry.create(workflow_type, input)?;

        let recorded_side_effects: Vec<Value> = events
            .iter()
            .filter_map(|(_, event)| match event {
                WorkflowEvent::MarkerRecorded { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect();
        let mut ctx = WorkflowContext::new(Utc::now(), events.len(), recorded_side_effects);

        for (_seq, event) in events {
            self.replay_event(workflow.as_mut(), &mut ctx, event)?;
        }

        Ok((workflow, ctx))
    }

    fn check_history_bounds(
        &self,
        workflow_id: Uuid,
        events: &[(i32, WorkflowEvent)],
    ) -> Result<(), ExecutorError> {
        if events.is_empty() {
            return Err(ExecutorError::WorkflowNotFound(workflow_id));
        }
        if events.len() > self.config.max_events_per_workflow {
            return Err(ExecutorError::TooManyEvents(
                workflow_id,
                events.len(),
                self.config.max_events_per_workflow,
            ));
        }
        Ok(())
    }

    /// Replay a single historical event, discarding any actions it would
    /// have produced (those were already turned into store writes the first
    /// time this event was processed live).
    fn replay_event(
        &self,
        workflow: &mut dyn AnyWorkflow,
        ctx: &mut WorkflowContext,
        event: &WorkflowEvent,
    ) -> Result<(), ExecutorError> {
        match event {
            WorkflowEvent::WorkflowStarted { .. } => {
                let _ = workflow.on_start(ctx);
            }

            WorkflowEvent::ActivityCompleted {
                activity_id,
                result,
            } => {
                let _ = workflow.on_activity_completed(ctx, activity_id, result.clone());
            }

            WorkflowEvent::ActivityFailed {
                activity_id,
                error,
                will_retry,
            } => {
                if !will_retry {
                    let _ = workflow.on_activity_failed(ctx, activity_id, error);
                }
            }

            WorkflowEvent::ActivityTimedOut {
                activity_id,
                timeout_type,
            } => {
                let error = timeout_activity_error(*timeout_type);
                let _ = workflow.on_activity_failed(ctx, activity_id, &error);
            }

            WorkflowEvent::TimerFired { timer_id } => {
                let _ = workflow.on_timer_fired(ctx, timer_id);
            }

            WorkflowEvent::SignalReceived { signal } => {
                let _ = workflow.on_signal(ctx, signal);
            }

            WorkflowEvent::ChildWorkflowCompleted { workflow_id, result } => {
                let _ = workflow.on_child_workflow_completed(ctx, *workflow_id, result.clone());
            }

            WorkflowEvent::ChildWorkflowFailed { workflow_id, error } => {
                let _ = workflow.on_child_workflow_failed(ctx, *workflow_id, error);
            }

            WorkflowEvent::WorkflowCancelRequested { reason } => {
                ctx.set_cancel_requested(true);
                let _ = workflow.on_cancel_requested(ctx, reason);
            }

            // Events that are informational only during replay: either
            // audit/bookkeeping records (scheduling, decision-task markers),
            // terminal markers already reflected in the store's status
            // column, or data consumed directly out of history by `rebuild`
            // rather than fed through a callback (MarkerRecorded).
            WorkflowEvent::WorkflowCompleted { .. }
            | WorkflowEvent::WorkflowFailed { .. }
            | WorkflowEvent::WorkflowCancelled { .. }
            | WorkflowEvent::WorkflowTerminated { .. }
            | WorkflowEvent::WorkflowContinuedAsNew { .. }
            | WorkflowEvent::WorkflowTimedOut { .. }
            | WorkflowEvent::ActivityScheduled { .. }
            | WorkflowEvent::ActivityStarted { .. }
            | WorkflowEvent::ActivityCancelled { .. }
            | WorkflowEvent::TimerStarted { .. }
            | WorkflowEvent::TimerCancelled { .. }
            | WorkflowEvent::ChildWorkflowStarted { .. }
            | WorkflowEvent::ChildWorkflowCanceled { .. }
            | WorkflowEvent::WorkflowTaskScheduled
            | WorkflowEvent::WorkflowTaskStarted { .. }
            | WorkflowEvent::WorkflowTaskCompleted { .. }
            | WorkflowEvent::WorkflowTaskFailed { .. }
            | WorkflowEvent::MarkerRecorded { .. } => {}
        }

        Ok(())
    }

    /// Persist `trigger_actions`, deliver any signals that have arrived,
    /// and settle the workflow's terminal status (completing, failing, or
    /// notifying a parent run) as needed.
    fn apply_and_finish<'a>(
        &'a self,
        workflow_id: Uuid,
        workflow: &'a mut dyn AnyWorkflow,
        ctx: &'a mut WorkflowContext,
        sequence: i32,
        trigger_actions: Vec<WorkflowAction>,
        parent_workflow_id: Option<Uuid>,
        decided_by: &'a str,
    ) -> BoxFut<'a, Result<ProcessResult, ExecutorError>> {
        Box::pin(async move {
            let workflow_type = workflow.workflow_type().to_string();
            let mut events_written = 0usize;
            let mut tasks_enqueued = 0usize;

            let sequence = self
                .append_decision_triplet(workflow_id, sequence, decided_by, &trigger_actions)
                .await?;
            events_written += 3;

            let (mut sequence, written, enqueued, mut ended) = self
                .process_actions_internal(
                    workflow_id,
                    &workflow_type,
                    parent_workflow_id,
                    sequence,
                    trigger_actions,
                )
                .await?;
            events_written += written;
            tasks_enqueued += enqueued;

            let mut signals_processed = 0;
            if !ended {
                let signals = self.store.get_pending_signals(workflow_id).await?;
                signals_processed = signals.len();

                for signal in &signals {
                    let raw_actions = workflow.on_signal(ctx, signal);
                    let actions = finalize_actions(ctx, raw_actions);

                    let signal_event = WorkflowEvent::SignalReceived {
                        signal: signal.clone(),
                    };
                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![signal_event])
                        .await?;
                    events_written += 1;

                    sequence = self
                        .append_decision_triplet(workflow_id, sequence, decided_by, &actions)
                        .await?;
                    events_written += 3;

                    let (new_seq, written, enqueued, signal_ended) = self
                        .process_actions_internal(
                            workflow_id,
                            &workflow_type,
                            parent_workflow_id,
                            sequence,
                            actions,
                        )
                        .await?;
                    sequence = new_seq;
                    events_written += written;
                    tasks_enqueued += enqueued;
                    if signal_ended {
                        ended = true;
                        break;
                    }
                }

                if signals_processed > 0 {
                    self.store
                        .mark_signals_processed(workflow_id, signals_processed)
                        .await?;
                }
            }

            let completed = workflow.is_completed();
            if completed {
                let current_status = self.store.get_workflow_status(workflow_id).await?;
                if !current_status.is_terminal() {
                    if let Some(result) = workflow.result_json() {
                        self.store
                            .update_workflow_status(
                                workflow_id,
                                WorkflowStatus::Completed,
                                Some(result),
                                None,
                            )
                            .await?;
                    } else if let Some(error) = workflow.error() {
                        self.store
                            .update_workflow_status(
                                workflow_id,
                                WorkflowStatus::Failed,
                                None,
                                Some(error),
                            )
                            .await?;
                    }
                }
                self.notify_parent_if_terminal(workflow_id).await?;
            } else if !ended {
                let current_status = self.store.get_workflow_status(workflow_id).await?;
                if current_status == WorkflowStatus::Pending {
                    self.store
                        .update_workflow_status(workflow_id, WorkflowStatus::Running, None, None)
                        .await?;
                }
            }

            Ok(ProcessResult {
                completed: completed || ended,
                events_written,
                tasks_enqueued,
                signals_processed,
            })
        })
    }

    /// Append the `WorkflowTaskScheduled` / `WorkflowTaskStarted` /
    /// `WorkflowTaskCompleted` triplet that brackets a single decision
    /// (one rebuild-and-invoke-callback round), before the resulting
    /// actions are turned into their own events.
    async fn append_decision_triplet(
        &self,
        workflow_id: Uuid,
        sequence: i32,
        decided_by: &str,
        actions: &[WorkflowAction],
    ) -> Result<i32, ExecutorError> {
        let commands = actions.iter().map(|a| action_type_name(a).to_string()).collect();
        let events = vec![
            WorkflowEvent::WorkflowTaskScheduled,
            WorkflowEvent::WorkflowTaskStarted {
                worker_id: decided_by.to_string(),
            },
            WorkflowEvent::WorkflowTaskCompleted { commands },
        ];
        self.store.append_events(workflow_id, sequence, events).await.map_err(Into::into)
    }

    /// Process a batch of actions, returning the new sequence number, counts
    /// of events written / tasks enqueued, and whether the run closed
    /// (continue-as-new) so the caller should stop delivering further work
    /// to it.
    fn process_actions_internal<'a>(
        &'a self,
        workflow_id: Uuid,
        workflow_type: &'a str,
        parent_workflow_id: Option<Uuid>,
        mut sequence: i32,
        actions: Vec<WorkflowAction>,
    ) -> BoxFut<'a, Result<(i32, usize, usize, bool), ExecutorError>> {
        Box::pin(async move {
            let mut events_written = 0;
            let mut tasks_enqueued = 0;
            let mut ended = false;

            for action in actions {
                if ended {
                    warn!(%workflow_id, "ignoring action after continue-as-new");
                    break;
                }

                match action {
                    WorkflowAction::ScheduleActivity {
                        activity_id,
                        activity_type,
                        input,
                        options,
                    } => {
                        debug!(%workflow_id, %activity_id, %activity_type, "scheduling activity");

                        let event = WorkflowEvent::ActivityScheduled {
                            activity_id: activity_id.clone(),
                            activity_type: activity_type.clone(),
                            input: input.clone(),
                            options: options.clone(),
                        };

                        sequence = self
                            .store
                            .append_events(workflow_id, sequence, vec![event])
                            .await?;
                        events_written += 1;

                        let task = TaskDefinition {
                            workflow_id,
                            activity_id,
                            activity_type,
                            input,
                            options,
                        };

                        self.store.enqueue_task(task).await?;
                        tasks_enqueued += 1;
                    }

                    WorkflowAction::StartTimer { timer_id, duration } => {
                        debug!(%workflow_id, %timer_id, ?duration, "starting timer");

                        let fire_at = Utc::now()
                            + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
                        self.store
                            .schedule_timer(workflow_id, &timer_id, fire_at)
                            .await?;

                        let event = WorkflowEvent::TimerStarted {
                            timer_id,
                            duration_ms: duration.as_millis() as u64,
                        };

                        sequence = self
                            .store
                            .append_events(workflow_id, sequence, vec![event])
                            .await?;
                        events_written += 1;
                    }

                    WorkflowAction::CancelTimer { timer_id } => {
                        debug!(%workflow_id, %timer_id, "cancelling timer");

                        self.store.cancel_timer(workflow_id, &timer_id).await?;

                        let event = WorkflowEvent::TimerCancelled { timer_id };
                        sequence = self
                            .store
                            .append_events(workflow_id, sequence, vec![event])
                            .await?;
                        events_written += 1;
                    }

                    WorkflowAction::RecordMarker { marker_id, data } => {
                        let event = WorkflowEvent::MarkerRecorded { marker_id, data };
                        sequence = self
                            .store
                            .append_events(workflow_id, sequence, vec![event])
                            .await?;
                        events_written += 1;
                    }

                    WorkflowAction::CompleteWorkflow { result } => {
                        info!(%workflow_id, "completing workflow");

                        let event = WorkflowEvent::WorkflowCompleted {
                            result: result.clone(),
                        };

                        sequence = self
                            .store
                            .append_events(workflow_id, sequence, vec![event])
                            .await?;
                        events_written += 1;

                        self.store
                            .update_workflow_status(
                                workflow_id,
                                WorkflowStatus::Completed,
                                Some(result),
                                None,
                            )
                            .await?;
                    }

                    WorkflowAction::FailWorkflow { error } => {
                        error!(%workflow_id, error = %error.message, "failing workflow");

                        let event = WorkflowEvent::WorkflowFailed {
                            error: error.clone(),
                        };

                        sequence = self
                            .store
                            .append_events(workflow_id, sequence, vec![event])
                            .await?;
                        events_written += 1;

                        self.store
                            .update_workflow_status(
                                workflow_id,
                                WorkflowStatus::Failed,
                                None,
                                Some(error),
                            )
                            .await?;
                    }

                    WorkflowAction::ScheduleChildWorkflow {
                        workflow_id: child_label,
                        workflow_type: child_type,
                        input,
                    } => {
                        let child_run_id = Uuid::now_v7();
                        debug!(%workflow_id, %child_label, child_run_id = %child_run_id, %child_type, "scheduling child workflow");

                        let event = WorkflowEvent::ChildWorkflowStarted {
                            workflow_id: child_run_id,
                            workflow_type: child_type.clone(),
                        };

                        sequence = self
                            .store
                            .append_events(workflow_id, sequence, vec![event])
                            .await?;
                        events_written += 1;

                        self.start_dynamic_workflow(
                            child_run_id,
                            &child_type,
                            input,
                            Some(workflow_id),
                        )
                        .await?;
                    }

                    WorkflowAction::CancelActivity { activity_id } => {
                        debug!(%workflow_id, %activity_id, "cancelling activity");

                        let event = WorkflowEvent::ActivityCancelled {
                            activity_id,
                            reason: "cancelled by workflow".to_string(),
                        };

                        sequence = self
                            .store
                            .append_events(workflow_id, sequence, vec![event])
                            .await?;
                        events_written += 1;
                    }

                    WorkflowAction::ContinueAsNew { input } => {
                        let new_run_id = Uuid::now_v7();
                        info!(%workflow_id, new_run_id = %new_run_id, "continuing workflow as new");

                        let event = WorkflowEvent::WorkflowContinuedAsNew {
                            new_run_id,
                            input: input.clone(),
                        };
                        sequence = self
                            .store
                            .append_events(workflow_id, sequence, vec![event])
                            .await?;
                        events_written += 1;

                        self.store
                            .update_workflow_status(
                                workflow_id,
                                WorkflowStatus::ContinuedAsNew,
                                None,
                                None,
                            )
                            .await?;

                        self.start_dynamic_workflow(
                            new_run_id,
                            workflow_type,
                            input,
                            parent_workflow_id,
                        )
                        .await?;

                        ended = true;
                    }

                    WorkflowAction::None => {}
                }
            }

            Ok((sequence, events_written, tasks_enqueued, ended))
        })
    }

    /// Start a workflow run whose type is only known at runtime (children
    /// and continue-as-new successors), via the type-erased registry.
    fn start_dynamic_workflow<'a>(
        &'a self,
        workflow_id: Uuid,
        workflow_type: &'a str,
        input: Value,
        parent_workflow_id: Option<Uuid>,
    ) -> BoxFut<'a, Result<(), ExecutorError>> {
        Box::pin(async move {
            match parent_workflow_id {
                Some(parent_id) => {
                    self.store
                        .create_child_workflow(workflow_id, workflow_type, input.clone(), None, parent_id)
                        .await?;
                }
                None => {
                    self.store
                        .create_workflow(workflow_id, workflow_type, input.clone(), None)
                        .await?;
                }
            }

            let start_event = WorkflowEvent::WorkflowStarted {
                input: input.clone(),
            };
            let sequence = self
                .store
                .append_events(workflow_id, 0, vec![start_event])
                .await?;

            let mut workflow = self.registry.create(workflow_type, input)?;
            let mut ctx = WorkflowContext::new(Utc::now(), 1, vec![]);
            let raw_actions = workflow.on_start(&mut ctx);
            let actions = finalize_actions(&mut ctx, raw_actions);

            self.apply_and_finish(
                workflow_id,
                workflow.as_mut(),
                &mut ctx,
                sequence,
                actions,
                parent_workflow_id,
                "engine",
            )
            .await?;

            Ok(())
        })
    }

    /// If `workflow_id` just reached a terminal state and was started as a
    /// child workflow, deliver the result to its parent's history.
    fn notify_parent_if_terminal(&self, workflow_id: Uuid) -> BoxFut<'_, Result<(), ExecutorError>> {
        Box::pin(async move {
            let info = self.store.get_workflow_info(workflow_id).await?;
            let Some(parent_id) = info.parent_workflow_id else {
                return Ok(());
            };

            match info.status {
                WorkflowStatus::Completed => {
                    let result = info.result.unwrap_or(Value::Null);
                    self.deliver_child_completed(parent_id, workflow_id, result)
                        .await
                }
                WorkflowStatus::Failed => {
                    let error = info
                        .error
                        .unwrap_or_else(|| WorkflowError::new("child workflow failed"));
                    self.deliver_child_failed(parent_id, workflow_id, error)
                        .await
                }
                _ => Ok(()),
            }
        })
    }

    fn deliver_child_completed(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        result: Value,
    ) -> BoxFut<'_, Result<(), ExecutorError>> {
        Box::pin(async move {
            let info = match self.store.get_workflow_info(parent_id).await {
                Ok(info) => info,
                Err(StoreError::WorkflowNotFound(_)) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if info.status.is_terminal() {
                return Ok(());
            }

            let events = self.store.load_events(parent_id).await?;
            let (mut workflow, mut ctx) = self.rebuild(&info.workflow_type, info.input.clone(), &events)?;
            let sequence_before = events.len() as i32;

            let raw_actions = workflow.on_child_workflow_completed(&mut ctx, child_id, result.clone());
            let actions = finalize_actions(&mut ctx, raw_actions);

            let event = WorkflowEvent::ChildWorkflowCompleted {
                workflow_id: child_id,
                result,
            };
            let sequence = self
                .store
                .append_events(parent_id, sequence_before, vec![event])
                .await?;

            self.apply_and_finish(
                parent_id,
                workflow.as_mut(),
                &mut ctx,
                sequence,
                actions,
                info.parent_workflow_id,
                "engine",
            )
            .await?;

            Ok(())
        })
    }

    fn deliver_child_failed(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        error: WorkflowError,
    ) -> BoxFut<'_, Result<(), ExecutorError>> {
        Box::pin(async move {
            let info = match self.store.get_workflow_info(parent_id).await {
                Ok(info) => info,
                Err(StoreError::WorkflowNotFound(_)) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if info.status.is_terminal() {
                return Ok(());
            }

            let events = self.store.load_events(parent_id).await?;
            let (mut workflow, mut ctx) = self.rebuild(&info.workflow_type, info.input.clone(), &events)?;
            let sequence_before = events.len() as i32;

            let raw_actions = workflow.on_child_workflow_failed(&mut ctx, child_id, &error);
            let actions = finalize_actions(&mut ctx, raw_actions);

            let event = WorkflowEvent::ChildWorkflowFailed {
                workflow_id: child_id,
                error,
            };
            let sequence = self
                .store
                .append_events(parent_id, sequence_before, vec![event])
                .await?;

            self.apply_and_finish(
                parent_id,
                workflow.as_mut(),
                &mut ctx,
                sequence,
                actions,
                info.parent_workflow_id,
                "engine",
            )
            .await?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkflowEventStore;
    use serde::{Deserialize, Serialize};

    fn test_ctx() -> WorkflowContext {
        WorkflowContext::new(Utc::now(), 0, vec![])
    }

    // Test workflow implementation
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CounterInput {
        start: i32,
        target: i32,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct CounterOutput {
        final_value: i32,
    }

    struct CounterWorkflow {
        current: i32,
        target: i32,
        completed: bool,
        failed: bool,
        error_message: Option<String>,
    }

    impl crate::workflow::Workflow for CounterWorkflow {
        const TYPE: &'static str = "counter_workflow";
        type Input = CounterInput;
        type Output = CounterOutput;

        fn new(input: Self::Input) -> Self {
            Self {
                current: input.start,
                target: input.target,
                completed: false,
                failed: false,
                error_message: None,
            }
        }

        fn on_start(&mut self, _ctx: &mut WorkflowContext) -> Vec<WorkflowAction> {
            if self.current >= self.target {
                self.completed = true;
                vec![WorkflowAction::complete(
                    serde_json::json!({ "final_value": self.current }),
                )]
            } else {
                vec![WorkflowAction::schedule_activity(
                    format!("increment-{}", self.current),
                    "increment",
                    serde_json::json!({ "value": self.current }),
                )]
            }
        }

        fn on_activity_completed(
            &mut self,
            _ctx: &mut WorkflowContext,
            _activity_id: &str,
            result: serde_json::Value,
        ) -> Vec<WorkflowAction> {
            self.current = result.get("value").and_then(|v| v.as_i64()).unwrap_or(0) as i32;

            if self.current >= self.target {
                self.completed = true;
                vec![WorkflowAction::complete(
                    serde_json::json!({ "final_value": self.current }),
                )]
            } else {
                vec![WorkflowAction::schedule_activity(
                    format!("increment-{}", self.current),
                    "increment",
                    serde_json::json!({ "value": self.current }),
                )]
            }
        }

        fn on_activity_failed(
            &mut self,
            _ctx: &mut WorkflowContext,
            _activity_id: &str,
            error: &ActivityError,
        ) -> Vec<WorkflowAction> {
            self.failed = true;
            self.error_message = Some(error.message.clone());
            vec![WorkflowAction::fail(crate::WorkflowError::new(
                &error.message,
            ))]
        }

        fn is_completed(&self) -> bool {
            self.completed || self.failed
        }

        fn result(&self) -> Option<Self::Output> {
            if self.completed && !self.failed {
                Some(CounterOutput {
                    final_value: self.current,
                })
            } else {
                None
            }
        }

        fn error(&self) -> Option<crate::WorkflowError> {
            self.error_message.as_ref().map(crate::WorkflowError::new)
        }
    }

    #[tokio::test]
    async fn test_start_workflow() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 3,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let status = executor
            .store()
            .get_workflow_status(workflow_id)
            .await
            .expect("should get status");

        assert_eq!(status, WorkflowStatus::Running);

        let events = executor
            .store()
            .load_events(workflow_id)
            .await
            .expect("should load events");

        // WorkflowStarted, then the decision triplet, then ActivityScheduled
        assert!(events.len() >= 5);
        assert!(matches!(events[0].1, WorkflowEvent::WorkflowStarted { .. }));
        assert!(matches!(events[1].1, WorkflowEvent::WorkflowTaskScheduled));
        assert!(matches!(
            events[2].1,
            WorkflowEvent::WorkflowTaskStarted { .. }
        ));
        assert!(matches!(
            events[3].1,
            WorkflowEvent::WorkflowTaskCompleted { .. }
        ));
        assert!(matches!(
            events[4].1,
            WorkflowEvent::ActivityScheduled { .. }
        ));
    }

    #[tokio::test]
    async fn test_immediate_completion() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 5,
            target: 3,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let status = executor
            .store()
            .get_workflow_status(workflow_id)
            .await
            .expect("should get status");

        assert_eq!(status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_activity_completion() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 2,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let result = executor
            .on_activity_completed(
                workflow_id,
                "increment-0",
                serde_json::json!({ "value": 1 }),
                "test-worker",
            )
            .await
            .expect("should complete activity");

        assert!(!result.completed);

        // The second increment should actually have been enqueued this time
        // (not silently dropped), since the new action is now delivered live.
        let events = executor
            .store()
            .load_events(workflow_id)
            .await
            .expect("should load events");
        assert!(events
            .iter()
            .any(|(_, e)| matches!(e, WorkflowEvent::ActivityScheduled { activity_id, .. } if activity_id == "increment-1")));

        let result = executor
            .on_activity_completed(
                workflow_id,
                "increment-1",
                serde_json::json!({ "value": 2 }),
                "test-worker",
            )
            .await
            .expect("should complete activity");

        assert!(result.completed);

        let status = executor
            .store()
            .get_workflow_status(workflow_id)
            .await
            .expect("should get status");

        assert_eq!(status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_activity_failure() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 5,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let error = ActivityError::non_retryable("increment failed").with_type("INCREMENT_ERROR");
        let result = executor
            .on_activity_failed(workflow_id, "increment-0", error, false, "test-worker")
            .await
            .expect("should handle failure");

        assert!(result.completed);

        let status = executor
            .store()
            .get_workflow_status(workflow_id)
            .await
            .expect("should get status");

        assert_eq!(status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_signal_handling() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 10,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let signal = WorkflowSignal::new("test_signal", serde_json::json!({ "data": "hello" }));
        executor
            .send_signal(workflow_id, signal)
            .await
            .expect("should send signal");

        let result = executor
            .process_workflow(workflow_id)
            .await
            .expect("should process");

        assert_eq!(result.signals_processed, 1);
    }

    #[tokio::test]
    async fn test_cannot_signal_completed_workflow() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 10,
            target: 5,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        let signal = WorkflowSignal::new("test", serde_json::json!({}));
        let result = executor.send_signal(workflow_id, signal).await;

        assert!(matches!(result, Err(ExecutorError::WorkflowCompleted(_))));
    }

    #[tokio::test]
    async fn test_replay_consistency() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 3,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .expect("should start workflow");

        executor
            .on_activity_completed(
                workflow_id,
                "increment-0",
                serde_json::json!({ "value": 1 }),
                "test-worker",
            )
            .await
            .unwrap();
        executor
            .on_activity_completed(
                workflow_id,
                "increment-1",
                serde_json::json!({ "value": 2 }),
                "test-worker",
            )
            .await
            .unwrap();
        executor
            .on_activity_completed(
                workflow_id,
                "increment-2",
                serde_json::json!({ "value": 3 }),
                "test-worker",
            )
            .await
            .unwrap();

        let result = executor.process_workflow(workflow_id).await.unwrap();
        assert!(result.completed);
    }

    #[tokio::test]
    async fn test_query_rejected_for_unknown_name() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 3,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .unwrap();

        let result = executor
            .query_workflow(workflow_id, "status", serde_json::json!({}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_request_cancellation_fails_workflow_by_default() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<CounterWorkflow>();

        let input = CounterInput {
            start: 0,
            target: 10,
        };
        let workflow_id = executor
            .start_workflow::<CounterWorkflow>(input, None)
            .await
            .unwrap();

        let result = executor
            .request_cancellation(workflow_id, "operator request")
            .await
            .expect("should process cancellation");
        assert!(result.completed);

        let status = executor.store().get_workflow_status(workflow_id).await.unwrap();
        assert_eq!(status, WorkflowStatus::Failed);
    }

    #[test]
    fn test_finalize_actions_orders_markers_before_and_continue_as_new_after() {
        let mut ctx = test_ctx();
        let _ = ctx.record_side_effect("m1", || serde_json::json!("v1"));
        let actions = vec![WorkflowAction::schedule_activity(
            "a",
            "t",
            serde_json::json!({}),
        )];
        ctx.continue_as_new(serde_json::json!({"resume": true}));

        let finalized = finalize_actions(&mut ctx, actions);
        assert_eq!(finalized.len(), 3);
        assert!(matches!(finalized[0], WorkflowAction::RecordMarker { .. }));
        assert!(matches!(finalized[1], WorkflowAction::ScheduleActivity { .. }));
        assert!(matches!(finalized[2], WorkflowAction::ContinueAsNew { .. }));
    }
}
