//! Background service that scans in-flight activities for timeouts
//!
//! Polls the store for claimed tasks, checks each against its configured
//! schedule-to-start/start-to-close/heartbeat timeout, fails the queue entry,
//! and delivers the timeout to the owning workflow. Mirrors `TimerService`'s
//! ticker-plus-shutdown-signal loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::persistence::WorkflowEventStore;
use crate::reliability::TimeoutManager;

use super::executor::WorkflowExecutor;

/// Configuration for the timeout scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutServiceConfig {
    /// How often to scan in-flight tasks for timeouts
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for TimeoutServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Drives activity timeouts to completion in the background.
///
/// One `TimeoutService` can run alongside a `WorkerPool` and a
/// `TimerService`; all three share the same store and drive the same
/// executor, just for different event sources.
pub struct TimeoutService<S: WorkflowEventStore> {
    executor: Arc<WorkflowExecutor<S>>,
    manager: TimeoutManager,
    config: TimeoutServiceConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S: WorkflowEventStore> TimeoutService<S> {
    /// Create a new timeout service over the given executor
    pub fn new(executor: Arc<WorkflowExecutor<S>>, config: TimeoutServiceConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = TimeoutManager::new(executor.store_handle() as Arc<dyn WorkflowEventStore>);
        Self {
            executor,
            manager,
            config,
            shutdown_tx,
            shutdown_rx,
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Start the background scanning loop
    pub fn start(&self) {
        let executor = Arc::clone(&self.executor);
        let manager = self.manager.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.poll_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let timings = match executor.store().list_in_flight_tasks().await {
                            Ok(timings) => timings,
                            Err(e) => {
                                error!("failed to list in-flight tasks: {}", e);
                                continue;
                            }
                        };

                        for timing in timings {
                            let Some((timeout_type, _err)) = manager.check_task_timeout(&timing) else {
                                continue;
                            };

                            debug!(task_id = %timing.task_id, ?timeout_type, "activity timed out");

                            if let Err(e) = manager.handle_timeout(timing.task_id, timeout_type).await {
                                error!(task_id = %timing.task_id, "failed to fail timed-out task: {}", e);
                                continue;
                            }

                            if let Err(e) = executor
                                .on_activity_timed_out(
                                    timing.workflow_id,
                                    &timing.activity_id,
                                    timeout_type.into(),
                                )
                                .await
                            {
                                warn!(
                                    workflow_id = %timing.workflow_id,
                                    activity_id = %timing.activity_id,
                                    "failed to deliver timeout to workflow: {}", e
                                );
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("timeout service: shutdown requested");
                        break;
                    }
                }
            }

            debug!("timeout service loop exited");
        });

        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Signal the background loop to stop and wait for it to exit
    pub async fn shutdown(&self) {
        info!("stopping timeout service");
        let _ = self.shutdown_tx.send(true);

        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryWorkflowEventStore, TaskDefinition, WorkflowStatus};
    use crate::workflow::{ActivityOptions, Workflow, WorkflowAction, WorkflowContext, WorkflowError};
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct NoopInput;

    struct NoopWorkflow {
        failed: bool,
    }

    impl Workflow for NoopWorkflow {
        const TYPE: &'static str = "timeout_noop_workflow";
        type Input = NoopInput;
        type Output = Value;

        fn new(_input: Self::Input) -> Self {
            Self { failed: false }
        }

        fn on_start(&mut self, _ctx: &mut WorkflowContext) -> Vec<WorkflowAction> {
            vec![WorkflowAction::ScheduleActivity {
                activity_id: "step-1".to_string(),
                activity_type: "slow_activity".to_string(),
                input: Value::Null,
                options: ActivityOptions::default()
                    .with_schedule_to_start_timeout(Duration::from_millis(5)),
            }]
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
            error: &crate::activity::ActivityError,
        ) -> Vec<WorkflowAction> {
            self.failed = true;
            vec![WorkflowAction::fail(WorkflowError::new(error.message.clone()))]
        }

        fn is_completed(&self) -> bool {
            self.failed
        }

        fn result(&self) -> Option<Self::Output> {
            None
        }
    }

    #[tokio::test]
    async fn test_timeout_service_fails_workflow_on_schedule_to_start_timeout() {
        let store = InMemoryWorkflowEventStore::new();
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<NoopWorkflow>();
        let executor = Arc::new(executor);

        let workflow_id = executor
            .start_workflow::<NoopWorkflow>(NoopInput, None)
            .await
            .unwrap();

        executor
            .store()
            .enqueue_task(TaskDefinition {
                workflow_id,
                activity_id: "step-1".to_string(),
                activity_type: "slow_activity".to_string(),
                input: Value::Null,
                options: ActivityOptions::default()
                    .with_schedule_to_start_timeout(Duration::from_millis(5)),
            })
            .await
            .unwrap();

        // Leave the task unclaimed past its schedule-to-start timeout.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let service = TimeoutService::new(
            Arc::clone(&executor),
            TimeoutServiceConfig {
                poll_interval: Duration::from_millis(10),
            },
        );
        service.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.shutdown().await;

        let status = executor.store().get_workflow_status(workflow_id).await.unwrap();
        assert_eq!(status, WorkflowStatus::Failed);
    }
}
