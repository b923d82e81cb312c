//! Background service that fires durable timers
//!
//! Polls the store for timers whose `fire_at` has passed and delivers
//! `on_timer_fired` to the owning workflow. Mirrors the worker pool's
//! ticker-plus-shutdown-signal loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::persistence::WorkflowEventStore;

use super::executor::WorkflowExecutor;

/// Configuration for the timer service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerServiceConfig {
    /// How often to poll for due timers
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Maximum timers to fire per poll
    pub batch_size: usize,
}

impl Default for TimerServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
        }
    }
}

/// Drives durable timers to completion in the background.
///
/// One `TimerService` can be run alongside a `WorkerPool`; both share the
/// same store and drive the same executor, just for different event
/// sources (activity results vs. wall-clock deadlines).
pub struct TimerService<S: WorkflowEventStore> {
    executor: Arc<WorkflowExecutor<S>>,
    config: TimerServiceConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S: WorkflowEventStore> TimerService<S> {
    /// Create a new timer service over the given executor
    pub fn new(executor: Arc<WorkflowExecutor<S>>, config: TimerServiceConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            executor,
            config,
            shutdown_tx,
            shutdown_rx,
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Start the background firing loop
    pub fn start(&self) {
        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.poll_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let due = match executor
                            .store()
                            .take_due_timers(chrono::Utc::now(), config.batch_size)
                            .await
                        {
                            Ok(due) => due,
                            Err(e) => {
                                error!("failed to poll due timers: {}", e);
                                continue;
                            }
                        };

                        if due.is_empty() {
                            continue;
                        }
                        debug!(count = due.len(), "firing due timers");

                        for (workflow_id, timer_id) in due {
                            if let Err(e) = executor.on_timer_fired(workflow_id, &timer_id).await {
                                warn!(%workflow_id, %timer_id, "failed to deliver timer fire: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("timer service: shutdown requested");
                        break;
                    }
                }
            }

            debug!("timer service loop exited");
        });

        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Signal the background loop to stop and wait for it to exit
    pub async fn shutdown(&self) {
        info!("stopping timer service");
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
