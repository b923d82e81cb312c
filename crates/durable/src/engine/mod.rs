//! Workflow execution engine
//!
//! The engine module provides the `WorkflowExecutor` which drives workflow
//! state machines through event replay and action processing.

mod client;
mod executor;
mod registry;
mod schedule;
mod timeout_service;
mod timer;

pub use client::{ClientError, IdReusePolicy, StartWorkflowOptions, WorkflowClient};
pub use executor::{ExecutorConfig, ExecutorError, ProcessResult, WorkflowExecutor};
pub use registry::{WorkflowFactory, WorkflowRegistry};
pub use schedule::{
    CatchUpPolicy, OverlapPolicy, ScheduleAction, ScheduleError, ScheduleService, ScheduleSpec,
};
pub use timeout_service::{TimeoutService, TimeoutServiceConfig};
pub use timer::{TimerService, TimerServiceConfig};
