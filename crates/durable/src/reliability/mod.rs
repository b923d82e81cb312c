//! Reliability patterns for durable execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Configurable retry with exponential backoff
//! - [`CircuitBreakerConfig`] - Circuit breaker configuration
//! - [`TimeoutManager`] - Schedule-to-start / start-to-close / heartbeat timeout checks

mod circuit_breaker;
mod retry;
mod timeout;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;
pub use timeout::{TaskTimingInfo, TimeoutConfig, TimeoutError, TimeoutManager, TimeoutType};
