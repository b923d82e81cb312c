//! Per-decision context handed to workflow callbacks
//!
//! `WorkflowContext` carries the primitives a workflow function needs that
//! are *not* expressed as callback arguments: the event-clock, history size
//! counters, the side-effect (marker) ordinal, and a slot for requesting
//! continue-as-new. It is reconstructed once per `process_workflow` call and
//! threaded through every replayed callback in order, so side-effect lookups
//! stay aligned across the whole history rather than resetting per event.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Context passed to every `Workflow` callback.
///
/// During replay, `record_side_effect` returns previously recorded values
/// instead of invoking the closure, and `now()` returns the clock value
/// captured for the current decision rather than the wall clock.
pub struct WorkflowContext {
    now: DateTime<Utc>,
    history_size: usize,
    event_count: usize,
    recorded_side_effects: Vec<Value>,
    side_effect_cursor: usize,
    pending_markers: Vec<(String, Value)>,
    cancel_requested: bool,
    continue_as_new: Option<Value>,
}

impl WorkflowContext {
    /// Build a context for a decision, pre-loaded with markers already
    /// present in history (in recording order) so `record_side_effect`
    /// resolves deterministically on replay.
    pub fn new(now: DateTime<Utc>, history_size: usize, recorded_side_effects: Vec<Value>) -> Self {
        Self {
            now,
            history_size,
            event_count: history_size,
            recorded_side_effects,
            side_effect_cursor: 0,
            pending_markers: Vec::new(),
            cancel_requested: false,
            continue_as_new: None,
        }
    }

    /// The event-clock for the current decision. Constant within one decision.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Number of events currently in this run's history.
    pub fn history_size(&self) -> usize {
        self.history_size
    }

    /// Alias for `history_size`; exposed separately because the engine
    /// tracks both "events applied so far" and "events in the full log"
    /// identically in this implementation (no compaction).
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Run `f` exactly once across the life of the workflow.
    ///
    /// On first execution (live), `f` runs and its result is queued as a
    /// `MarkerRecorded` event. On replay, the previously recorded value is
    /// returned and `f` is never called — this is the only sanctioned way
    /// for a workflow to observe non-deterministic data.
    pub fn record_side_effect<F>(&mut self, marker_id: impl Into<String>, f: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        let marker_id = marker_id.into();
        if self.side_effect_cursor < self.recorded_side_effects.len() {
            let value = self.recorded_side_effects[self.side_effect_cursor].clone();
            self.side_effect_cursor += 1;
            value
        } else {
            let value = f();
            self.pending_markers.push((marker_id, value.clone()));
            self.side_effect_cursor += 1;
            value
        }
    }

    /// Whether a cancellation has been requested for this run.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub(crate) fn set_cancel_requested(&mut self, requested: bool) {
        self.cancel_requested = requested;
    }

    /// Request that the current run terminate with `ContinuedAsNew` and a
    /// successor run start with `new_input`, preserving the workflowId.
    pub fn continue_as_new(&mut self, new_input: Value) {
        self.continue_as_new = Some(new_input);
    }

    pub(crate) fn take_continue_as_new(&mut self) -> Option<Value> {
        self.continue_as_new.take()
    }

    pub(crate) fn take_pending_markers(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.pending_markers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_effect_runs_once_live() {
        let mut ctx = WorkflowContext::new(Utc::now(), 0, vec![]);
        let mut calls = 0;
        let value = ctx.record_side_effect("uuid-1", || {
            calls += 1;
            serde_json::json!("generated")
        });
        assert_eq!(value, serde_json::json!("generated"));
        assert_eq!(calls, 1);
        assert_eq!(ctx.take_pending_markers().len(), 1);
    }

    #[test]
    fn side_effect_replays_without_calling_closure() {
        let mut ctx = WorkflowContext::new(Utc::now(), 1, vec![serde_json::json!("recorded")]);
        let mut calls = 0;
        let value = ctx.record_side_effect("uuid-1", || {
            calls += 1;
            serde_json::json!("should-not-run")
        });
        assert_eq!(value, serde_json::json!("recorded"));
        assert_eq!(calls, 0);
        assert!(ctx.take_pending_markers().is_empty());
    }

    #[test]
    fn continue_as_new_round_trips() {
        let mut ctx = WorkflowContext::new(Utc::now(), 0, vec![]);
        assert!(ctx.take_continue_as_new().is_none());
        ctx.continue_as_new(serde_json::json!({"remaining": 50}));
        assert_eq!(
            ctx.take_continue_as_new(),
            Some(serde_json::json!({"remaining": 50}))
        );
        assert!(ctx.take_continue_as_new().is_none());
    }
}
