//! Observation bridge
//!
//! The engine narrates its decisions through an injected sink so UI
//! consumers can follow along without the engine knowing about transports.
//! Production bridges the sink to SSE fan-out; tests capture the stream.

use std::sync::Mutex;

use serde_json::Value;

/// Event type names emitted by the engine.
pub mod event {
    /// An arm was chosen for an incoming request
    pub const ARM_SELECTED: &str = "arm.selected";
    /// A reward was folded into arm statistics
    pub const OUTCOME_RECORDED: &str = "outcome.recorded";
    /// A reflection pass acquired the lock and started
    pub const REFLECTION_STARTED: &str = "reflection.started";
    /// A reflection pass replaced a partition's arms
    pub const REFLECTION_COMPLETED: &str = "reflection.completed";
    /// Traffic-derived evaluations replaced the seeded ones
    pub const EVALUATIONS_REGENERATED: &str = "evaluations.regenerated";
    /// An evaluator degraded to its neutral fallback score
    pub const EVALUATOR_FALLBACK: &str = "evaluator.fallback";
    /// A partition was reset
    pub const PARTITION_RESET: &str = "partition.reset";
    /// A whole skill was reset
    pub const SKILL_RESET: &str = "skill.reset";
}

/// Sink for engine events.
///
/// Implementations must be cheap and non-blocking; the engine calls `emit`
/// from the serving path.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Payloads are opaque JSON objects.
    fn emit(&self, event_type: &str, payload: Value);
}

/// Sink that drops everything. The default when no observer is wired up.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event_type: &str, _payload: Value) {}
}

/// Sink that records events in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CapturingSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl CapturingSink {
    /// Create an empty capturing sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    /// Count of events with the given type.
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == event_type)
            .count()
    }
}

impl EventSink for CapturingSink {
    fn emit(&self, event_type: &str, payload: Value) {
        self.events
            .lock()
            .unwrap()
            .push((event_type.to_string(), payload));
    }
}
