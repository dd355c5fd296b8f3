//! Injected telemetry sink for structured events.
//!
//! The sink is constructed by the caller and passed down explicitly —
//! there is no ambient global. Events are fire-and-forget: a sink that
//! fails must swallow the failure itself; callers never check.

use serde_json::Value;
use tracing::info;

/// Receiver of structured telemetry events.
pub trait TelemetrySink: Send + Sync {
    /// Records a named event with a structured payload.
    ///
    /// Implementations must not panic and must not block the caller on
    /// delivery failures.
    fn event(&self, name: &str, payload: &Value);
}

/// Sink that forwards events to the `tracing` pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn event(&self, name: &str, payload: &Value) {
        info!(target: "counsel_rs::telemetry", event = name, payload = %payload);
    }
}

/// Sink that drops all events. Useful in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn event(&self, _name: &str, _payload: &Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sinks_accept_events() {
        let payload = json!({"search_results": {"q": []}});
        TracingTelemetry.event("search_results_structured", &payload);
        NoopTelemetry.event("search_results_structured", &payload);
    }
}
