// Telemetry Hooks
//
// Purely additive: wraps call_tool/read_resource with latency and error
// counters. Must never alter the wrapped operation's outcome. Scaled down
// from the OpenTelemetry-based gen_ai telemetry carried by the legacy
// `core` crate in this workspace — this engine needs span-level latency
// counters, not a full OTLP pipeline, so we keep the ambient `tracing`
// instrumentation and add a small sink trait for counters instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// The two operation kinds the engine instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryOperation {
    CallTool,
    ReadResource,
}

impl TelemetryOperation {
    fn as_str(&self) -> &'static str {
        match self {
            TelemetryOperation::CallTool => "call_tool",
            TelemetryOperation::ReadResource => "read_resource",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub operation: TelemetryOperation,
    pub target_name: String,
    pub duration: Duration,
    pub is_error: bool,
    pub error_message: Option<String>,
}

/// Sink for telemetry events. Implementations must not block the caller for
/// long or panic; a slow/failing sink degrades observability, not behavior.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Default sink: logs each event through `tracing` at info/warn. This is the
/// ambient logging layer every operation gets regardless of whether a host
/// wires up a richer sink.
#[derive(Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        if event.is_error {
            tracing::warn!(
                operation = event.operation.as_str(),
                target = %event.target_name,
                duration_ms = event.duration.as_millis() as u64,
                error = event.error_message.as_deref().unwrap_or(""),
                "concierge operation failed"
            );
        } else {
            tracing::info!(
                operation = event.operation.as_str(),
                target = %event.target_name,
                duration_ms = event.duration.as_millis() as u64,
                "concierge operation completed"
            );
        }
    }
}

#[derive(Default)]
struct Counters {
    calls: AtomicU64,
    errors: AtomicU64,
    total_duration_ms: AtomicU64,
}

/// In-memory counting sink, keyed by `(operation, target_name)`. Used in
/// tests, and available to a host that wants to expose counters without
/// standing up a Prometheus pipeline (that integration is out of scope here).
#[derive(Default)]
pub struct CountingTelemetrySink {
    counters: Mutex<HashMap<(&'static str, String), Counters>>,
}

impl CountingTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self, operation: TelemetryOperation, target_name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(&(operation.as_str(), target_name.to_string()))
            .map(|c| c.calls.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn errors(&self, operation: TelemetryOperation, target_name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(&(operation.as_str(), target_name.to_string()))
            .map(|c| c.errors.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl TelemetrySink for CountingTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters
            .entry((event.operation.as_str(), event.target_name))
            .or_default();
        entry.calls.fetch_add(1, Ordering::Relaxed);
        if event.is_error {
            entry.errors.fetch_add(1, Ordering::Relaxed);
        }
        entry
            .total_duration_ms
            .fetch_add(event.duration.as_millis() as u64, Ordering::Relaxed);
    }
}

/// Times a fallible async operation and reports it to a sink without
/// altering the operation's `Result`.
pub async fn instrument<F, Fut, T, E>(
    sink: &dyn TelemetrySink,
    operation: TelemetryOperation,
    target_name: impl Into<String>,
    f: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let target_name = target_name.into();
    let start = std::time::Instant::now();
    let result = f().await;
    let duration = start.elapsed();
    let (is_error, error_message) = match &result {
        Ok(_) => (false, None),
        Err(e) => (true, Some(e.to_string())),
    };
    sink.record(TelemetryEvent {
        operation,
        target_name,
        duration,
        is_error,
        error_message,
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counting_sink_tracks_calls_and_errors() {
        let sink = CountingTelemetrySink::new();
        let _: Result<(), &str> =
            instrument(&sink, TelemetryOperation::CallTool, "search", || async { Ok(()) }).await;
        let _: Result<(), &str> = instrument(&sink, TelemetryOperation::CallTool, "search", || {
            async { Err("boom") }
        })
        .await;

        assert_eq!(sink.calls(TelemetryOperation::CallTool, "search"), 2);
        assert_eq!(sink.errors(TelemetryOperation::CallTool, "search"), 1);
    }
}
