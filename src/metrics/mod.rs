//! Prometheus metrics for monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    /// JSON-RPC requests handled
    pub requests_total: AtomicU64,
    /// Requests answered with an error
    pub requests_failed: AtomicU64,
    /// Tool calls dispatched to a handler
    pub tool_calls: AtomicU64,
    /// Tool calls whose handler failed or panicked
    pub tool_failures: AtomicU64,
    /// Currently open sessions
    pub active_sessions: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tool_calls(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tool_failures(&self) {
        self.tool_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        // Saturate at zero.
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Get all metrics as a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_failures: self.tool_failures.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# HELP mcp_toolbox_requests_total JSON-RPC requests handled
# TYPE mcp_toolbox_requests_total counter
mcp_toolbox_requests_total {}

# HELP mcp_toolbox_requests_failed Requests answered with an error
# TYPE mcp_toolbox_requests_failed counter
mcp_toolbox_requests_failed {}

# HELP mcp_toolbox_tool_calls Tool calls dispatched to a handler
# TYPE mcp_toolbox_tool_calls counter
mcp_toolbox_tool_calls {}

# HELP mcp_toolbox_tool_failures Tool calls whose handler failed
# TYPE mcp_toolbox_tool_failures counter
mcp_toolbox_tool_failures {}

# HELP mcp_toolbox_active_sessions Open sessions
# TYPE mcp_toolbox_active_sessions gauge
mcp_toolbox_active_sessions {}
"#,
            s.requests_total, s.requests_failed, s.tool_calls, s.tool_failures, s.active_sessions
        )
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub tool_calls: u64,
    pub tool_failures: u64,
    pub active_sessions: u64,
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_export() {
        let metrics = Metrics::new();
        metrics.inc_requests();
        metrics.inc_requests();
        metrics.inc_failed();
        metrics.inc_tool_calls();
        metrics.session_opened();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.tool_calls, 1);
        assert_eq!(snapshot.active_sessions, 1);

        let text = metrics.to_prometheus();
        assert!(text.contains("mcp_toolbox_requests_total 2"));
        assert!(text.contains("mcp_toolbox_active_sessions 1"));
    }

    #[test]
    fn test_session_gauge_never_underflows() {
        let metrics = Metrics::new();
        metrics.session_closed();
        assert_eq!(metrics.snapshot().active_sessions, 0);
    }
}
