//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup; the handle renders `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Viewer connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Viewer connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open viewer connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Viewer connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections refused at the limit (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Broadcasts started (counter, labels: kind).
pub const BROADCASTS_TOTAL: &str = "broadcasts_total";
/// Per-viewer send failures during broadcast (counter).
pub const WS_SEND_FAILURES_TOTAL: &str = "ws_send_failures_total";
/// Buffer edits received from viewers (counter).
pub const CODE_UPDATES_TOTAL: &str = "code_updates_total";
/// Sandbox runs finished (counter, labels: state).
pub const SANDBOX_RUNS_TOTAL: &str = "sandbox_runs_total";
/// Sandbox run wall time (histogram).
pub const SANDBOX_RUN_DURATION_SECONDS: &str = "sandbox_run_duration_seconds";
/// Format requests finished (counter, labels: outcome).
pub const FORMAT_REQUESTS_TOTAL: &str = "format_requests_total";
/// Run or format requests that failed with a system error (counter, labels: op).
pub const SANDBOX_ERRORS_TOTAL: &str = "sandbox_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_recorder_renders() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(BROADCASTS_TOTAL, "kind" => "runResult").increment(2);
        });
        assert!(handle.render().contains("broadcasts_total{kind=\"runResult\"} 2"));
    }

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_CONNECTIONS_REJECTED_TOTAL,
            BROADCASTS_TOTAL,
            WS_SEND_FAILURES_TOTAL,
            CODE_UPDATES_TOTAL,
            SANDBOX_RUNS_TOTAL,
            SANDBOX_RUN_DURATION_SECONDS,
            FORMAT_REQUESTS_TOTAL,
            SANDBOX_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} is not snake_case"
            );
        }
    }
}
