//! Wires viewer edits and run/format requests to the document, sandbox and
//! broadcaster.

use std::sync::Arc;

use gomer_core::{ConnectionId, Envelope, FORMAT_SUCCESS_NOTICE};
use gomer_sandbox::{ExecutionReport, FormatOutcome, GoSandbox, SandboxError};
use metrics::{counter, histogram};
use tracing::{info, instrument, warn};

use crate::document::SharedDocument;
use crate::metrics::{
    CODE_UPDATES_TOTAL, FORMAT_REQUESTS_TOTAL, SANDBOX_ERRORS_TOTAL, SANDBOX_RUN_DURATION_SECONDS,
    SANDBOX_RUNS_TOTAL,
};
use crate::websocket::broadcast::{BroadcastError, BroadcastReport, Broadcaster};
use crate::websocket::connection::{ClientConnection, SendError};
use crate::websocket::registry::ConnectionRegistry;

/// The one place shared state is mutated.
pub struct SessionCoordinator {
    registry: Arc<ConnectionRegistry>,
    document: Arc<SharedDocument>,
    broadcaster: Broadcaster,
    sandbox: Arc<GoSandbox>,
}

impl SessionCoordinator {
    /// Coordinate over a fresh registry and a document holding `initial_code`.
    pub fn new(sandbox: Arc<GoSandbox>, initial_code: impl Into<String>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            document: Arc::new(SharedDocument::new(initial_code)),
            sandbox,
        }
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The shared buffer.
    pub fn document(&self) -> &Arc<SharedDocument> {
        &self.document
    }

    /// The sandbox used for `/run` and `/format`.
    pub fn sandbox(&self) -> &Arc<GoSandbox> {
        &self.sandbox
    }

    /// Register a viewer and queue the current buffer as its first frame.
    ///
    /// The viewer is registered before the buffer is read, and the frame is
    /// queued while the document read lock is held. An edit therefore either
    /// lands before the read, or its broadcast is queued after the catch-up
    /// frame. Either way the viewer ends on the latest buffer.
    pub fn connect(&self, connection: Arc<ClientConnection>) -> Result<(), SendError> {
        self.registry.add(connection.clone());
        self.document.with_current(|code| {
            let json = serde_json::to_string(&Envelope::code_update(code))
                .map_err(|e| SendError::Aborted(e.to_string()))?;
            connection.try_send(Arc::new(json))
        })
    }

    /// Unregister a viewer. Later broadcasts no longer reach it.
    pub fn disconnect(&self, id: &ConnectionId) {
        let _ = self.registry.remove(id);
    }

    /// Apply a viewer's edit and relay the buffer to every other viewer.
    #[instrument(skip_all, fields(connection_id = %from, len = code.len()))]
    pub async fn code_update(
        &self,
        from: &ConnectionId,
        code: String,
    ) -> Result<BroadcastReport, BroadcastError> {
        let version = self.document.set(code);
        counter!(CODE_UPDATES_TOTAL).increment(1);
        let current = Envelope::code_update(self.document.get());
        let result = self.broadcaster.broadcast(&current, Some(from)).await;
        log_broadcast("codeUpdate", version, &result);
        result
    }

    /// Build and run `source`, broadcasting the output to every viewer.
    ///
    /// The document is not touched. System faults come back as errors and
    /// are not broadcast.
    #[instrument(skip_all, fields(len = source.len()))]
    pub async fn run(&self, source: &[u8]) -> Result<ExecutionReport, SandboxError> {
        let report = self.sandbox.run(source).await.inspect_err(|e| {
            counter!(SANDBOX_ERRORS_TOTAL, "op" => "run").increment(1);
            warn!(error = %e, "run failed before producing output");
        })?;
        counter!(SANDBOX_RUNS_TOTAL, "state" => report.state.as_str()).increment(1);
        histogram!(SANDBOX_RUN_DURATION_SECONDS).record(report.elapsed.as_secs_f64());

        let text = report.result.clone().into_viewer_text(&self.sandbox.timeout_notice());
        let result = self.broadcaster.broadcast(&Envelope::run_result(text), None).await;
        log_broadcast("runResult", self.document.version(), &result);
        Ok(report)
    }

    /// Format `source`. On success the document takes the formatted text and
    /// every viewer gets it plus a success notice; on failure every viewer gets
    /// the diagnostic and the document is unchanged.
    #[instrument(skip_all, fields(len = source.len()))]
    pub async fn format(&self, source: &[u8]) -> Result<FormatOutcome, SandboxError> {
        let outcome = self.sandbox.format(source).await.inspect_err(|e| {
            counter!(SANDBOX_ERRORS_TOTAL, "op" => "format").increment(1);
            warn!(error = %e, "format failed before producing output");
        })?;

        match &outcome {
            FormatOutcome::Formatted(text) => {
                counter!(FORMAT_REQUESTS_TOTAL, "outcome" => "formatted").increment(1);
                let version = self.document.set(text.clone());
                let update = Envelope::code_update(self.document.get());
                let result = self.broadcaster.broadcast(&update, None).await;
                log_broadcast("codeUpdate", version, &result);
                let result = self
                    .broadcaster
                    .broadcast(&Envelope::run_result(FORMAT_SUCCESS_NOTICE), None)
                    .await;
                log_broadcast("runResult", version, &result);
            }
            FormatOutcome::Rejected(diagnostic) => {
                counter!(FORMAT_REQUESTS_TOTAL, "outcome" => "rejected").increment(1);
                let result = self
                    .broadcaster
                    .broadcast(&Envelope::run_result(diagnostic.clone()), None)
                    .await;
                log_broadcast("runResult", self.document.version(), &result);
            }
        }
        Ok(outcome)
    }
}

fn log_broadcast(kind: &str, version: u64, result: &Result<BroadcastReport, BroadcastError>) {
    match result {
        Ok(report) => info!(kind, version, delivered = report.delivered, "broadcast sent"),
        Err(e) => warn!(kind, version, error = %e, "broadcast incomplete"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gomer_core::TIMEOUT_NOTICE;
    use gomer_sandbox::testing::ScriptedRunner;
    use gomer_sandbox::{ProcessOutcome, SandboxConfig, TerminalState};
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;

    fn exited(success: bool, output: &str) -> Result<ProcessOutcome, String> {
        Ok(ProcessOutcome::Exited {
            success,
            code: Some(i32::from(!success)),
            output: output.into(),
        })
    }

    fn coordinator(steps: Vec<Result<ProcessOutcome, String>>) -> SessionCoordinator {
        let runner = Arc::new(ScriptedRunner::new(steps));
        let sandbox = Arc::new(GoSandbox::new(SandboxConfig::default(), runner));
        SessionCoordinator::new(sandbox, "package main")
    }

    async fn viewer(
        coord: &SessionCoordinator,
        id: &str,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(ClientConnection::new(id.into(), tx, Duration::from_millis(100)));
        coord.connect(conn.clone()).unwrap();
        (conn, rx)
    }

    fn next(rx: &mut mpsc::Receiver<Arc<String>>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn connect_sends_catch_up_to_new_viewer_only() {
        let coord = coordinator(vec![]);
        let (_a, mut rx_a) = viewer(&coord, "a").await;
        assert_eq!(next(&mut rx_a)["data"]["goCode"], "package main");

        let (_b, mut rx_b) = viewer(&coord, "b").await;
        assert_eq!(next(&mut rx_b)["type"], "codeUpdate");
        assert!(rx_a.try_recv().is_err());
        assert_eq!(coord.registry().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn viewers_joining_during_edits_end_on_latest_buffer() {
        let coord = Arc::new(coordinator(vec![]));
        let editor = ConnectionId::from("editor");
        let writer = {
            let coord = coord.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let _ = coord.code_update(&editor, format!("package main // {i}")).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut viewers = Vec::new();
        for i in 0..40 {
            let (tx, rx) = mpsc::channel(512);
            let conn = Arc::new(ClientConnection::new(
                format!("v{i}").as_str().into(),
                tx,
                Duration::from_secs(1),
            ));
            coord.connect(conn.clone()).unwrap();
            viewers.push((conn, rx));
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let latest = coord.document().get();
        for (conn, mut rx) in viewers {
            let mut last = None;
            while let Ok(frame) = rx.try_recv() {
                last = Some(frame);
            }
            let last: Value = serde_json::from_str(&last.unwrap()).unwrap();
            assert_eq!(last["data"]["goCode"], latest.as_str(), "viewer {} is stale", conn.id);
        }
    }

    #[test]
    fn catch_up_on_full_queue_is_reported() {
        let coord = coordinator(vec![]);
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(Arc::new("occupied".into())).unwrap();
        let conn = Arc::new(ClientConnection::new("a".into(), tx, Duration::from_millis(10)));
        assert_eq!(coord.connect(conn), Err(SendError::Full));
        assert_eq!(coord.registry().len(), 1);
    }

    #[tokio::test]
    async fn edit_reaches_others_but_not_sender() {
        let coord = coordinator(vec![]);
        let (a, mut rx_a) = viewer(&coord, "a").await;
        let (_b, mut rx_b) = viewer(&coord, "b").await;
        let (_c, mut rx_c) = viewer(&coord, "c").await;
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            let _ = next(rx);
        }

        let report = coord.code_update(&a.id, "package main // v2".into()).await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(coord.document().get(), "package main // v2");
        assert_eq!(coord.document().version(), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(next(&mut rx_b)["data"]["goCode"], "package main // v2");
        assert_eq!(next(&mut rx_c)["data"]["goCode"], "package main // v2");
    }

    #[tokio::test]
    async fn disconnected_viewer_is_skipped() {
        let coord = coordinator(vec![]);
        let (a, mut rx_a) = viewer(&coord, "a").await;
        let (b, _rx_b) = viewer(&coord, "b").await;
        let (_c, mut rx_c) = viewer(&coord, "c").await;
        let _ = next(&mut rx_a);
        let _ = next(&mut rx_c);

        coord.disconnect(&b.id);
        let report = coord.code_update(&a.id, "x".into()).await.unwrap();
        assert_eq!(report.recipients, 1);
        assert_eq!(next(&mut rx_c)["data"]["goCode"], "x");
    }

    #[tokio::test]
    async fn run_broadcasts_output_to_everyone() {
        let coord = coordinator(vec![exited(true, ""), exited(true, ""), exited(true, "hi\n")]);
        let (_a, mut rx_a) = viewer(&coord, "a").await;
        let _ = next(&mut rx_a);

        let report = coord.run(b"package main").await.unwrap();
        assert_eq!(report.state, TerminalState::Completed);
        let frame = next(&mut rx_a);
        assert_eq!(frame["type"], "runResult");
        assert_eq!(frame["data"]["output"], "hi\n");
        assert_eq!(coord.document().version(), 0);
    }

    #[tokio::test]
    async fn timeout_broadcasts_notice() {
        let coord = coordinator(vec![
            exited(true, ""),
            exited(true, ""),
            Ok(ProcessOutcome::TimedOut {
                partial_output: "spinning".into(),
            }),
        ]);
        let (_a, mut rx_a) = viewer(&coord, "a").await;
        let _ = next(&mut rx_a);

        let report = coord.run(b"package main").await.unwrap();
        assert_eq!(report.state, TerminalState::TimedOut);
        assert_eq!(next(&mut rx_a)["data"]["output"], TIMEOUT_NOTICE);
    }

    #[tokio::test]
    async fn system_fault_is_not_broadcast() {
        let coord = coordinator(vec![exited(false, "go: bad module")]);
        let (_a, mut rx_a) = viewer(&coord, "a").await;
        let _ = next(&mut rx_a);

        let err = coord.run(b"package main").await.unwrap_err();
        assert!(matches!(err, SandboxError::ModuleInit { .. }));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn format_success_updates_document_and_notifies() {
        let coord = coordinator(vec![exited(true, "package main\n")]);
        let (_a, mut rx_a) = viewer(&coord, "a").await;
        let _ = next(&mut rx_a);

        let outcome = coord.format(b"package   main").await.unwrap();
        assert_eq!(outcome, FormatOutcome::Formatted("package main\n".into()));
        assert_eq!(coord.document().get(), "package main\n");

        let update = next(&mut rx_a);
        assert_eq!(update["type"], "codeUpdate");
        assert_eq!(update["data"]["goCode"], "package main\n");
        let notice = next(&mut rx_a);
        assert_eq!(notice["data"]["output"], FORMAT_SUCCESS_NOTICE);
    }

    #[tokio::test]
    async fn format_failure_leaves_document() {
        let coord = coordinator(vec![exited(false, "main.go:1:1: expected 'package'\n")]);
        let (_a, mut rx_a) = viewer(&coord, "a").await;
        let _ = next(&mut rx_a);

        let _ = coord.format(b"garbage").await.unwrap();
        assert_eq!(coord.document().get(), "package main");
        assert_eq!(coord.document().version(), 0);
        let frame = next(&mut rx_a);
        assert_eq!(frame["type"], "runResult");
        assert_eq!(frame["data"]["output"], "main.go:1:1: expected 'package'\n");
        assert!(rx_a.try_recv().is_err());
    }
}
