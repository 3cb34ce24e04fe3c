//! # gomer
//!
//! Collaborative Go playground: one shared buffer, many viewers, sandboxed
//! `go run` and `gofmt` with results pushed to everyone.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gomer_sandbox::{GoSandbox, SandboxConfig, TokioProcessRunner};
use gomer_server::metrics::install_recorder;
use gomer_server::{GomerServer, ServerConfig, SessionCoordinator};
use gomer_settings::GomerSettings;

/// Collaborative Go playground server.
#[derive(Parser, Debug)]
#[command(name = "gomer", about = "Collaborative Go playground server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.gomer/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Directory of static assets to serve.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Go toolchain binary.
    #[arg(long)]
    go_binary: Option<String>,

    /// Skip installing the Prometheus recorder.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    /// Load settings and layer the flags on top.
    fn resolve_settings(&self) -> Result<GomerSettings> {
        let mut settings = match &self.settings {
            Some(path) => gomer_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => gomer_settings::load_settings().context("Failed to load settings")?,
        };
        self.apply(&mut settings);
        Ok(settings)
    }

    fn apply(&self, settings: &mut GomerSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = &self.static_dir {
            settings.server.static_dir = Some(dir.to_string_lossy().into_owned());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(go) = &self.go_binary {
            settings.sandbox.go_binary.clone_from(go);
        }
    }
}

/// Wire sandbox, coordinator and server from resolved settings.
fn build_server(settings: &GomerSettings) -> GomerServer {
    let sandbox = GoSandbox::new(
        SandboxConfig::from(&settings.sandbox),
        Arc::new(TokioProcessRunner),
    );
    let coordinator = Arc::new(SessionCoordinator::new(
        Arc::new(sandbox),
        settings.document.initial_code.clone(),
    ));
    GomerServer::new(ServerConfig::from(&settings.server), coordinator)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.resolve_settings()?;

    gomer_core::logging::init_subscriber(&settings.logging.level);

    let mut server = build_server(&settings);
    if !cli.no_metrics {
        let handle = install_recorder().context("Failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let addr = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        run_timeout_ms = settings.sandbox.run_timeout_ms,
        go = %settings.sandbox.go_binary,
        "gomer listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(None).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
