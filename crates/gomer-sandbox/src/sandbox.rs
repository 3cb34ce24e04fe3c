//! Run and format pipelines for submitted Go source.
//!
//! Run: `Received → WorkspaceCreated → ModuleInitialized → DependenciesResolved
//! → Executing → {Completed | TimedOut | BuildFailed}`. The workspace is owned
//! by the call and dropped on every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gomer_settings::SandboxSettings;
use tracing::{debug, info, instrument, warn};

use crate::errors::SandboxError;
use crate::process::{CommandSpec, ProcessOutcome, ProcessRunner};
use crate::result::{ExecutionReport, ExecutionResult, FormatOutcome, TerminalState};
use crate::workspace::Workspace;

/// Workspace name prefix for runs.
pub const RUN_PREFIX: &str = "gomer-run-";
/// Workspace name prefix for formatting.
pub const FORMAT_PREFIX: &str = "gomer-format-";
/// File the submitted source is written to.
pub const MAIN_FILE: &str = "main.go";

/// Toolchain and deadline configuration.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Go toolchain binary.
    pub go_binary: String,
    /// Formatter binary.
    pub gofmt_binary: String,
    /// Module path passed to `go mod init`.
    pub module_name: String,
    /// Deadline for `go run`.
    pub run_timeout: Duration,
    /// Deadline for `go mod init`, `go mod tidy` and `gofmt`.
    pub resolve_timeout: Duration,
    /// Parent directory for workspaces.
    pub workspace_root: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from(&SandboxSettings::default())
    }
}

impl From<&SandboxSettings> for SandboxConfig {
    fn from(settings: &SandboxSettings) -> Self {
        Self {
            go_binary: settings.go_binary.clone(),
            gofmt_binary: settings.gofmt_binary.clone(),
            module_name: settings.module_name.clone(),
            run_timeout: settings.run_timeout(),
            resolve_timeout: settings.resolve_timeout(),
            workspace_root: settings.workspace_root.as_ref().map(PathBuf::from),
        }
    }
}

/// Executes submitted Go source in per-request workspaces.
pub struct GoSandbox {
    config: SandboxConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl GoSandbox {
    /// Create a sandbox that starts processes through `runner`.
    pub fn new(config: SandboxConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    /// Notice viewers see when a run hits the deadline.
    pub fn timeout_notice(&self) -> String {
        gomer_core::timeout_notice(whole_seconds(self.config.run_timeout))
    }

    /// Build and run `source`.
    ///
    /// Compile errors, failing programs and failed dependency resolution come
    /// back as [`ExecutionResult::Output`]. Only workspace, spawn and module
    /// initialization failures are errors.
    #[instrument(skip_all, fields(source_len = source.len()))]
    pub async fn run(&self, source: &[u8]) -> Result<ExecutionReport, SandboxError> {
        let start = Instant::now();
        let workspace = Workspace::create(RUN_PREFIX, self.config.workspace_root.as_deref())?;
        let _ = workspace.write_source(MAIN_FILE, source)?;

        let init = self
            .go(&workspace, &["mod", "init", self.config.module_name.as_str()])
            .with_deadline(self.config.resolve_timeout);
        match self.runner.run(&init).await? {
            ProcessOutcome::Exited { success: true, .. } => {}
            ProcessOutcome::Exited { output, .. } => {
                warn!(output = %output.trim_end(), "go mod init failed");
                return Err(SandboxError::ModuleInit { output });
            }
            ProcessOutcome::TimedOut { partial_output } => {
                return Err(SandboxError::ModuleInit {
                    output: format!("{partial_output}go mod init did not finish in time"),
                });
            }
        }
        debug!("module initialized");

        let tidy = self
            .go(&workspace, &["mod", "tidy"])
            .with_deadline(self.config.resolve_timeout);
        match self.runner.run(&tidy).await? {
            ProcessOutcome::Exited { success: true, .. } => {}
            ProcessOutcome::Exited { output, .. } => {
                return Ok(finish(start, TerminalState::BuildFailed, ExecutionResult::Output(output)));
            }
            ProcessOutcome::TimedOut { partial_output } => {
                let output = format!(
                    "{partial_output}go mod tidy did not finish within {} seconds",
                    whole_seconds(self.config.resolve_timeout)
                );
                return Ok(finish(start, TerminalState::BuildFailed, ExecutionResult::Output(output)));
            }
        }
        debug!("dependencies resolved");

        let run = self
            .go(&workspace, &["run", "."])
            .with_deadline(self.config.run_timeout);
        let report = match self.runner.run(&run).await? {
            ProcessOutcome::Exited { output, .. } => {
                finish(start, TerminalState::Completed, ExecutionResult::Output(output))
            }
            ProcessOutcome::TimedOut { .. } => {
                finish(start, TerminalState::TimedOut, ExecutionResult::TimedOut)
            }
        };
        Ok(report)
    }

    /// Format `source` with `gofmt`.
    #[instrument(skip_all, fields(source_len = source.len()))]
    pub async fn format(&self, source: &[u8]) -> Result<FormatOutcome, SandboxError> {
        let workspace = Workspace::create(FORMAT_PREFIX, self.config.workspace_root.as_deref())?;
        let _ = workspace.write_source(MAIN_FILE, source)?;

        let spec = CommandSpec::new(&self.config.gofmt_binary, &[MAIN_FILE], workspace.path())
            .with_deadline(self.config.resolve_timeout);
        let outcome = match self.runner.run(&spec).await? {
            ProcessOutcome::Exited {
                success: true,
                output,
                ..
            } => FormatOutcome::Formatted(output),
            ProcessOutcome::Exited { output, .. } => FormatOutcome::Rejected(output),
            ProcessOutcome::TimedOut { .. } => FormatOutcome::Rejected(format!(
                "gofmt did not finish within {} seconds",
                whole_seconds(self.config.resolve_timeout)
            )),
        };
        debug!(formatted = matches!(outcome, FormatOutcome::Formatted(_)), "format finished");
        Ok(outcome)
    }

    fn go(&self, workspace: &Workspace, args: &[&str]) -> CommandSpec {
        CommandSpec::new(&self.config.go_binary, args, workspace.path())
    }
}

fn finish(start: Instant, state: TerminalState, result: ExecutionResult) -> ExecutionReport {
    let elapsed = start.elapsed();
    info!(
        state = state.as_str(),
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "sandbox run finished"
    );
    ExecutionReport {
        state,
        result,
        elapsed,
    }
}

/// Deadline rounded up to whole seconds, for viewer-facing text.
fn whole_seconds(d: Duration) -> u64 {
    d.as_millis().div_ceil(1000).try_into().unwrap_or(u64::MAX)
}
