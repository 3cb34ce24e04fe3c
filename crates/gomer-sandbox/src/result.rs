//! Sandbox outcomes.

use std::time::Duration;

/// What a run produced for the viewers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Combined output of the build or the program. May be empty.
    Output(String),
    /// The run deadline elapsed; no output is reported.
    TimedOut,
}

impl ExecutionResult {
    /// Text to broadcast, substituting `timeout_notice` for a timed-out run.
    pub fn into_viewer_text(self, timeout_notice: &str) -> String {
        match self {
            Self::Output(text) => text,
            Self::TimedOut => timeout_notice.to_owned(),
        }
    }
}

/// Where the pipeline stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalState {
    /// The program ran to completion (successfully or not) within the deadline.
    Completed,
    /// The program was killed at the deadline.
    TimedOut,
    /// Dependency resolution failed; the program never ran.
    BuildFailed,
}

impl TerminalState {
    /// Lowercase label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::BuildFailed => "build_failed",
        }
    }
}

/// Result of one sandbox run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Terminal pipeline state.
    pub state: TerminalState,
    /// Output or timeout marker.
    pub result: ExecutionResult,
    /// Wall time of the whole pipeline.
    pub elapsed: Duration,
}

/// Result of formatting a buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatOutcome {
    /// Canonical formatting of the submitted source.
    Formatted(String),
    /// The formatter refused the source; carries its diagnostic.
    Rejected(String),
}
