//! Wire envelope exchanged with viewers over the persistent connection.
//!
//! Every server → viewer frame is an adjacently tagged JSON object:
//!
//! ```json
//! { "type": "codeUpdate", "data": { "goCode": "package main ..." } }
//! { "type": "runResult",  "data": { "output": "hi\n" } }
//! ```
//!
//! Viewers may send either the full `codeUpdate` envelope or the bare
//! `{"goCode": ...}` payload; both replace the shared buffer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Run deadline the stock timeout notice refers to, in seconds.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 10;

/// Notice broadcast instead of program output when a run exceeds its deadline.
pub const TIMEOUT_NOTICE: &str = "Program took more than 10 seconds to run. Time's up.";

/// Notice broadcast after the buffer was reformatted.
pub const FORMAT_SUCCESS_NOTICE: &str = "Code formatted successfully";

/// Timeout notice for an arbitrary run deadline.
///
/// Returns [`TIMEOUT_NOTICE`] verbatim for the default 10 second deadline.
pub fn timeout_notice(deadline_secs: u64) -> String {
    if deadline_secs == DEFAULT_RUN_TIMEOUT_SECS {
        TIMEOUT_NOTICE.to_owned()
    } else {
        format!("Program took more than {deadline_secs} seconds to run. Time's up.")
    }
}

/// Full buffer replacement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdate {
    /// The complete source buffer (not a diff).
    pub go_code: String,
}

/// Output of a sandbox run, or a fixed notice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Combined stdout/stderr, the timeout notice, or a formatter diagnostic.
    pub output: String,
}

/// Tagged message envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Envelope {
    /// The shared buffer changed.
    CodeUpdate(CodeUpdate),
    /// A run (or format) finished.
    RunResult(RunResult),
}

impl Envelope {
    /// Build a `codeUpdate` envelope.
    pub fn code_update(go_code: impl Into<String>) -> Self {
        Self::CodeUpdate(CodeUpdate {
            go_code: go_code.into(),
        })
    }

    /// Build a `runResult` envelope.
    pub fn run_result(output: impl Into<String>) -> Self {
        Self::RunResult(RunResult {
            output: output.into(),
        })
    }

    /// Wire name of the message kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CodeUpdate(_) => "codeUpdate",
            Self::RunResult(_) => "runResult",
        }
    }
}

/// A decoded viewer frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// The viewer replaced the buffer.
    CodeUpdate(String),
    /// A well-formed frame the server does not act on (e.g. an echoed `runResult`).
    Ignored(&'static str),
}

/// A viewer frame that could not be decoded.
#[derive(Debug, Error)]
#[error("malformed viewer message: {0}")]
pub struct InboundError(#[from] serde_json::Error);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInbound {
    Envelope(Envelope),
    Bare(CodeUpdate),
}

/// Decode a text frame received from a viewer.
pub fn parse_inbound(text: &str) -> Result<Inbound, InboundError> {
    let raw: RawInbound = serde_json::from_str(text)?;
    Ok(match raw {
        RawInbound::Envelope(Envelope::CodeUpdate(update)) | RawInbound::Bare(update) => {
            Inbound::CodeUpdate(update.go_code)
        }
        RawInbound::Envelope(envelope @ Envelope::RunResult(_)) => Inbound::Ignored(envelope.kind()),
    })
}
