//! # gomer-sandbox
//!
//! Turns untrusted Go source into an isolated, time-bounded run.
//!
//! Each request gets a fresh [`Workspace`] (a temp directory removed on drop),
//! is initialized as a self-contained module, has its dependencies resolved,
//! and is executed under a wall-clock deadline. Build and runtime failures come
//! back as output for the viewer; only filesystem and spawn failures are
//! [`SandboxError`]s.
//!
//! Processes are started through the [`ProcessRunner`] trait so the pipelines
//! can be driven by scripted runners in tests.

#![deny(unsafe_code)]

pub mod errors;
pub mod process;
pub mod result;
pub mod sandbox;
pub mod testing;
pub mod workspace;

pub use errors::SandboxError;
pub use process::{CommandSpec, ProcessOutcome, ProcessRunner, TokioProcessRunner};
pub use result::{ExecutionReport, ExecutionResult, FormatOutcome, TerminalState};
pub use sandbox::{GoSandbox, SandboxConfig};
pub use workspace::Workspace;
