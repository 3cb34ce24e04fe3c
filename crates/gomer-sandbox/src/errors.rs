//! Sandbox error types.
//!
//! Only failures that leave the sandbox unable to produce viewer output live
//! here. Compile errors, failing programs and timeouts are results, not errors.

use std::io;

use thiserror::Error;

/// System faults raised before or around program execution.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The per-request workspace directory could not be allocated.
    #[error("failed to create workspace: {0}")]
    Workspace(#[source] io::Error),

    /// Writing the submitted source into the workspace failed.
    #[error("failed to write {file}: {source}")]
    WriteSource {
        /// File name inside the workspace.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A toolchain binary could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Waiting on a spawned process failed.
    #[error("failed waiting on {program}: {source}")]
    Wait {
        /// Program being waited on.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// `go mod init` did not produce a build unit.
    #[error("module initialization failed: {output}")]
    ModuleInit {
        /// Captured toolchain output.
        output: String,
    },
}
