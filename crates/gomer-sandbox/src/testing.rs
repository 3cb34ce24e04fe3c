//! Scripted [`ProcessRunner`] for driving the pipelines without a Go toolchain.

use std::collections::VecDeque;
use std::io;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::SandboxError;
use crate::process::{CommandSpec, ProcessOutcome, ProcessRunner};

/// Scripted step: an outcome, or `Err(program)` to simulate a spawn failure.
pub type Step = Result<ProcessOutcome, String>;

/// What the runner observed for one invocation.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    /// The command as passed in.
    pub spec: CommandSpec,
    /// Whether the working directory existed when the call was made.
    pub dir_existed: bool,
    /// Contents of `main.go` in the working directory, if present.
    pub main_go: Option<Vec<u8>>,
}

/// Replays scripted outcomes in order and records every call.
///
/// Once the script is exhausted every call exits successfully with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    /// Runner that replays `steps`.
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutcome, SandboxError> {
        self.calls.lock().push(RecordedCall {
            spec: spec.clone(),
            dir_existed: spec.working_dir.is_dir(),
            main_go: std::fs::read(spec.working_dir.join("main.go")).ok(),
        });
        let step = self.steps.lock().pop_front();
        match step {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(program)) => Err(SandboxError::Spawn {
                program,
                source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
            }),
            None => Ok(ProcessOutcome::Exited {
                success: true,
                code: Some(0),
                output: String::new(),
            }),
        }
    }
}
