//! Running package manager commands.
//!
//! Sources describe what to run with a [`ProcessSpawnRequest`]; a
//! [`ProcessExecutor`] turns that into a [`RunningProcess`]. Tests swap in
//! executors that answer with canned output.

pub mod tokio_process;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind, SourceId};

pub use tokio_process::TokioProcessExecutor;

pub type ExecutionResult<T> = Result<T, CoreError>;

pub type ProcessWaitFuture = Pin<Box<dyn Future<Output = ExecutionResult<ProcessOutput>> + Send>>;

/// Program, arguments and extra environment of one invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn problem(&self) -> Option<&'static str> {
        if self.program.as_os_str().is_empty() {
            return Some("program path is empty");
        }
        if self.args.iter().any(|arg| arg.is_empty() || arg.contains('\0')) {
            return Some("arguments must be non-empty and free of NUL bytes");
        }
        let bad_env = self
            .env
            .iter()
            .any(|(key, value)| key.is_empty() || key.contains(['\0', '=']) || value.contains('\0'));
        bad_env.then_some("environment entries must be well formed and free of NUL bytes")
    }
}

impl Display for CommandSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessSpawnRequest {
    pub source: SourceId,
    pub command: CommandSpec,
    /// Refreshes run without one; a stuck package manager stalls them.
    pub timeout: Option<Duration>,
}

impl ProcessSpawnRequest {
    pub fn new(source: SourceId, command: CommandSpec) -> Self {
        Self {
            source,
            command,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        let problem = self.command.problem().or_else(|| {
            self.timeout
                .is_some_and(|timeout| timeout.is_zero())
                .then_some("timeout must be greater than zero")
        });

        match problem {
            Some(problem) => Err(CoreError::for_source(
                self.source,
                CoreErrorKind::InvalidInput,
                format!("refusing to run '{}': {problem}", self.command),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    Exited(i32),
    /// Killed by a signal, so there is no exit code.
    Signaled,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

pub trait RunningProcess: Send + Sync {
    fn wait(self: Box<Self>) -> ProcessWaitFuture;
}

pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>>;
}

pub fn spawn_validated(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<Box<dyn RunningProcess>> {
    request.validate()?;
    executor.spawn(request)
}
