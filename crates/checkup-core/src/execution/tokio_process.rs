use std::io;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::execution::{
    CommandSpec, ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput,
    ProcessSpawnRequest, ProcessWaitFuture, RunningProcess,
};
use crate::models::{CoreError, CoreErrorKind, SourceId};

/// How long to keep reading pipes after the child exits. A descendant that
/// still holds them open after this fails the run, since its output is cut.
const PIPE_GRACE: Duration = Duration::from_millis(250);
const REAP_GRACE: Duration = Duration::from_secs(1);

/// Spawns commands with tokio, each in its own process group.
pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        tracing::debug!(source = %request.source, command = %request.command, "running package manager");

        let child = command_for(&request.command).spawn().map_err(|error| {
            let kind = match error.kind() {
                io::ErrorKind::NotFound => CoreErrorKind::NotInstalled,
                _ => CoreErrorKind::ProcessFailure,
            };
            CoreError::for_source(
                request.source,
                kind,
                format!("cannot run '{}': {error}", request.command.program.display()),
            )
        })?;

        Ok(Box::new(TokioChild {
            pid: child.id(),
            child: Mutex::new(Some(child)),
            source: request.source,
            timeout: request.timeout,
            started: Instant::now(),
        }))
    }
}

fn command_for(spec: &CommandSpec) -> Command {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    command
}

struct TokioChild {
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    source: SourceId,
    timeout: Option<Duration>,
    started: Instant,
}

impl RunningProcess for TokioChild {
    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let TokioChild {
            child,
            pid,
            source,
            timeout,
            started,
        } = *self;
        let child = child.into_inner().ok().flatten();

        Box::pin(async move {
            let mut child =
                child.ok_or_else(|| failure(source, "process was already waited on".into()))?;
            let stdout = tokio::spawn(drain(child.stdout.take()));
            let stderr = tokio::spawn(drain(child.stderr.take()));

            let exited = match timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(exited) => exited,
                    Err(_) => {
                        if let Some(pid) = pid {
                            let _ = kill_group(pid);
                        }
                        let _ = tokio::time::timeout(REAP_GRACE, child.wait()).await;
                        stdout.abort();
                        stderr.abort();
                        return Err(failure(
                            source,
                            format!("process timed out after {}ms", limit.as_millis()),
                        ));
                    }
                },
                None => child.wait().await,
            }
            .map_err(|error| failure(source, format!("cannot wait for process: {error}")))?;

            let status = exited
                .code()
                .map_or(ProcessExitStatus::Signaled, ProcessExitStatus::Exited);

            let stdout = collect(stdout, "stdout").await;
            let stderr = collect(stderr, "stderr").await;
            let (stdout, stderr) = match (stdout, stderr) {
                (Ok(stdout), Ok(stderr)) => (stdout, stderr),
                (Err(message), _) | (_, Err(message)) => {
                    if let Some(pid) = pid {
                        let _ = kill_group(pid);
                    }
                    return Err(failure(source, message));
                }
            };

            Ok(ProcessOutput {
                status,
                stdout,
                stderr,
                elapsed: started.elapsed(),
            })
        })
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buffer).await;
    }
    buffer
}

async fn collect(mut reader: JoinHandle<Vec<u8>>, pipe: &str) -> Result<Vec<u8>, String> {
    match tokio::time::timeout(PIPE_GRACE, &mut reader).await {
        Ok(Ok(buffer)) => Ok(buffer),
        Ok(Err(error)) => Err(format!("cannot read {pipe}: {error}")),
        Err(_) => {
            reader.abort();
            Err(format!(
                "{pipe} still open {}ms after exit; a child process kept it",
                PIPE_GRACE.as_millis()
            ))
        }
    }
}

fn kill_group(pid: u32) -> io::Result<()> {
    // SAFETY: kill(2) only reads its arguments.
    let result = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if result == 0 {
        return Ok(());
    }
    let error = io::Error::last_os_error();
    match error.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        _ => Err(error),
    }
}

fn failure(source: SourceId, message: String) -> CoreError {
    CoreError::for_source(source, CoreErrorKind::ProcessFailure, message)
}
