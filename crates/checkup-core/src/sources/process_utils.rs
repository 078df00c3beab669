use crate::execution::{
    ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest, spawn_validated,
};
use crate::models::{CoreError, CoreErrorKind};
use crate::sources::SourceResult;

/// Runs a package manager command to completion and returns its stdout.
///
/// `success_codes` lists the exit codes that mean the command worked; several
/// package managers use non-zero codes to signal "no updates" or "updates
/// available".
pub(crate) fn run_and_collect_stdout(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
    success_codes: &[i32],
) -> SourceResult<String> {
    let source = request.source;

    let process = spawn_validated(executor, request)?;

    let handle = tokio::runtime::Handle::current();
    let output: ProcessOutput = handle.block_on(process.wait())?;

    match output.status {
        ProcessExitStatus::Exited(code) if success_codes.contains(&code) => {
            String::from_utf8(output.stdout).map_err(|error| {
                CoreError::for_source(
                    source,
                    CoreErrorKind::ParseFailure,
                    format!("process stdout is not valid UTF-8: {error}"),
                )
            })
        }
        ProcessExitStatus::Exited(code) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(CoreError::for_source(
                source,
                CoreErrorKind::ProcessFailure,
                format!("process exited with code {code}: {}", stderr.trim()),
            ))
        }
        ProcessExitStatus::Signaled => Err(CoreError::for_source(
            source,
            CoreErrorKind::ProcessFailure,
            "process was killed by a signal",
        )),
    }
}
