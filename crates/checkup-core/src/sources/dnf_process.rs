use std::sync::Arc;

use crate::execution::ProcessExecutor;
use crate::sources::dnf::{DnfSource, dnf_check_update_request};
use crate::sources::process_utils::run_and_collect_stdout;
use crate::sources::SourceResult;

/// `check-update` exits with 100 when updates are available.
const CHECK_UPDATE_SUCCESS_CODES: &[i32] = &[0, 100];

pub struct ProcessDnfSource {
    executor: Arc<dyn ProcessExecutor>,
}

impl ProcessDnfSource {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self { executor }
    }
}

impl DnfSource for ProcessDnfSource {
    fn check_update(&self) -> SourceResult<String> {
        match run_and_collect_stdout(
            self.executor.as_ref(),
            dnf_check_update_request("dnf"),
            CHECK_UPDATE_SUCCESS_CODES,
        ) {
            Ok(output) => Ok(output),
            Err(dnf_error) => {
                tracing::debug!(error = %dnf_error, "dnf check-update failed, trying yum");
                run_and_collect_stdout(
                    self.executor.as_ref(),
                    dnf_check_update_request("yum"),
                    CHECK_UPDATE_SUCCESS_CODES,
                )
            }
        }
    }
}
