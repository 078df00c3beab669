use std::sync::Arc;

use crate::execution::ProcessExecutor;
use crate::sources::pacman::{PacmanSource, checkupdates_request};
use crate::sources::process_utils::run_and_collect_stdout;
use crate::sources::SourceResult;

/// `checkupdates` exits with 2 when nothing is pending.
const CHECKUPDATES_SUCCESS_CODES: &[i32] = &[0, 2];

pub struct ProcessPacmanSource {
    executor: Arc<dyn ProcessExecutor>,
}

impl ProcessPacmanSource {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self { executor }
    }
}

impl PacmanSource for ProcessPacmanSource {
    fn check_updates(&self) -> SourceResult<String> {
        run_and_collect_stdout(
            self.executor.as_ref(),
            checkupdates_request(),
            CHECKUPDATES_SUCCESS_CODES,
        )
    }
}
