use std::path::PathBuf;
use std::sync::Arc;

use crate::execution::ProcessExecutor;
use crate::sources::aur::{AurHelper, AurSource, aur_pending_request};
use crate::sources::detect_utils::which_executable;
use crate::sources::process_utils::run_and_collect_stdout;
use crate::sources::SourceResult;

pub struct ProcessAurSource {
    executor: Arc<dyn ProcessExecutor>,
    helper: AurHelper,
    executable: Option<PathBuf>,
}

impl ProcessAurSource {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        helper: AurHelper,
        executable: Option<PathBuf>,
    ) -> Self {
        Self {
            executor,
            helper,
            executable,
        }
    }
}

impl AurSource for ProcessAurSource {
    fn helper(&self) -> AurHelper {
        self.helper
    }

    fn pending_aur_updates(&self) -> SourceResult<String> {
        run_and_collect_stdout(
            self.executor.as_ref(),
            aur_pending_request(self.executable.clone(), self.helper),
            self.helper.success_codes(),
        )
    }
}

/// Finds an installed AUR helper. When `preferred` names a helper only that
/// one is considered.
pub fn detect_aur_helper(preferred: Option<AurHelper>) -> Option<(AurHelper, PathBuf)> {
    for helper in AurHelper::ALL {
        let Some(path) = which_executable(helper.binary_name(), &[]) else {
            continue;
        };
        if let Some(wanted) = preferred
            && wanted != helper
        {
            tracing::info!(
                available = helper.binary_name(),
                requested = wanted.binary_name(),
                "skipping AUR helper that was not requested"
            );
            continue;
        }
        return Some((helper, path));
    }
    None
}
