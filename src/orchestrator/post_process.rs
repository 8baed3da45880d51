//! What happens after a run has been finalized.

use super::dispatcher::FollowUp;
use super::session::Window;
use crate::markup;
use crate::model::{ActionRequest, Notice};
use crate::runner::{RunCompletion, RunOutcome};

/// Snapshot refreshes requested by a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Refresh {
    Available,
    /// Re-query installed packages, then report how `settle` ended up.
    Installed { settle: Option<ActionRequest> },
}

/// Result of post-run processing, ready for the controller to apply.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ProcessedRun {
    pub notices: Vec<Notice>,
    /// Bring the console to the foreground.
    pub raise: bool,
    pub refresh: Vec<Refresh>,
    /// A successful unattended sync: the application should exit.
    pub exit: bool,
}

pub(crate) fn process_run_completion(run: &RunCompletion<FollowUp>, window: Window) -> ProcessedRun {
    let mut out = ProcessedRun::default();
    match &run.outcome {
        RunOutcome::HardFailure { code } => {
            let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            out.notices
                .push(Notice::persistent_error(format!("error: {code} {}", run.command)));
            out.raise = true;
        }
        RunOutcome::SoftFailure { stderr } => {
            out.notices
                .push(Notice::error(markup::strip_ansi(stderr).trim().to_string()));
        }
        RunOutcome::Success => match &run.after {
            FollowUp::Synced => {
                out.notices.push(Notice::success("synchronized"));
                out.refresh.push(Refresh::Available);
                out.refresh.push(Refresh::Installed { settle: None });
                out.exit = run.slot.is_sync() && window == Window::Hidden;
            }
            FollowUp::Settle(request) => {
                out.refresh.push(Refresh::Installed {
                    settle: Some(request.clone()),
                });
            }
        },
    }
    out
}
