use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::state::{RecordedAudio, RecorderError};

pub type StopResult = Result<RecordedAudio, RecorderError>;

/// Where the outcome of a stop is delivered
#[derive(Debug)]
pub(crate) enum CompletionTarget {
    /// A caller awaiting `stop()`
    Caller(oneshot::Sender<StopResult>),
    /// Ceiling-triggered stop; queued for `next_auto_stopped()`
    AutoStop(mpsc::UnboundedSender<StopResult>),
}

/// Accepts at most one result per stop, whichever capture callback arrives first
#[derive(Debug, Default)]
pub(crate) struct Completion {
    target: Option<CompletionTarget>,
}

impl Completion {
    pub(crate) fn arm(&mut self, target: CompletionTarget) {
        if self.target.is_some() {
            warn!("Replacing a pending stop completion");
        }
        self.target = Some(target);
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.target.is_some()
    }

    /// Deliver `result`. Returns false if the completion was already resolved.
    pub(crate) fn resolve(&mut self, result: StopResult) -> bool {
        let Some(target) = self.target.take() else {
            debug!("Stop completion already resolved; dropping {:?}", result.as_ref().err());
            return false;
        };

        let delivered = match target {
            CompletionTarget::Caller(tx) => tx.send(result).is_ok(),
            CompletionTarget::AutoStop(tx) => tx.send(result).is_ok(),
        };
        if !delivered {
            debug!("Stop completion receiver dropped");
        }
        true
    }
}
