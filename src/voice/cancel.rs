use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What ended a request early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Deadline,
    Caller,
}

/// Effective cancellation for one request: the caller's token OR an internal deadline.
///
/// The effective token is a child of the caller's, so the caller firing
/// reaches it without a watcher task and cancelling it never reaches back
/// to the caller. The deadline timer cancels it directly.
pub struct RequestCancellation {
    effective: CancellationToken,
    expired: CancellationToken,
    timer: JoinHandle<()>,
}

impl RequestCancellation {
    pub fn new(deadline: Duration, caller: Option<&CancellationToken>) -> Self {
        let effective = caller
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let expired = CancellationToken::new();

        let timer = {
            let effective = effective.clone();
            let expired = expired.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                expired.cancel();
                effective.cancel();
            })
        };

        Self {
            effective,
            expired,
            timer,
        }
    }

    /// Resolves when either source fires
    pub async fn cancelled(&self) -> CancelCause {
        self.effective.cancelled().await;
        self.cause()
    }

    pub fn cause(&self) -> CancelCause {
        if self.expired.is_cancelled() {
            CancelCause::Deadline
        } else {
            CancelCause::Caller
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.effective
    }
}

impl Drop for RequestCancellation {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cause() {
        let guard = RequestCancellation::new(Duration::from_secs(30), None);
        let started = tokio::time::Instant::now();

        assert_eq!(guard.cancelled().await, CancelCause::Deadline);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cause_wins_before_deadline() {
        let caller = CancellationToken::new();
        let guard = RequestCancellation::new(Duration::from_secs(30), Some(&caller));

        caller.cancel();
        assert_eq!(guard.cancelled().await, CancelCause::Caller);
    }

    #[tokio::test]
    async fn test_precancelled_caller() {
        let caller = CancellationToken::new();
        caller.cancel();

        let guard = RequestCancellation::new(Duration::from_secs(30), Some(&caller));

        assert!(guard.token().is_cancelled());
        assert_eq!(guard.cause(), CancelCause::Caller);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_does_not_cancel_caller() {
        let caller = CancellationToken::new();
        let guard = RequestCancellation::new(Duration::from_secs(5), Some(&caller));

        assert_eq!(guard.cancelled().await, CancelCause::Deadline);
        assert!(!caller.is_cancelled());

        drop(guard);
        assert!(!caller.is_cancelled());
    }
}
