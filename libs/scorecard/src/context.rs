//! Run context: deadline and cancellation shared by every suspension point
//! of a scorecard run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("context canceled")]
    Canceled,
}

/// Cancellation scope for a run.
///
/// Clones share the same cancellation flag and deadline.
#[derive(Debug, Clone)]
pub struct RunContext {
    deadline: Option<Instant>,
    cancel: Arc<watch::Sender<bool>>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RunContext {
    /// Context that is never done unless cancelled.
    pub fn background() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            deadline: None,
            cancel: Arc::new(tx),
        }
    }

    /// Context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        let mut ctx = Self::background();
        ctx.deadline = Some(deadline);
        ctx
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel the context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Non-blocking check; `None` while the context is live.
    pub fn err(&self) -> Option<ContextError> {
        if *self.cancel.borrow() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve once the context is done.
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }

        let mut rx = self.cancel.subscribe();
        let canceled = async move {
            if rx.wait_for(|canceled| *canceled).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = canceled => ContextError::Canceled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                canceled.await;
                ContextError::Canceled
            }
        }
    }

    /// Drive `fut` until it completes or the context is done.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            output = fut => Ok(output),
        }
    }

    /// Sleep for `duration` unless the context finishes first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_live() {
        let ctx = RunContext::background();
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = RunContext::with_timeout(Duration::from_millis(20));
        let err = ctx.sleep(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_reaches_clones() {
        let ctx = RunContext::background();
        let clone = ctx.clone();

        let waiter = tokio::spawn(async move { clone.done().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();

        assert_eq!(waiter.await.unwrap(), ContextError::Canceled);
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }

    #[tokio::test]
    async fn test_run_on_done_context_does_not_poll_future() {
        let ctx = RunContext::background();
        ctx.cancel();
        let result = ctx.run(async { panic!("should not run") }).await;
        assert_eq!(result, Err::<(), _>(ContextError::Canceled));
    }

    #[tokio::test]
    async fn test_sleep_completes_before_deadline() {
        let ctx = RunContext::with_timeout(Duration::from_secs(5));
        assert!(ctx.sleep(Duration::from_millis(5)).await.is_ok());
    }
}
