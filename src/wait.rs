//! Fixed-interval polling with cooperative cancellation.
//!
//! Waits have no deadline of their own; a stuck wait is ended by cancelling
//! the token handed to [`Poller::with_cancellation`].

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::MigrationError;

/// Interval between status polls when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Sleeps between polls and aborts promptly when cancelled.
#[derive(Clone, Debug)]
pub struct Poller {
    interval: Duration,
    cancel: CancellationToken,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Poller {
    /// Creates a poller with a private, never-cancelled token.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleeps for one interval.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Cancelled`] when the token is cancelled
    /// before or during the sleep.
    pub async fn tick(&self, waiting_for: &str) -> Result<(), MigrationError> {
        let cancelled = || MigrationError::Cancelled {
            waiting_for: waiting_for.to_owned(),
        };
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }
        tokio::select! {
            () = self.cancel.cancelled() => Err(cancelled()),
            () = sleep(self.interval) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tick_completes_when_not_cancelled() {
        let poller = Poller::new(Duration::from_millis(1));
        assert!(poller.tick("nothing").await.is_ok());
    }

    #[tokio::test]
    async fn tick_fails_immediately_once_cancelled() {
        let token = CancellationToken::new();
        let poller = Poller::new(Duration::from_secs(3600)).with_cancellation(token.clone());
        token.cancel();

        let err = poller
            .tick("volume v1 to be Released")
            .await
            .expect_err("cancelled tick should fail");
        assert_eq!(
            err,
            MigrationError::Cancelled {
                waiting_for: String::from("volume v1 to be Released"),
            }
        );
    }

    #[tokio::test]
    async fn tick_is_interrupted_mid_sleep() {
        let token = CancellationToken::new();
        let poller = Poller::new(Duration::from_secs(3600)).with_cancellation(token.clone());
        let canceller = tokio::spawn(async move { token.cancel() });

        let result = poller.tick("job").await;
        canceller
            .await
            .unwrap_or_else(|err| panic!("canceller task: {err}"));
        assert!(matches!(result, Err(MigrationError::Cancelled { .. })));
    }
}
