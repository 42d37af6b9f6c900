//! Reconnection backoff.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::session::Signal;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff; 1.0 keeps the delay fixed.
    pub backoff_multiplier: f64,
    /// Maximum consecutive attempts without reaching a session (None = infinite).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for the given attempt number (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_millis = (self.initial_delay.as_millis() as f64 * multiplier) as u64;
        Duration::from_millis(delay_millis).min(self.max_delay)
    }

    /// Check whether attempt number `attempt` (1-based) may be made.
    #[must_use]
    pub const fn allows_attempt(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= max,
            None => true,
        }
    }
}

/// Handle to a pending backoff timer.
#[derive(Debug)]
pub struct BackoffHandle {
    cancel: CancellationToken,
}

impl BackoffHandle {
    /// Cancel the timer. Safe to call after it fired.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check if the timer was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for BackoffHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Deliver [`Signal::BackoffElapsed`] for `connection` after `delay`, unless cancelled first.
pub fn start_backoff_timer(
    connection: u64,
    delay: Duration,
    tx: mpsc::Sender<Signal>,
) -> BackoffHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = tokio::time::sleep(delay) => {
                let _ = tx.send(Signal::BackoffElapsed { connection }).await;
            }
        }
    });

    BackoffHandle { cancel }
}
