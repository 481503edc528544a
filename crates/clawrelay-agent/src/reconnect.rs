//! Reconnection backoff for the agent tunnel

use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Ceiling for the delay
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Maximum number of consecutive failed attempts (None = unlimited)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconnectError {
    #[error("Gave up after {0} reconnection attempts")]
    MaxAttemptsReached(usize),

    #[error("Reconnection cancelled")]
    Cancelled,
}

/// Exponential backoff between tunnel connection attempts
///
/// `reset` is called once a session is established, so a relay restart
/// starts over at the initial delay instead of the last ceiling.
pub struct ReconnectManager {
    config: ReconnectConfig,
    current_backoff: Duration,
    attempt: usize,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_backoff: config.initial_backoff,
            config,
            attempt: 0,
        }
    }

    /// Sleep for the current delay, then grow it
    ///
    /// Returns early with `Cancelled` if `cancel` fires while waiting.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<(), ReconnectError> {
        self.attempt += 1;

        if let Some(max_attempts) = self.config.max_attempts {
            if self.attempt > max_attempts {
                return Err(ReconnectError::MaxAttemptsReached(max_attempts));
            }
        }

        debug!(
            "Waiting {:?} before reconnection attempt {}",
            self.current_backoff, self.attempt
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(ReconnectError::Cancelled),
            _ = sleep(self.current_backoff) => {}
        }

        self.current_backoff = self.next_backoff();
        Ok(())
    }

    fn next_backoff(&self) -> Duration {
        let next = self.current_backoff.as_secs_f64() * self.config.multiplier;
        Duration::from_secs_f64(next.min(self.config.max_backoff.as_secs_f64()))
    }

    pub fn reset(&mut self) {
        self.current_backoff = self.config.initial_backoff;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: Option<usize>) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_up_to_ceiling() {
        let cancel = CancellationToken::new();
        let mut manager = ReconnectManager::new(config(None));
        assert_eq!(manager.current_backoff(), Duration::from_secs(1));

        let mut observed = Vec::new();
        for _ in 0..8 {
            manager.wait(&cancel).await.unwrap();
            observed.push(manager.current_backoff().as_secs());
        }
        assert_eq!(observed, vec![2, 4, 8, 16, 32, 60, 60, 60]);
        assert_eq!(manager.attempt(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_successful_connect() {
        let cancel = CancellationToken::new();
        let mut manager = ReconnectManager::new(config(None));
        manager.wait(&cancel).await.unwrap();
        manager.wait(&cancel).await.unwrap();

        manager.reset();
        assert_eq!(manager.attempt(), 0);
        assert_eq!(manager.current_backoff(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts() {
        let cancel = CancellationToken::new();
        let mut manager = ReconnectManager::new(config(Some(2)));

        assert!(manager.wait(&cancel).await.is_ok());
        assert!(manager.wait(&cancel).await.is_ok());
        assert_eq!(
            manager.wait(&cancel).await,
            Err(ReconnectError::MaxAttemptsReached(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let cancel = CancellationToken::new();
        let mut manager = ReconnectManager::new(ReconnectConfig {
            initial_backoff: Duration::from_secs(3600),
            ..Default::default()
        });

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        assert_eq!(manager.wait(&cancel).await, Err(ReconnectError::Cancelled));
        assert_eq!(manager.current_backoff(), Duration::from_secs(3600));
    }
}
