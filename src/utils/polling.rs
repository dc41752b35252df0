/// Polling utilities for waiting on conditions with timeout
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for polling operations
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub timeout: Duration,
    pub interval: Duration,
    pub description: String,
}

impl PollingConfig {
    /// Create a new polling configuration
    pub fn new(timeout: Duration, interval: Duration, description: impl Into<String>) -> Self {
        Self {
            timeout,
            interval,
            description: description.into(),
        }
    }

    /// Poll until condition is met or timeout
    ///
    /// The first attempt runs immediately; later attempts are spaced by
    /// `interval`. Once `timeout` has elapsed after a pending attempt the poll
    /// fails. The condition function should return:
    /// - Ok(Some(T)) when condition is met (returns T)
    /// - Ok(None) when condition is not yet met (continues polling)
    /// - Err(e) when an error occurs (stops polling and returns error)
    pub async fn poll<F, Fut, T>(&self, mut condition: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        self.poll_attempts(|| {
            let attempt = condition();
            async move {
                Ok(match attempt.await? {
                    Some(value) => Attempt::Ready(value),
                    None => Attempt::Pending,
                })
            }
        })
        .await
    }

    /// Like [`poll`](Self::poll), but an attempt may ask for its own delay
    /// before the next one
    pub async fn poll_attempts<F, Fut, T>(&self, mut condition: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>>>,
    {
        info!("{}...", self.description);

        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let delay = match condition().await? {
                Attempt::Ready(value) => {
                    info!("✓ {}", self.description);
                    return Ok(value);
                }
                Attempt::Pending => self.interval,
                Attempt::RetryAfter(delay) => delay.min(self.timeout),
            };

            if start.elapsed() >= self.timeout {
                anyhow::bail!(
                    "Timeout after {} seconds ({} attempts): {}",
                    self.timeout.as_secs(),
                    attempt,
                    self.description
                );
            }

            debug!(
                "{}: attempt {} pending, retrying in {:?}",
                self.description, attempt, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Outcome of a single polling attempt
#[derive(Debug)]
pub enum Attempt<T> {
    Ready(T),
    /// Not done; wait the configured interval
    Pending,
    /// Not done; wait this long instead of the configured interval
    RetryAfter(Duration),
}
