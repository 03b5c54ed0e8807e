//! Reconnect delay policy and the backoff loop that drives recovery.
//!
//! This module provides [`ReconnectConfig`] and the [`retry_with_backoff`]
//! helper used by the connection manager to re-establish a dropped
//! connection that still has subscriptions attached.
//!
//! # Retry Strategy
//!
//! - Every attempt, including the first, is preceded by a delay
//! - Only retries errors for which [`HubError::is_retryable`] is true
//! - Delay grows by `multiplier` and is capped at `max_delay`; the default
//!   policy is a fixed 10 second delay
//! - Optional ±25% jitter
//! - The loop stops early when the cancellation token fires

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{log_debug, HubError};

/// Reconnect delay policy.
///
/// # Example
///
/// ```
/// use hub_link::ReconnectConfig;
/// use std::time::Duration;
///
/// let reconnect = ReconnectConfig {
///     max_attempts: Some(5),
///     multiplier: 2.0,
///     initial_delay: Duration::from_secs(1),
///     max_delay: Duration::from_secs(30),
///     jitter: true,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of attempts (`None` = keep trying while subscriptions remain).
    pub max_attempts: Option<u32>,

    /// Backoff multiplier applied to the delay after each failed attempt.
    ///
    /// 1.0 keeps the delay fixed.
    pub multiplier: f32,

    /// Delay before the first attempt.
    pub initial_delay: Duration,

    /// Maximum delay between attempts (caps exponential growth).
    pub max_delay: Duration,

    /// Randomize each delay by ±25%.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    /// Fixed 10 second delay, unlimited attempts, no jitter.
    fn default() -> Self {
        // ---
        Self {
            max_attempts: None,
            multiplier: 1.0,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

impl ReconnectConfig {
    /// Fixed delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        // ---
        Self {
            initial_delay: delay,
            max_delay: delay,
            ..Self::default()
        }
    }
}

/// Run `operation` after a delay, retrying with backoff on retryable errors.
///
/// # Returns
///
/// - `Ok(T)` once an attempt succeeds
/// - the last error when attempts are exhausted or the error is not retryable
/// - `Err(HubError::Shutdown)` when `cancel` fires during a delay
pub(crate) async fn retry_with_backoff<F, Fut, T>(
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    // ---
    let mut attempt: u32 = 0;
    let mut current_delay = config.initial_delay;

    loop {
        let delay = if config.jitter {
            apply_jitter(current_delay)
        } else {
            current_delay
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(HubError::Shutdown),
            _ = sleep(delay) => {}
        }

        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retryable() => {
                if config.max_attempts.is_some_and(|max| attempt >= max) {
                    log_debug!("reconnect exhausted after {attempt} attempts, last error: {err}");
                    return Err(err);
                }

                let next_delay = Duration::from_secs_f64(
                    current_delay.as_secs_f64() * f64::from(config.multiplier.max(1.0)),
                );
                current_delay = next_delay.min(config.max_delay.max(config.initial_delay));

                log_debug!(
                    "reconnect attempt {attempt} failed ({err}), next attempt in {current_delay:?}"
                );
            }
            Err(err) => return Err(err),
        }
    }
}

/// Apply ±25% jitter to a duration.
///
/// Uses a simple multiplicative jitter: `delay * (0.75 + random(0.0..0.5))`
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let random_state = RandomState::new();
    let hash = random_state.hash_one(std::time::SystemTime::now());

    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    Duration::from_secs_f64(delay.as_secs_f64() * jitter_multiplier)
}
