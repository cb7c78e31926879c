//! Retry logic for BLE operations.
//!
//! Every unreliable radio call (scan, connect-and-read) goes through one
//! bounded-attempts wrapper, [`with_retry`]. A classifier decides for each
//! failure whether it is worth another attempt, fatal, or a cancellation.
//!
//! # Example
//!
//! ```
//! use tokio_util::sync::CancellationToken;
//! use waveplus_core::retry::{RetryConfig, classify, with_retry};
//! use waveplus_core::Error;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::new(3);
//! let cancel = CancellationToken::new();
//!
//! let value = with_retry(&config, "read_sensor", &cancel, classify, || async {
//!     // Your BLE operation here
//!     Ok::<_, Error>(42)
//! })
//! .await
//! .map_err(|failure| failure.into_error())?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one. Values below 1 are
    /// treated as 1.
    pub max_attempts: u32,
    /// Initial delay between attempts.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (for exponential backoff).
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with the given attempt budget and default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Set the total number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Calculate the delay after a failed attempt (0-based).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            // Add up to 25% jitter
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Worth another attempt if budget remains.
    Retryable,
    /// Give up immediately and surface the error.
    Fatal,
    /// Shutdown was requested; give up immediately.
    Cancelled,
}

/// Why [`with_retry`] gave up.
#[derive(Debug)]
pub enum RetryFailure {
    /// Every attempt failed with a retryable error.
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: Error,
    },
    /// An attempt failed with a fatal error.
    Fatal(Error),
    /// Cancelled by the shutdown signal, either by an attempt or during backoff.
    Cancelled,
}

impl RetryFailure {
    /// Flatten into a plain [`Error`], wrapping exhaustion with `wrap`.
    pub fn map_exhausted(self, wrap: impl FnOnce(u32, Error) -> Error) -> Error {
        match self {
            RetryFailure::Exhausted { attempts, last } => wrap(attempts, last),
            RetryFailure::Fatal(e) => e,
            RetryFailure::Cancelled => Error::Cancelled,
        }
    }

    /// Flatten into a plain [`Error`], returning the last cause on exhaustion.
    pub fn into_error(self) -> Error {
        self.map_exhausted(|_, last| last)
    }
}

/// Default classification for [`Error`] values.
pub fn classify(error: &Error) -> Outcome {
    match error {
        Error::Cancelled => Outcome::Cancelled,
        Error::ScanExhausted { .. } | Error::ReceiveExhausted { .. } if error.is_cancelled() => {
            Outcome::Cancelled
        }
        // Already retried by an inner wrapper
        Error::ScanExhausted { .. } | Error::ReceiveExhausted { .. } => Outcome::Fatal,
        Error::InvalidConfig(_) => Outcome::Fatal,
        Error::NoAdapter => Outcome::Fatal,
        // Flaky GATT discovery and garbled frames are expected on this stack
        Error::CharacteristicNotFound { .. } | Error::MalformedFrame { .. } => Outcome::Retryable,
        Error::Timeout { .. }
        | Error::Bluetooth(_)
        | Error::Radio(_)
        | Error::RadioClosed
        | Error::DeviceNotFound { .. }
        | Error::NotConnected
        | Error::InvalidAdvertisement { .. }
        | Error::Io(_) => Outcome::Retryable,
    }
}

/// Execute an async operation with bounded attempts.
///
/// # Arguments
///
/// * `config` - Attempt budget and backoff
/// * `operation_name` - Name for logging purposes
/// * `cancel` - Shutdown signal; interrupts the backoff sleep
/// * `classify` - Decides how each failure is treated
/// * `operation` - The async operation to attempt
///
/// # Returns
///
/// The first successful result, or a [`RetryFailure`] describing why the
/// attempts stopped.
pub async fn with_retry<F, Fut, T, C>(
    config: &RetryConfig,
    operation_name: &str,
    cancel: &CancellationToken,
    classify: C,
    mut operation: F,
) -> std::result::Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
    C: Fn(&Error) -> Outcome,
{
    let attempts = config.attempts();
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryFailure::Cancelled);
        }

        let error = match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        match classify(&error) {
            Outcome::Cancelled => return Err(RetryFailure::Cancelled),
            Outcome::Fatal => return Err(RetryFailure::Fatal(error)),
            Outcome::Retryable => {}
        }

        if attempt + 1 == attempts {
            return Err(RetryFailure::Exhausted {
                attempts,
                last: error,
            });
        }

        let delay = config.delay_for_attempt(attempt);
        warn!(
            error = %error,
            "{} failed (attempt {}/{}), retrying in {:?}",
            operation_name,
            attempt + 1,
            attempts,
            delay
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
            _ = sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts)
            .initial_delay(Duration::from_millis(1))
            .jitter(false)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.jitter);
    }

    #[test]
    fn test_retry_config_none_and_zero() {
        assert_eq!(RetryConfig::none().attempts(), 1);
        assert_eq!(RetryConfig::new(0).attempts(), 1);
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(300),
            jitter: false,
            max_attempts: 5,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(300));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&Error::Cancelled), Outcome::Cancelled);
        assert_eq!(
            classify(&Error::timeout("scan", Duration::from_secs(1))),
            Outcome::Retryable
        );
        assert_eq!(
            classify(&Error::characteristic_not_found("x", 0)),
            Outcome::Retryable
        );
        assert_eq!(
            classify(&Error::MalformedFrame {
                expected: 20,
                actual: 3
            }),
            Outcome::Retryable
        );
        assert_eq!(classify(&Error::invalid_config("bad")), Outcome::Fatal);
        assert_eq!(
            classify(&Error::ScanExhausted {
                attempts: 2,
                source: Box::new(Error::NotConnected),
            }),
            Outcome::Fatal
        );
        assert_eq!(
            classify(&Error::ScanExhausted {
                attempts: 2,
                source: Box::new(Error::Cancelled),
            }),
            Outcome::Cancelled
        );
    }

    #[tokio::test]
    async fn test_with_retry_immediate_success() {
        let cancel = CancellationToken::new();
        let result = with_retry(&fast(3), "test", &cancel, classify, || async {
            Ok::<_, Error>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_on_last_attempt() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = with_retry(&fast(3), "test", &cancel, classify, || {
            let attempts = Arc::clone(&attempts);
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(Error::radio("transient"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_budget() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<i32, _> = with_retry(&fast(4), "test", &cancel, classify, || {
            let attempts = Arc::clone(&attempts);
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::radio(format!("failure {}", n)))
            }
        })
        .await;

        match result {
            Err(RetryFailure::Exhausted { attempts: made, last }) => {
                assert_eq!(made, 4);
                assert!(last.to_string().contains("failure 3"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_with_retry_zero_budget_makes_one_attempt() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<i32, _> = with_retry(&fast(0), "test", &cancel, classify, || {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::radio("down"))
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryFailure::Exhausted { attempts: 1, .. })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_fatal_stops_immediately() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<i32, _> = with_retry(&fast(3), "test", &cancel, classify, || {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::invalid_config("nope"))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryFailure::Fatal(Error::InvalidConfig(_)))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_cancelled_error_not_retried() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<i32, _> = with_retry(&fast(3), "test", &cancel, classify, || {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::Cancelled)
            }
        })
        .await;

        assert!(matches!(result, Err(RetryFailure::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let config = RetryConfig::new(5)
            .initial_delay(Duration::from_secs(60))
            .jitter(false);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let result: Result<i32, _> = with_retry(&config, "test", &cancel, classify, || async {
            Err(Error::radio("down"))
        })
        .await;

        assert!(matches!(result, Err(RetryFailure::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn test_failure_flattening() {
        let err = RetryFailure::Exhausted {
            attempts: 2,
            last: Error::NotConnected,
        }
        .map_exhausted(|attempts, last| Error::ScanExhausted {
            attempts,
            source: Box::new(last),
        });
        assert!(matches!(err, Error::ScanExhausted { attempts: 2, .. }));

        assert!(matches!(
            RetryFailure::Cancelled.into_error(),
            Error::Cancelled
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_stays_within_cap_plus_jitter(
                initial_ms in 1u64..2_000,
                max_ms in 1u64..10_000,
                multiplier in 1.0f64..4.0,
                attempt in 0u32..16,
                jitter in any::<bool>(),
            ) {
                let config = RetryConfig::new(3)
                    .initial_delay(Duration::from_millis(initial_ms))
                    .max_delay(Duration::from_millis(max_ms))
                    .backoff_multiplier(multiplier)
                    .jitter(jitter);

                let delay = config.delay_for_attempt(attempt).as_secs_f64();
                let cap = Duration::from_millis(max_ms).as_secs_f64();
                prop_assert!(delay <= cap * 1.25 + 1e-9);
                if !jitter {
                    prop_assert!(delay <= cap + 1e-9);
                }
            }
        }
    }
}
