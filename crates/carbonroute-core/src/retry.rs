//! Bounded retries with backoff, throttling and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::data_source::{FailureClass, SourceError};
use crate::throttling::Throttle;
use crate::ProviderId;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential_from(Duration::from_millis(800))
    }
}

impl Backoff {
    /// Doubling backoff from `base`, no jitter. Delays are capped at five
    /// seconds, or at `base` when that is longer.
    pub fn exponential_from(base: Duration) -> Self {
        Self::Exponential {
            base,
            factor: 2.0,
            max: base.max(Duration::from_secs(5)),
            jitter: false,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let delay = Duration::from_secs_f64(seconds.min(max.as_secs_f64()));

                if !jitter {
                    return delay;
                }

                let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                let spread = millis / 2;
                let offset = fastrand::u64(0..=spread.saturating_mul(2));
                Duration::from_millis((millis + offset).saturating_sub(spread))
            }
        }
    }
}

/// Retry budget applied to every adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Additional attempts after the first. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Final failure of a retried call.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub error: SourceError,
    pub class: FailureClass,
    pub attempts: u32,
}

impl AttemptFailure {
    fn cancelled(attempts: u32) -> Self {
        Self {
            error: SourceError::cancelled(),
            class: FailureClass::Aborted,
            attempts,
        }
    }
}

/// Runs one adapter operation under a [`RetryConfig`].
///
/// Only transient failures are retried. Before each attempt the executor waits
/// for rate budget; attempts, budget waits and backoff sleeps are all raced
/// against the cancellation token.
pub struct RetryExecutor<'a> {
    provider: ProviderId,
    config: &'a RetryConfig,
    throttle: Option<&'a Throttle>,
    cancel: &'a CancellationToken,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(provider: ProviderId, config: &'a RetryConfig, cancel: &'a CancellationToken) -> Self {
        Self {
            provider,
            config,
            throttle: None,
            cancel,
        }
    }

    pub fn with_throttle(mut self, throttle: Option<&'a Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    pub async fn run<T, F, Fut, C>(&self, classify: C, mut operation: F) -> Result<T, AttemptFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
        C: Fn(&SourceError) -> FailureClass,
    {
        let max_attempts = self.config.max_attempts();
        let mut attempt = 0_u32;

        loop {
            if let Some(throttle) = self.throttle {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Err(AttemptFailure::cancelled(attempt)),
                    () = throttle.until_ready() => {}
                }
            }

            attempt += 1;
            tracing::debug!(provider = %self.provider, attempt, max_attempts, "calling provider");

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(AttemptFailure::cancelled(attempt)),
                result = operation() => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let class = classify(&error);
            if class != FailureClass::Transient || attempt >= max_attempts {
                return Err(AttemptFailure {
                    error,
                    class,
                    attempts: attempt,
                });
            }

            let delay = self.config.delay_for_attempt(attempt - 1);
            tracing::warn!(
                provider = %self.provider,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "transient provider failure, retrying"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(AttemptFailure::cancelled(attempt)),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn default_backoff_doubles_from_800ms_and_caps() {
        let backoff = Backoff::default();

        assert_eq!(backoff.delay(0), Duration::from_millis(800));
        assert_eq!(backoff.delay(1), Duration::from_millis(1600));
        assert_eq!(backoff.delay(2), Duration::from_millis(3200));
        assert_eq!(backoff.delay(3), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_half_either_side() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..10 {
            for attempt in 0..5 {
                let delay_ms = backoff.delay(attempt).as_millis() as f64;
                let expected = (100.0 * 2_f64.powi(attempt as i32)).min(1000.0);
                assert!(delay_ms >= expected * 0.49, "attempt={attempt}, delay_ms={delay_ms}");
                assert!(delay_ms <= expected * 1.51, "attempt={attempt}, delay_ms={delay_ms}");
            }
        }
    }

    #[test]
    fn default_config_allows_three_attempts() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(RetryConfig::no_retry().max_attempts(), 1);
    }

    #[tokio::test]
    async fn transient_failures_use_the_whole_budget() {
        let config = RetryConfig::fixed(Duration::ZERO, 2);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let failure = RetryExecutor::new(ProviderId::Mock, &config, &cancel)
            .run(FailureClass::of, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SourceError::transient("upstream 503").with_status(503)) }
            })
            .await
            .expect_err("always fails");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.class, FailureClass::Transient);
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let config = RetryConfig::fixed(Duration::ZERO, 5);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let failure = RetryExecutor::new(ProviderId::Mock, &config, &cancel)
            .run(FailureClass::of, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SourceError::auth("401")) }
            })
            .await
            .expect_err("auth fails");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.class, FailureClass::Auth);
    }

    #[tokio::test]
    async fn recovers_after_a_transient_failure() {
        let config = RetryConfig::fixed(Duration::ZERO, 2);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let value = RetryExecutor::new(ProviderId::Mock, &config, &cancel)
            .run(FailureClass::of, || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Err(SourceError::transient("timeout"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .expect("second attempt succeeds");

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_the_backoff_sleep() {
        let config = RetryConfig::fixed(Duration::from_secs(60), 3);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let failure = tokio::time::timeout(
            Duration::from_secs(5),
            RetryExecutor::new(ProviderId::Mock, &config, &cancel).run(FailureClass::of, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SourceError::transient("timeout")) }
            }),
        )
        .await
        .expect("cancellation is prompt")
        .expect_err("cancelled");

        assert_eq!(failure.class, FailureClass::Aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
