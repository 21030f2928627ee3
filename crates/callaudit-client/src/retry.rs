//! Retry policy for outbound calls.
//!
//! The policy decides whether a failed attempt is repeated and how long to
//! wait first. The [`RetryContext`] carries the original request through
//! the whole loop, so every attempt and every error event of one logical
//! call uses the same request and the same request id.

use std::time::Duration;

use callaudit_core::CallRequest;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// How failed calls are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied to each delay.
    pub jitter_factor: f64,

    /// How the delay grows between retries.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    /// Three attempts, one second apart.
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Constant delay between attempts, no jitter.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            jitter_factor: 0.0,
            backoff_strategy: BackoffStrategy::Fixed,
        }
    }

    /// Doubling delay starting at `base_delay`, capped at `max_delay`, ±25% jitter.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter_factor: 0.25,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay to wait after the attempt with zero-based index `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential => {
                let multiplier = 2_u32.saturating_pow(attempt.min(20));
                self.base_delay.saturating_mul(multiplier)
            },
        };

        let capped = base.min(self.max_delay);
        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay every time.
    Fixed,
    /// Delay doubles each retry.
    Exponential,
    /// Delay grows by `base_delay` each retry.
    Linear,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then try again.
    Retry {
        /// How long to wait
        delay: Duration,
    },
    /// The policy allows no more attempts.
    Exhausted {
        /// Attempts made so far
        attempts: u32,
    },
    /// The failure is not worth retrying, or no policy is attached.
    NotRetryable {
        /// Why the call is not retried
        reason: String,
    },
}

/// State of one logical call's attempt loop.
#[derive(Debug, Clone)]
pub struct RetryContext {
    request: CallRequest,
    policy: Option<RetryPolicy>,
    attempt: u32,
}

impl RetryContext {
    /// Starts a loop for `request`. Without a policy every failure is final.
    pub fn new(request: CallRequest, policy: Option<RetryPolicy>) -> Self {
        Self { request, policy, attempt: 0 }
    }

    /// The original request, shared by every attempt.
    pub fn request(&self) -> &CallRequest {
        &self.request
    }

    /// Zero-based index of the current attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Consumes the context and returns the original request.
    pub fn into_request(self) -> CallRequest {
        self.request
    }

    /// Decides what follows the failure of the current attempt.
    pub fn decide(&self, error: &TransportError) -> RetryDecision {
        let Some(policy) = &self.policy else {
            return RetryDecision::NotRetryable { reason: "no retry policy attached".to_string() };
        };

        if !error.is_retryable() {
            return RetryDecision::NotRetryable { reason: format!("non-retryable error: {error}") };
        }

        let attempts = self.attempt.saturating_add(1);
        if attempts >= policy.max_attempts {
            return RetryDecision::Exhausted { attempts };
        }

        RetryDecision::Retry { delay: policy.delay_after(self.attempt) }
    }

    /// Moves on to the next attempt.
    pub fn advance(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }
}

/// Randomizes `duration` by ±`jitter_factor`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let spread = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::rng().random_range(-spread..=spread);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use callaudit_core::HttpMethod;

    use super::*;

    fn context(policy: Option<RetryPolicy>) -> RetryContext {
        RetryContext::new(CallRequest::new(HttpMethod::Get, "/flaky", None), policy)
    }

    #[test]
    fn default_policy_is_three_fixed_one_second_attempts() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts, 3);
        for attempt in 0..3 {
            assert_eq!(policy.delay_after(attempt), Duration::from_secs(1));
        }
    }

    #[test]
    fn exponential_backoff_doubles() {
        let mut policy =
            RetryPolicy::exponential(6, Duration::from_secs(1), Duration::from_secs(600));
        policy.jitter_factor = 0.0;

        let delays: Vec<_> = (0..5).map(|attempt| policy.delay_after(attempt)).collect();
        assert_eq!(delays, [1, 2, 4, 8, 16].map(Duration::from_secs));
    }

    #[test]
    fn linear_backoff_grows_by_base() {
        let policy = RetryPolicy {
            backoff_strategy: BackoffStrategy::Linear,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        };

        let delays: Vec<_> = (0..3).map(|attempt| policy.delay_after(attempt)).collect();
        assert_eq!(delays, [5, 10, 15].map(Duration::from_secs));
    }

    #[test]
    fn max_delay_enforced() {
        let policy = RetryPolicy::exponential(30, Duration::from_secs(1), Duration::from_secs(60));

        assert!(policy.delay_after(25) <= Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..20 {
            let delay = apply_jitter(base, 0.5);
            assert!(delay >= Duration::from_secs(5) && delay <= Duration::from_secs(15));
            seen.insert(delay.as_millis());
        }
        assert!(seen.len() > 1, "jitter should vary the delay");
    }

    #[test]
    fn retries_until_attempts_exhausted() {
        let mut ctx = context(Some(RetryPolicy::fixed(3, Duration::from_millis(10))));
        let error = TransportError::network("connection reset");

        assert_eq!(ctx.decide(&error), RetryDecision::Retry { delay: Duration::from_millis(10) });
        ctx.advance();
        assert_eq!(ctx.decide(&error), RetryDecision::Retry { delay: Duration::from_millis(10) });
        ctx.advance();
        assert_eq!(ctx.decide(&error), RetryDecision::Exhausted { attempts: 3 });
    }

    #[test]
    fn non_retryable_errors_rejected() {
        let ctx = context(Some(RetryPolicy::default()));

        match ctx.decide(&TransportError::status(404, "not found")) {
            RetryDecision::NotRetryable { reason } => assert!(reason.contains("non-retryable")),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn without_policy_nothing_is_retried() {
        let ctx = context(None);

        assert!(matches!(
            ctx.decide(&TransportError::timeout(100)),
            RetryDecision::NotRetryable { .. }
        ));
    }

    #[test]
    fn request_survives_every_attempt() {
        let mut ctx = context(Some(RetryPolicy::default()));
        let id = ctx.request().request_id().clone();

        ctx.advance();
        ctx.advance();

        assert_eq!(ctx.attempt(), 2);
        assert_eq!(ctx.into_request().request_id(), &id);
    }

    proptest::proptest! {
        #[test]
        fn delay_never_exceeds_cap(
            attempt in 0u32..64,
            base_ms in 1u64..5_000,
            extra_ms in 0u64..120_000,
            jitter in 0.0f64..=1.0,
            strategy in proptest::sample::select(vec![
                BackoffStrategy::Fixed,
                BackoffStrategy::Linear,
                BackoffStrategy::Exponential,
            ]),
        ) {
            let policy = RetryPolicy {
                max_attempts: 10,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(base_ms + extra_ms),
                jitter_factor: jitter,
                backoff_strategy: strategy,
            };

            proptest::prop_assert!(policy.delay_after(attempt) <= policy.max_delay);
        }
    }
}
