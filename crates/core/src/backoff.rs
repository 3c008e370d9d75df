//! Wait-time policy between fetch attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::BackoffConfig;

/// Failure classes that may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryKind {
    /// Network hiccup, server error or malformed response.
    Transient,
    /// The source is throttling us.
    RateLimited,
}

/// Pure mapping from (attempt, failure kind) to the delay before the next attempt.
///
/// - `Transient`: `max(B, B * F^(n-1))`, capped at `max_delay`.
/// - `RateLimited`: the cooldown plus the transient delay, so never less than
///   the cooldown whatever the attempt number.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    growth_factor: f64,
    max_delay: Duration,
    cooldown: Duration,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(
        base: Duration,
        growth_factor: f64,
        max_delay: Duration,
        cooldown: Duration,
        max_attempts: u32,
    ) -> Self {
        let growth_factor = if growth_factor.is_finite() { growth_factor.max(1.0) } else { 1.0 };
        Self {
            base,
            growth_factor,
            max_delay: max_delay.max(base),
            cooldown,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base_delay_secs),
            config.growth_factor,
            Duration::from_secs(config.max_delay_secs),
            Duration::from_secs(config.rate_limit_cooldown_secs),
            config.max_attempts,
        )
    }

    /// Total attempts allowed per job per run.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may follow failed attempt number `attempt`.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Longest wait an upstream `Retry-After` hint may impose: the cooldown
    /// plus the exponential cap.
    pub fn retry_after_cap(&self) -> Duration {
        self.cooldown.saturating_add(self.max_delay)
    }

    /// Wait before the next attempt given an optional upstream hint.
    ///
    /// The hint raises the policy delay but is clamped to
    /// [`retry_after_cap`](Self::retry_after_cap).
    pub fn delay_with_hint(&self, attempt: u32, kind: RetryKind, hint: Option<Duration>) -> Duration {
        let delay = self.next_delay(attempt, kind);
        match hint {
            Some(hint) => delay.max(hint.min(self.retry_after_cap())),
            None => delay,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based; 0 is treated as 1).
    pub fn next_delay(&self, attempt: u32, kind: RetryKind) -> Duration {
        let exponential = self.exponential(attempt);
        match kind {
            RetryKind::Transient => exponential,
            RetryKind::RateLimited => self.cooldown.saturating_add(exponential),
        }
    }

    fn exponential(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.base.as_secs_f64();
        let cap = self.max_delay.as_secs_f64();
        let secs = base * self.growth_factor.powi(exponent);
        let secs = if secs.is_finite() { secs.min(cap) } else { cap };
        Duration::try_from_secs_f64(secs.max(base)).unwrap_or(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
