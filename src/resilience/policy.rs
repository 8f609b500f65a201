//! Retry policy
//!
//! Exponential backoff with jitter, expressed as a value so delays can be
//! computed and tested without timers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Decides whether an error is worth another attempt
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Serializable retry settings, as found in config files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Retry policy for a wrapped remote call
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added as random jitter (0.0 - 1.0)
    pub jitter: f64,
    retryable: RetryPredicate,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            multiplier: if multiplier < 1.0 { 1.0 } else { multiplier },
            jitter: 0.0,
            retryable: Arc::new(Error::is_retryable),
        }
    }

    /// Set the jitter fraction, clamped to 0.0 - 1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replace the retryable predicate
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 1.0)
    }

    pub fn is_retryable(&self, error: &Error) -> bool {
        (self.retryable)(error)
    }

    /// Delay before the attempt after `attempt` (1-based), without jitter
    ///
    /// `min(max_delay, base_delay * multiplier^(attempt - 1))`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(attempt.saturating_sub(1).min(63) as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// `next_delay` plus up to `jitter * delay` of random extra
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.next_delay(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let range = (delay.as_millis() as f64 * self.jitter) as u64;
        if range == 0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=range);
        delay + Duration::from_millis(extra)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy::new(
            settings.max_attempts,
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.multiplier,
        )
        .with_jitter(settings.jitter)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1_000), 2.0)
    }

    #[test]
    fn test_next_delay_exponential() {
        let p = policy();
        assert_eq!(p.next_delay(1), Duration::from_millis(100));
        assert_eq!(p.next_delay(2), Duration::from_millis(200));
        assert_eq!(p.next_delay(3), Duration::from_millis(400));
        assert_eq!(p.next_delay(4), Duration::from_millis(800));
    }

    #[test]
    fn test_next_delay_capped() {
        let p = policy();
        assert_eq!(p.next_delay(5), Duration::from_millis(1_000));
        assert_eq!(p.next_delay(60), Duration::from_millis(1_000));
        assert_eq!(p.next_delay(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy().with_jitter(0.5);
        for _ in 0..50 {
            let d = p.jittered_delay(2);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_default_predicate() {
        let p = policy();
        assert!(p.is_retryable(&Error::RateLimited("429".into())));
        assert!(!p.is_retryable(&Error::InvalidPayload("bad".into())));
    }

    #[test]
    fn test_custom_predicate() {
        let p = policy().with_predicate(|e| matches!(e, Error::Submission(_)));
        assert!(p.is_retryable(&Error::Submission("flaky".into())));
        assert!(!p.is_retryable(&Error::RateLimited("429".into())));
    }

    #[test]
    fn test_settings_conversion() {
        let settings = RetrySettings {
            max_attempts: 0,
            base_delay_ms: 50,
            max_delay_ms: 500,
            multiplier: 0.5,
            jitter: 3.0,
        };
        let p = RetryPolicy::from(&settings);
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.multiplier, 1.0);
        assert_eq!(p.jitter, 1.0);
    }
}
