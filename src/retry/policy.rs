//! Retry policy and backoff strategies (spec.md §4.5, invariant 6).

use std::time::Duration;

/// How delay grows between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// A constant delay between every attempt.
    Fixed(Duration),
    /// `delay(n) = min(base * multiplier^n, max)` for `n >= 0`.
    Exponential {
        /// Delay before the first retry (`n == 0`).
        base: Duration,
        /// Growth factor applied per attempt.
        multiplier: f64,
        /// Upper bound on the computed delay.
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Computes the delay before attempt `n` (0-based). Per spec.md
    /// invariant 6, `delay(n) = 0` for any `n < 0` — an edge case that only
    /// arises when callers probe the formula directly, since the retry
    /// loop itself never requests a negative attempt.
    pub fn delay(&self, attempt: i64) -> Duration {
        if attempt < 0 {
            return Duration::ZERO;
        }
        match self {
            BackoffStrategy::Fixed(d) => *d,
            BackoffStrategy::Exponential {
                base,
                multiplier,
                max,
            } => {
                let factor = multiplier.powi(attempt as i32);
                let scaled = base.as_secs_f64() * factor;
                let capped = scaled.min(max.as_secs_f64()).max(0.0);
                Duration::from_secs_f64(capped)
            }
        }
    }
}

/// Governs retry attempts for a node configured with
/// `NodeErrorDecision::Retry` (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Backoff used to compute the delay before each retry.
    pub backoff: BackoffStrategy,
    /// Maximum number of attempts (including the first) before the policy
    /// is considered exhausted.
    pub max_attempts: u32,
    /// What to convert the decision to once `max_attempts` is exhausted.
    pub on_exhaustion: ExhaustionAction,
}

/// What a retry policy does once `max_attempts` is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ExhaustionAction {
    /// Convert to `Fail` (halts the run).
    Fail,
    /// Convert to `DeadLetter` (routes the item out-of-band and continues).
    DeadLetter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffStrategy::Fixed(Duration::ZERO),
            max_attempts: 1,
            on_exhaustion: ExhaustionAction::Fail,
        }
    }
}

impl RetryPolicy {
    /// Returns `true` if another attempt is permitted after `attempts_made`
    /// attempts have already occurred (0-based count).
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made + 1 < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_matches_formula() {
        let b = BackoffStrategy::Exponential {
            base: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_secs(10),
        };
        assert_eq!(b.delay(0), Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(200));
        assert_eq!(b.delay(2), Duration::from_millis(400));
        assert_eq!(b.delay(-1), Duration::ZERO);
        assert_eq!(b.delay(-100), Duration::ZERO);
    }

    #[test]
    fn exponential_backoff_caps_at_max() {
        let b = BackoffStrategy::Exponential {
            base: Duration::from_millis(100),
            multiplier: 10.0,
            max: Duration::from_secs(1),
        };
        assert_eq!(b.delay(5), Duration::from_secs(1));
    }

    #[test]
    fn fixed_backoff_ignores_attempt_except_negative() {
        let b = BackoffStrategy::Fixed(Duration::from_millis(50));
        assert_eq!(b.delay(0), Duration::from_millis(50));
        assert_eq!(b.delay(10), Duration::from_millis(50));
        assert_eq!(b.delay(-1), Duration::ZERO);
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }
}
