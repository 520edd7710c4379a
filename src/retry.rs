//! Bounded exponential backoff around fallible network calls.

use std::fmt;
use std::time::Duration;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor applied per retry.
    pub multiplier: f64,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            initial_delay: Duration::from_millis(1500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    /// A policy that retries without sleeping.
    pub fn immediate(retries: u32) -> Self {
        Self {
            retries,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based):
    /// `initial_delay × multiplier^(retry−1)`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Run `op` until it succeeds or `policy.retries` retries are spent.
///
/// Every failure is retried identically. The last error is returned once the
/// budget is exhausted.
pub fn with_retries<T, E, F>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut retry = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if retry < policy.retries => {
                retry += 1;
                let delay = policy.delay_for(retry);
                let message: String = err.to_string().chars().take(120).collect();
                tracing::warn!(
                    operation = label,
                    retry,
                    retries = policy.retries,
                    delay_secs = delay.as_secs_f64(),
                    error = %message,
                    "retrying after error"
                );
                std::thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn default_schedule_grows_by_half_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_millis(1500));
        assert_eq!(p.delay_for(2), Duration::from_millis(2250));
        assert_eq!(p.delay_for(3).as_millis(), 3375);
        assert_eq!(p.delay_for(20), Duration::from_secs(60));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn success_on_first_try_calls_once() {
        let calls = Cell::new(0);
        let out: Result<u32, String> = with_retries(&RetryPolicy::immediate(5), "put", || {
            calls.set(calls.get() + 1);
            Ok(7)
        });
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn recovers_after_transient_failures() {
        let calls = Cell::new(0);
        let out: Result<&str, String> = with_retries(&RetryPolicy::immediate(5), "put", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(format!("503 attempt {}", calls.get()))
            } else {
                Ok("stored")
            }
        });
        assert_eq!(out.unwrap(), "stored");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhaustion_returns_last_error() {
        let calls = Cell::new(0);
        let out: Result<(), String> = with_retries(&RetryPolicy::immediate(5), "put", || {
            calls.set(calls.get() + 1);
            Err(format!("failure {}", calls.get()))
        });
        assert_eq!(out.unwrap_err(), "failure 6");
        assert_eq!(calls.get(), 6);
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let calls = Cell::new(0);
        let out: Result<(), String> = with_retries(&RetryPolicy::immediate(0), "put", || {
            calls.set(calls.get() + 1);
            Err("rejected".into())
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 1);
    }
}
