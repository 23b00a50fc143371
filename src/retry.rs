//! Bounded retry of transport calls with exponential backoff.

use crate::error::Result;
use std::thread;
use std::time::Duration;

/// Delay before the first re-issue. Doubles with every further attempt.
pub const BASE_DELAY: Duration = Duration::from_millis(10);

/// Upper bound on a single delay.
pub const MAX_DELAY: Duration = Duration::from_secs(1);

/// Delay before re-issue number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.max(1).saturating_sub(1).min(16);
    BASE_DELAY.saturating_mul(1 << exponent).min(MAX_DELAY)
}

/// Runs `op`, re-issuing it up to `max_retries` more times while it fails
/// with a retryable error, sleeping [`backoff_delay`] between attempts.
/// Non-retryable errors return immediately.
pub fn with_retries<T, F>(max_retries: u32, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = backoff_delay(attempt);
                log::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what,
                    attempt,
                    max_retries + 1,
                    delay,
                    e
                );
                thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::time::Instant;

    #[test]
    fn test_retries_transport_errors() {
        let mut calls = 0;
        let value = with_retries(3, "op", || {
            calls += 1;
            if calls < 3 {
                Err(Error::transport("flaky"))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_gives_up_after_bound() {
        let mut calls = 0;
        let result: Result<()> = with_retries(2, "op", || {
            calls += 1;
            Err(Error::transport("down"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_does_not_retry_corruption() {
        let mut calls = 0;
        let result: Result<()> = with_retries(5, "op", || {
            calls += 1;
            Err(Error::corruption("bad"))
        });
        assert!(matches!(result, Err(Error::Corruption(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        assert_eq!(backoff_delay(1), Duration::from_millis(10));
        assert_eq!(backoff_delay(2), Duration::from_millis(20));
        assert_eq!(backoff_delay(3), Duration::from_millis(40));
        assert_eq!(backoff_delay(8), MAX_DELAY);
        assert_eq!(backoff_delay(u32::MAX), MAX_DELAY);
    }

    #[test]
    fn test_retries_wait_between_attempts() {
        let started = Instant::now();
        let result: Result<()> = with_retries(2, "op", || Err(Error::transport("down")));
        assert!(result.is_err());
        // 10ms before the first re-issue, 20ms before the second
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
