//! Bounded retry for cloud calls that fail during IAM policy propagation.
//!
//! Newly granted service-account permissions take a short while to become
//! visible to the image-import backend; the fix is simply to try again.
//! Nothing else in the pipeline retries: downloads are restarted by the
//! operator and terminal automation cannot be resumed mid-sequence.

use std::time::Duration;

use color_eyre::eyre::Report;
use color_eyre::Result;
use tracing::warn;

/// Attempt budget and inter-attempt delay for a retried call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Fixed sleep between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(10),
        }
    }
}

/// Run `op` up to the policy's attempt budget, sleeping between attempts.
///
/// Only errors for which `retryable` returns true are retried; any other
/// error aborts immediately. The final attempt's error is returned as-is.
pub fn run_with_retry<T>(
    policy: RetryPolicy,
    what: &str,
    retryable: impl Fn(&Report) -> bool,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_attempts && retryable(&e) => {
                warn!(
                    "{what} failed (attempt {attempt}/{}), retrying in {:?}: {e}",
                    policy.max_attempts, policy.delay
                );
                std::thread::sleep(policy.delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_succeeds_after_transient_failures() -> Result<()> {
        let mut calls = 0;
        let out = run_with_retry(fast_policy(3), "op", |_| true, || {
            calls += 1;
            if calls < 3 {
                Err(eyre!("transient"))
            } else {
                Ok(calls)
            }
        })?;
        assert_eq!(out, 3);
        Ok(())
    }

    #[test]
    fn test_exhausts_attempt_budget() {
        let mut calls = 0;
        let res: Result<()> = run_with_retry(fast_policy(3), "op", |_| true, || {
            calls += 1;
            Err(eyre!("always"))
        });
        assert!(res.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_non_retryable_aborts_immediately() {
        let mut calls = 0;
        let res: Result<()> = run_with_retry(fast_policy(5), "op", |_| false, || {
            calls += 1;
            Err(eyre!("fatal"))
        });
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }
}
