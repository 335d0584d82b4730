//! Retry logic with exponential backoff for transient errors.
//!
//! Only network failures are retried. The recipe builder never retries on
//! its own; callers that want retries wrap their backend in [`Retrying`].

use crate::backend::Backend;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::types::{MergeOutcome, RetryConfig, RevisionId};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Callback trait for retry progress notifications.
pub trait RetryCallback: Send + Sync {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Current attempt number (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &Error, _delay: Duration) {}
}

/// Callback that reports retries through the `log` facade.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration) {
        log::warn!(
            "Attempt {attempt}/{max_attempts} failed ({}): {error}. Retrying in {:.1}s...",
            error.category().description(),
            delay.as_secs_f64()
        );
    }
}

/// Execute an operation with retry logic.
///
/// Retries the operation if it returns a retryable error, using exponential
/// backoff between attempts. The cancel token is checked before every
/// attempt and while waiting.
///
/// # Returns
/// The result of the operation, or the last error if all attempts failed.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    cancel: &CancelToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last_error: Option<Error> = None;

    for attempt in 0..config.max_attempts {
        cancel.check()?;

        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }

                if attempt + 1 >= config.max_attempts {
                    last_error = Some(e);
                    break;
                }

                let delay = config.delay_for_attempt(attempt);
                if cancel.remaining().is_some_and(|left| left < delay) {
                    log::debug!("Deadline falls before the next attempt, giving up");
                    return Err(e);
                }
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, config.max_attempts, &e, delay);
                }

                sleep_unless_cancelled(delay, cancel)?;
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Other("retry exhausted".to_string())))
}

fn sleep_unless_cancelled(delay: Duration, cancel: &CancelToken) -> Result<()> {
    const SLICE: Duration = Duration::from_millis(50);

    let mut left = delay;
    while !left.is_zero() {
        cancel.check()?;
        let step = left.min(SLICE);
        thread::sleep(step);
        left = left.saturating_sub(step);
    }
    Ok(())
}

/// A backend that retries network failures of the backend it wraps.
pub struct Retrying<B> {
    inner: B,
    config: RetryConfig,
    callback: Box<dyn RetryCallback>,
}

impl<B: Backend> Retrying<B> {
    /// Wrap `inner`, logging each retry.
    pub fn new(inner: B, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            callback: Box::new(LogCallback),
        }
    }

    /// Replace the retry callback.
    #[must_use]
    pub fn with_callback(mut self, callback: impl RetryCallback + 'static) -> Self {
        self.callback = Box::new(callback);
        self
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn retry<T>(&self, cancel: &CancelToken, operation: impl FnMut() -> Result<T>) -> Result<T> {
        with_retry(&self.config, Some(self.callback.as_ref()), cancel, operation)
    }
}

impl<B: Backend> Backend for Retrying<B> {
    fn branch_tip(&self, branch: &str, cancel: &CancelToken) -> Result<RevisionId> {
        self.retry(cancel, || self.inner.branch_tip(branch, cancel))
    }

    fn resolve_revision_id(
        &self,
        branch: &str,
        id: &str,
        cancel: &CancelToken,
    ) -> Result<RevisionId> {
        self.retry(cancel, || self.inner.resolve_revision_id(branch, id, cancel))
    }

    fn resolve_tag(&self, branch: &str, tag: &str, cancel: &CancelToken) -> Result<RevisionId> {
        self.retry(cancel, || self.inner.resolve_tag(branch, tag, cancel))
    }

    fn revision_at_or_before(
        &self,
        branch: &str,
        when: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<RevisionId> {
        self.retry(cancel, || {
            self.inner.revision_at_or_before(branch, when, cancel)
        })
    }

    fn checkout(
        &self,
        branch: &str,
        revision: &RevisionId,
        target: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.retry(cancel, || {
            self.inner.checkout(branch, revision, target, cancel)
        })
    }

    fn merge(
        &self,
        tree: &Path,
        branch: &str,
        revision: &RevisionId,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<MergeOutcome> {
        self.retry(cancel, || {
            self.inner.merge(tree, branch, revision, message, cancel)
        })
    }

    fn revno(
        &self,
        branch: &str,
        revision: &RevisionId,
        cancel: &CancelToken,
    ) -> Result<Option<u64>> {
        self.retry(cancel, || self.inner.revno(branch, revision, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let config = RetryConfig::no_retry();
        let result = with_retry(&config, None, &CancelToken::new(), || Ok::<_, Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_retry_non_retryable_error() {
        let attempts = Rc::new(Cell::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<()> = with_retry(&fast_config(5), None, &CancelToken::new(), || {
            attempts_clone.set(attempts_clone.get() + 1);
            Err(Error::BranchNotFound {
                branch: "lp:foo".to_string(),
            })
        });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let attempts = Rc::new(Cell::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry(&fast_config(3), None, &CancelToken::new(), || {
            let current = attempts_clone.get();
            attempts_clone.set(current + 1);
            if current < 2 {
                Err(Error::Network {
                    message: "timeout".to_string(),
                })
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        struct CountingCallback(Arc<AtomicU32>);
        impl RetryCallback for CountingCallback {
            fn on_retry(&self, _: u32, _: u32, _: &Error, _: Duration) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicU32::new(0));
        let callback = CountingCallback(count.clone());

        let result: Result<()> =
            with_retry(&fast_config(3), Some(&callback), &CancelToken::new(), || {
                Err(Error::Network {
                    message: "timeout".to_string(),
                })
            });

        assert!(matches!(result, Err(Error::Network { .. })));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_gives_up_when_deadline_precedes_next_attempt() {
        let config = RetryConfig::new(5, Duration::from_secs(60), 2.0);
        let cancel = CancelToken::with_timeout(Duration::from_secs(30));
        let calls = Cell::new(0);

        let started = std::time::Instant::now();
        let result: Result<()> = with_retry(&config, None, &cancel, || {
            calls.set(calls.get() + 1);
            Err(Error::Network {
                message: "connection reset".to_string(),
            })
        });

        assert!(matches!(result, Err(Error::Network { .. })));
        assert_eq!(calls.get(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancelled_before_first_attempt() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let calls = Cell::new(0);

        let result = with_retry(&fast_config(3), None, &cancel, || {
            calls.set(calls.get() + 1);
            Ok(())
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_retrying_backend_recovers_from_network_failures() {
        let memory = MemoryBackend::new();
        memory.commit("lp:base", "r1", Utc::now(), &[("README", "hello")]);
        memory.fail_times("lp:base", 2);

        let backend = Retrying::new(memory, fast_config(3)).with_callback(NoCallback);
        let tip = backend.branch_tip("lp:base", &CancelToken::new()).unwrap();
        assert_eq!(tip.as_str(), "r1");
    }

    #[test]
    fn test_retrying_backend_gives_up() {
        let memory = MemoryBackend::new();
        memory.commit("lp:base", "r1", Utc::now(), &[]);
        memory.fail_times("lp:base", 5);

        let backend = Retrying::new(memory, fast_config(2)).with_callback(NoCallback);
        let err = backend.branch_tip("lp:base", &CancelToken::new()).unwrap_err();
        assert!(err.is_retryable());
    }
}
