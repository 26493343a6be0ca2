//! Support utilities for [`keen_retry`]'s retry API.
//!
//! The teacher crate only ever retries OpenAI chat completions. This system
//! retries five different kinds of fallible operation (OCR, LLM, object
//! store, record store, audit store — spec.md §5's "suspension points"), each
//! exactly once with exponential backoff (base 2s, cap 60s, spec.md §5/§6),
//! so the retry combinator is lifted out of the LLM-specific code and made
//! generic over any async operation paired with an "is this transient?"
//! classifier.

use core::fmt;
use std::future::Future;

use async_openai::error::OpenAIError;
use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};
use reqwest::StatusCode;

use crate::prelude::*;

/// Macro which implements `?`-like behavior for [`RetryResult`].
macro_rules! try_with_retry_result {
    ($result:expr) => {
        match $result {
            ::keen_retry::RetryResult::Ok { output, .. } => output,
            ::keen_retry::RetryResult::Transient { input, error } => {
                return ::keen_retry::RetryResult::Transient {
                    input,
                    error: From::from(error),
                };
            }
            ::keen_retry::RetryResult::Fatal { input, error } => {
                return ::keen_retry::RetryResult::Fatal {
                    input,
                    error: From::from(error),
                };
            }
        }
    };
}

// Here's a trick to export a macro within a crate as if it were a normal
// symbol.
pub(crate) use try_with_retry_result;

/// Build an [`RetryResult::Ok`] value.
pub(crate) fn retry_result_ok<T, E>(output: T) -> RetryResult<(), (), T, E> {
    RetryResult::Ok {
        reported_input: (),
        output,
    }
}

/// Build an [`RetryResult::Fatal`] value.
pub(crate) fn retry_result_fatal<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Fatal { input: (), error }
}

/// Convert a [`Result`] into a [`RetryResult`].
pub(crate) trait IntoRetryResult<T, E> {
    /// Convert a [`Result`] into a [`RetryResult::Transient`].
    fn into_transient(self) -> RetryResult<(), (), T, E>;

    /// Convert a [`Result`] into a [`RetryResult::Fatal`].
    fn into_fatal(self) -> RetryResult<(), (), T, E>;

    /// Convert a [`Result`] into an appropriate [`RetryResult`],
    /// depending on the return value of `is_transient`.
    fn into_retry_result<F>(self, is_transient: F) -> RetryResult<(), (), T, E>
    where
        F: FnOnce(&E) -> bool;
}

impl<T, E> IntoRetryResult<T, E> for Result<T, E>
where
    E: fmt::Debug,
{
    fn into_transient(self) -> RetryResult<(), (), T, E> {
        match self {
            Ok(value) => RetryResult::Ok {
                reported_input: (),
                output: value,
            },
            Err(error) => {
                debug!("Potentially transient error: {:?}", error);
                RetryResult::Transient { input: (), error }
            }
        }
    }

    fn into_fatal(self) -> RetryResult<(), (), T, E> {
        match self {
            Ok(value) => RetryResult::Ok {
                reported_input: (),
                output: value,
            },
            Err(error) => RetryResult::Fatal { input: (), error },
        }
    }

    fn into_retry_result<F>(self, is_transient: F) -> RetryResult<(), (), T, E>
    where
        F: FnOnce(&E) -> bool,
    {
        match self {
            Ok(value) => RetryResult::Ok {
                reported_input: (),
                output: value,
            },
            Err(error) if is_transient(&error) => {
                debug!("Potentially transient error: {:?}", error);
                RetryResult::Transient { input: (), error }
            }
            Err(error) => RetryResult::Fatal { input: (), error },
        }
    }
}

/// Is this error a known transient error?
///
/// By default, we assume errors are not transient, until they've been
/// observed in the wild, investigated and determined to be transient. This
/// prevents us from doing large numbers of retries with exponential backoff
/// on errors that will never resolve.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

impl IsKnownTransient for OpenAIError {
    fn is_known_transient(&self) -> bool {
        match self {
            OpenAIError::Reqwest(error) => error.is_known_transient(),
            _ => false,
        }
    }
}

impl IsKnownTransient for reqwest::Error {
    fn is_known_transient(&self) -> bool {
        if let Some(status) = self.status() {
            let transient_failures = [
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ];
            transient_failures.contains(&status)
        } else {
            // Assume all other kinds of HTTP errors are transient. Unfortunately,
            // there are a lot of things that can go wrong, and `reqwest` doesn't
            // expose most of them in sufficient detail to be certain which are
            // transient.
            true
        }
    }
}

/// The retry policy shared by every suspension point in spec.md §5: retry
/// once, with exponential backoff starting at 2s and capped at 60s.
fn stage_jitter() -> ExponentialJitter {
    ExponentialJitter::FromBackoffRange {
        backoff_range_millis: 2_000..=60_000,
        re_attempts: 1,
        jitter_ratio: 0.1,
    }
}

/// Run a fallible async operation with the spec's "retry once with
/// exponential backoff" policy (spec.md §5, §7), classifying failures as
/// transient or fatal with `is_transient`.
///
/// This is the generic form of the retry combinator the teacher crate wrote
/// specifically for OpenAI chat completions (`queues/chat.rs`); every
/// suspension point in this system (OCR, LLM, object store, record store,
/// audit store) goes through this one function instead of reimplementing
/// backoff math per capability.
pub async fn retry_stage<F, Fut, T, E>(mut op: F, is_transient: impl Fn(&E) -> bool) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Debug + Into<anyhow::Error>,
{
    let first = op().await.into_retry_result(&is_transient);
    let result: ResolvedResult<(), (), T, E> = first
        .retry_with_async(|_| async { op().await.into_retry_result(&is_transient) })
        .with_exponential_jitter(stage_jitter)
        .await;
    match result {
        ResolvedResult::Ok { output, .. } | ResolvedResult::Recovered { output, .. } => Ok(output),
        ResolvedResult::Fatal { error, .. } => Err(error.into()),
        ResolvedResult::GivenUp { fatal_error, .. }
        | ResolvedResult::Unrecoverable { fatal_error, .. } => Err(fatal_error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Boom;
    impl From<Boom> for anyhow::Error {
        fn from(_: Boom) -> Self {
            anyhow!("boom")
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_once_then_succeeds() {
        let attempts = AtomicUsize::new(0);
        let result = retry_stage(
            || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 { Err(Boom) } else { Ok(42) }
            },
            |_| true,
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let attempts = AtomicUsize::new(0);
        let result: Result<i32> = retry_stage(
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Boom)
            },
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
