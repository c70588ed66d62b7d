//! Model invocation with retry and exponential backoff.
//!
//! ## Retry Strategy
//!
//! Only transport failures (network, auth, timeout) are retried: they are
//! often transient under load. A refusal or a malformed reply ends the
//! invocation at once because asking again costs tokens without changing the
//! answer. The wait before retry `n` is `retry_backoff_ms * 2^(n-1)`, so with
//! the 1 s default and 3 attempts the sequence is 1 s → 2 s.

use crate::error::PipelineError;
use crate::pipeline::backend::{ModelBackend, ModelRequest, RawModelOutput};
use crate::progress::PipelineObserver;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Attempt bound and backoff for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Treated as at least 1.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based). Zero for the first attempt.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempt - 2);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

/// Call the backend until it succeeds, fails terminally, or the attempt bound
/// is reached.
pub async fn invoke(
    backend: &dyn ModelBackend,
    request: &ModelRequest,
    policy: RetryPolicy,
    observer: &dyn PipelineObserver,
) -> Result<RawModelOutput, PipelineError> {
    let max_attempts = policy.max_attempts.max(1);
    let start = Instant::now();
    let mut attempt = 1;

    loop {
        let backoff = policy.backoff_before(attempt);
        if !backoff.is_zero() {
            warn!(
                "{}: retry {}/{} after {}ms",
                backend.name(),
                attempt,
                max_attempts,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        match backend.generate(request).await {
            Ok(output) => {
                debug!(
                    "{}: reply after {} attempt(s), {:?}",
                    backend.name(),
                    attempt,
                    start.elapsed()
                );
                return Ok(output);
            }
            Err(e) => {
                let will_retry = e.is_retryable() && attempt < max_attempts;
                warn!("{}: attempt {} failed: {}", backend.name(), attempt, e);
                observer.on_attempt_failed(attempt, max_attempts, &e.to_string(), will_retry);
                if !will_retry {
                    return Err(PipelineError::from_backend(e, attempt));
                }
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, FailureKind};
    use crate::progress::NoopObserver;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays a script of results, repeating the last one.
    struct Scripted {
        script: Mutex<Vec<Result<RawModelOutput, BackendError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(script: Vec<Result<RawModelOutput, BackendError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ModelBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _r: &ModelRequest) -> Result<RawModelOutput, BackendError> {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    fn request() -> ModelRequest {
        ModelRequest {
            blocks: vec![],
            temperature: 0.1,
            max_tokens: 10,
        }
    }

    const FAST: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        base_backoff_ms: 1,
    };

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_attempts: 4,
            base_backoff_ms: 1000,
        };
        assert_eq!(p.backoff_before(1), Duration::ZERO);
        assert_eq!(p.backoff_before(2), Duration::from_millis(1000));
        assert_eq!(p.backoff_before(3), Duration::from_millis(2000));
        assert_eq!(p.backoff_before(4), Duration::from_millis(4000));
    }

    #[test]
    fn transport_failures_exhaust_all_attempts() {
        let backend = Scripted::new(vec![Err(BackendError::Transport("503".into()))]);
        let err = tokio_test::block_on(invoke(&backend, &request(), FAST, &NoopObserver)).unwrap_err();
        assert_eq!(backend.calls(), 3);
        assert_eq!(err.kind(), FailureKind::Transport);
        assert!(matches!(err, PipelineError::Transport { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn refusal_is_not_retried() {
        let backend = Scripted::new(vec![Err(BackendError::Refusal("policy".into()))]);
        let err = invoke(&backend, &request(), FAST, &NoopObserver).await.unwrap_err();
        assert_eq!(backend.calls(), 1);
        assert_eq!(err.kind(), FailureKind::Refusal);
    }

    #[tokio::test]
    async fn malformed_is_not_retried() {
        let backend = Scripted::new(vec![Err(BackendError::Malformed("empty".into()))]);
        let err = invoke(&backend, &request(), FAST, &NoopObserver).await.unwrap_err();
        assert_eq!(backend.calls(), 1);
        assert_eq!(err.kind(), FailureKind::Parse);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let backend = Scripted::new(vec![
            Err(BackendError::Transport("reset".into())),
            Ok(RawModelOutput::FreeText("ok".into())),
        ]);
        let out = invoke(&backend, &request(), FAST, &NoopObserver).await.unwrap();
        assert_eq!(out, RawModelOutput::FreeText("ok".into()));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let backend = Scripted::new(vec![Err(BackendError::Transport("down".into()))]);
        let policy = RetryPolicy {
            max_attempts: 0,
            base_backoff_ms: 1,
        };
        let _ = invoke(&backend, &request(), policy, &NoopObserver).await;
        assert_eq!(backend.calls(), 1);
    }
}
