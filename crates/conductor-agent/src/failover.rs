use crate::backends::LlmBackend;
use crate::llm::LlmResponse;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, Message};
use conductor_skills::SkillDescriptor;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{info, warn};

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(u64) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync,
>;

/// Configures retry behaviour for inference calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries per backend before giving up on it.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Determines whether an error is transient and worth retrying.
///
/// Returns `true` for rate-limit (429), timeout, and server errors (5xx).
/// Client errors such as 400 and local failures (I/O, JSON, board
/// validation) are not expected to succeed on retry.
pub fn is_retryable(err: &ConductorError) -> bool {
    match err {
        ConductorError::Http(_) | ConductorError::Agent(_) => {}
        _ => return false,
    }

    let lower = err.to_string().to_lowercase();

    // Non-retryable patterns checked first
    if lower.contains("400") {
        return false;
    }

    lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("overloaded")
        || lower.contains("5xx")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
        || lower.contains("529")
}

/// Computes the backoff delay for a given attempt using exponential backoff
/// capped at `backoff_max_ms`.
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

/// Runs `op`, retrying retryable errors up to `policy.max_retries` times.
///
/// The first non-retryable error, or the last error once retries are spent,
/// is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> ConductorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConductorResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && attempt < policy.max_retries => {
                let delay = compute_backoff(policy, attempt);
                info!(label, attempt, delay_ms = delay, error = %e, "Retryable error, backing off");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(label, attempts = attempt + 1, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}

/// An `LlmBackend` that wraps multiple backends and fails over between them
/// with exponential-backoff retries.
///
/// For each request it tries backends in order. Within each backend it retries
/// up to `max_retries` times for transient errors. If all retries on a backend
/// are exhausted, or a non-retryable error is encountered, it moves to the
/// next backend. If every backend fails, the last error is returned.
pub struct FailoverBackend {
    backends: Vec<Box<dyn LlmBackend>>,
    policy: RetryPolicy,
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl FailoverBackend {
    /// Create a failover backend over `backends`, tried in order.
    pub fn new(backends: Vec<Box<dyn LlmBackend>>, policy: RetryPolicy) -> Self {
        Self {
            backends,
            policy,
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    /// A chain that tries each backend once per call and leaves retrying
    /// to the caller.
    pub fn single_attempt(backends: Vec<Box<dyn LlmBackend>>) -> Self {
        Self::new(
            backends,
            RetryPolicy {
                max_retries: 0,
                ..RetryPolicy::default()
            },
        )
    }

    async fn do_sleep(&self, ms: u64) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(ms).await;
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl LlmBackend for FailoverBackend {
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[SkillDescriptor],
    ) -> ConductorResult<LlmResponse> {
        let mut last_err: Option<ConductorError> = None;

        for (backend_idx, backend) in self.backends.iter().enumerate() {
            for attempt in 0..=self.policy.max_retries {
                match backend.chat(system_prompt, messages, tools).await {
                    Ok(resp) => return Ok(resp),
                    Err(e) => {
                        if !is_retryable(&e) {
                            warn!(
                                backend = backend_idx,
                                attempt,
                                error = %e,
                                "Non-retryable error, moving to next backend"
                            );
                            last_err = Some(e);
                            break;
                        }

                        if attempt < self.policy.max_retries {
                            let delay = compute_backoff(&self.policy, attempt);
                            info!(
                                backend = backend_idx,
                                attempt,
                                delay_ms = delay,
                                error = %e,
                                "Retryable error, backing off"
                            );
                            self.do_sleep(delay).await;
                        }
                        last_err = Some(e);
                    }
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ConductorError::Agent("All failover backends exhausted".into())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct MockBackend {
        results: tokio::sync::Mutex<Vec<ConductorResult<LlmResponse>>>,
        call_count: Arc<AtomicU32>,
    }

    impl MockBackend {
        fn new(results: Vec<ConductorResult<LlmResponse>>) -> Self {
            Self {
                results: tokio::sync::Mutex::new(results),
                call_count: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for MockBackend {
        async fn chat(
            &self,
            _system_prompt: Option<&str>,
            _messages: &[Message],
            _tools: &[SkillDescriptor],
        ) -> ConductorResult<LlmResponse> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().await;
            if results.is_empty() {
                Err(ConductorError::Agent("MockBackend: no more results".into()))
            } else {
                results.remove(0)
            }
        }
    }

    fn instant_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    fn http(msg: &str) -> ConductorResult<LlmResponse> {
        Err(ConductorError::Http(msg.into()))
    }

    fn repeat(msg: &str, n: usize) -> Vec<ConductorResult<LlmResponse>> {
        (0..n).map(|_| http(msg)).collect()
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_try() {
        let failover = FailoverBackend {
            backends: vec![Box::new(MockBackend::new(vec![
                http("429 Too Many Requests"),
                Ok(LlmResponse::Text("ok".into())),
            ]))],
            policy: instant_policy(),
            sleep_fn: Some(Box::new(|_| Box::pin(async {}))),
        };

        match failover.chat(None, &[], &[]).await.unwrap() {
            LlmResponse::Text(t) => assert_eq!(t, "ok"),
            other => panic!("Expected Text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_all_backends_fail_returns_last_error() {
        let failover = FailoverBackend {
            backends: vec![
                Box::new(MockBackend::new(repeat("500 Internal Server Error", 4))),
                Box::new(MockBackend::new(repeat("503 Service Unavailable", 4))),
            ],
            policy: instant_policy(),
            sleep_fn: Some(Box::new(|_| Box::pin(async {}))),
        };

        let err_msg = failover.chat(None, &[], &[]).await.unwrap_err().to_string();
        assert!(err_msg.contains("503"), "Expected last error (503), got: {err_msg}");
    }

    #[tokio::test]
    async fn test_non_retryable_moves_to_next_backend() {
        let first = MockBackend::new(vec![
            http("400 Bad Request"),
            Ok(LlmResponse::Text("should not reach".into())),
        ]);
        let first_calls = first.call_count.clone();
        let failover = FailoverBackend {
            backends: vec![
                Box::new(first),
                Box::new(MockBackend::new(vec![Ok(LlmResponse::Text(
                    "fallback ok".into(),
                ))])),
            ],
            policy: instant_policy(),
            sleep_fn: Some(Box::new(|_| Box::pin(async {}))),
        };

        match failover.chat(None, &[], &[]).await.unwrap() {
            LlmResponse::Text(t) => assert_eq!(t, "fallback ok"),
            other => panic!("Expected Text, got {other:?}"),
        }
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_under_with_retry() {
        let first = MockBackend::new(repeat("503 Service Unavailable", 10));
        let second = MockBackend::new(repeat("503 Service Unavailable", 10));
        let (first_calls, second_calls) = (first.call_count.clone(), second.call_count.clone());
        let failover = FailoverBackend::single_attempt(vec![Box::new(first), Box::new(second)]);

        let result = with_retry(&instant_policy(), "test", || failover.chat(None, &[], &[])).await;

        assert!(result.is_err());
        // One outer layer of retries: four rounds, one call per backend each.
        assert_eq!(first_calls.load(Ordering::SeqCst), 4);
        assert_eq!(second_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_empty_chain_is_an_error() {
        let failover = FailoverBackend::new(Vec::new(), instant_policy());
        assert!(failover.chat(None, &[], &[]).await.is_err());
    }

    #[test]
    fn test_backoff_computation() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        };

        assert_eq!(compute_backoff(&policy, 0), 500);
        assert_eq!(compute_backoff(&policy, 1), 1000);
        assert_eq!(compute_backoff(&policy, 2), 2000);
        assert_eq!(compute_backoff(&policy, 5), 16000);
        assert_eq!(compute_backoff(&policy, 6), 30_000);
        assert_eq!(compute_backoff(&policy, 64), 30_000);
    }

    #[test]
    fn test_is_retryable_classification() {
        assert!(is_retryable(&ConductorError::Http("429 Too Many Requests".into())));
        assert!(is_retryable(&ConductorError::Http("timeout waiting for response".into())));
        assert!(is_retryable(&ConductorError::Http("502 Bad Gateway".into())));
        assert!(is_retryable(&ConductorError::Http("503 Service Unavailable".into())));
        assert!(is_retryable(&ConductorError::Agent("5xx class error".into())));

        assert!(!is_retryable(&ConductorError::Http("400 Bad Request".into())));
        assert!(!is_retryable(&ConductorError::Config("503 in a config file".into())));
        assert!(!is_retryable(&ConductorError::Cancelled));
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_retries() {
        let policy = instant_policy();
        let calls = AtomicU32::new(0);
        let result: ConductorResult<()> = with_retry(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ConductorError::Http("503 Service Unavailable".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_permanent_error() {
        let policy = instant_policy();
        let calls = AtomicU32::new(0);
        let result: ConductorResult<()> = with_retry(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ConductorError::Http("400 Bad Request".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let policy = instant_policy();
        let calls = AtomicU32::new(0);
        let value = with_retry(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ConductorError::Http("429".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
    }
}
