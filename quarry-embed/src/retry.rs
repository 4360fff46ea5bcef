//! Timeout, retry, and backoff policy applied around every provider call.
//!
//! The retrieval core never calls an [`EmbeddingProvider`] directly: every
//! call goes through a [`RetryPolicy`], which bounds the call with a
//! deadline and retries transient failures with exponential backoff.
//! Non-transient failures (malformed input, configuration problems) are
//! surfaced immediately; after the retry budget is exhausted the last error
//! is returned so the caller can decide to skip the chunk or fail the
//! query.

use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult};
use std::future::Future;
use std::time::Duration;

/// Bounded retry with exponential backoff and a per-call deadline.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on every further retry.
    pub initial_backoff: Duration,
    /// Deadline for each individual provider call.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, timeout: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Embed a single text under this policy.
    pub async fn embed_text(&self, provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
        self.run(|| provider.embed_text(text)).await
    }

    /// Embed a batch of texts under this policy.
    pub async fn embed_texts(
        &self,
        provider: &dyn EmbeddingProvider,
        texts: &[String],
    ) -> Result<EmbeddingResult> {
        self.run(|| provider.embed_texts(texts)).await
    }

    async fn run<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(EmbedError::Timeout {
                    timeout: self.timeout,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "transient embedding failure (attempt {attempt}/{}), retrying in {backoff:?}: {e}",
                        self.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that fails transiently for the first `failures` calls.
    struct FlakyProvider {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(EmbedError::unavailable("warming up"))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed_text(text).await?);
            }
            Ok(EmbeddingResult::new(out))
        }

        fn embedding_dimension(&self) -> usize {
            2
        }

        fn provider_name(&self) -> &str {
            "flaky"
        }
    }

    /// Provider that always rejects its input.
    struct MalformedProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for MalformedProvider {
        async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EmbedError::malformed("bad input"))
        }

        async fn embed_texts(&self, _texts: &[String]) -> Result<EmbeddingResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EmbedError::malformed("bad input"))
        }

        fn embedding_dimension(&self) -> usize {
            2
        }

        fn provider_name(&self) -> &str {
            "malformed"
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let provider = FlakyProvider {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let vector = fast_policy().embed_text(&provider, "hello").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let provider = FlakyProvider {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let err = fast_policy().embed_text(&provider, "hello").await.unwrap_err();
        assert!(matches!(err, EmbedError::Unavailable { .. }));
        // One initial attempt plus three retries.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn malformed_input_is_not_retried() {
        let provider = MalformedProvider {
            calls: AtomicUsize::new(0),
        };
        let err = fast_policy().embed_text(&provider, "hello").await.unwrap_err();
        assert!(matches!(err, EmbedError::Malformed { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calls_hit_the_deadline() {
        struct StallingProvider;

        #[async_trait]
        impl EmbeddingProvider for StallingProvider {
            async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(vec![0.0])
            }

            async fn embed_texts(&self, _texts: &[String]) -> Result<EmbeddingResult> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(EmbeddingResult::new(Vec::new()))
            }

            fn embedding_dimension(&self) -> usize {
                1
            }

            fn provider_name(&self) -> &str {
                "stalling"
            }
        }

        let policy = RetryPolicy::new(0, Duration::from_millis(1), Duration::from_millis(20));
        let err = policy.embed_text(&StallingProvider, "hello").await.unwrap_err();
        assert!(matches!(err, EmbedError::Timeout { .. }));
    }
}
