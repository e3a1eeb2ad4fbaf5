use std::future::Future;

/// Bounded immediate retry, shared by the portal's network phases and the
/// mail transport: up to `max_retries` retries after the initial attempt,
/// no backoff, gated by a retryable-error predicate.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        RetryPolicy { max_retries }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// the retry bound is exhausted.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut remaining = self.max_retries;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if remaining > 0 && retryable(&err) => remaining -= 1,
                Err(err) => return Err(err),
            }
        }
    }

    /// Same policy for synchronous operations.
    pub fn run_blocking<T, E>(
        &self,
        mut op: impl FnMut() -> Result<T, E>,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E> {
        let mut remaining = self.max_retries;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if remaining > 0 && retryable(&err) => remaining -= 1,
                Err(err) => return Err(err),
            }
        }
    }
}
