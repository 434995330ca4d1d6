use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry an idempotent async operation with doubling delay. Order
/// placement must never go through here - a retried placement can fill
/// twice.
pub async fn retry_async<F, Fut, T, E>(
    operation_name: &str,
    max_retries: u32,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = Duration::from_millis(100);

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_retries {
                    return Err(anyhow::anyhow!(
                        "{} failed after {} attempts: {}",
                        operation_name,
                        attempt,
                        e
                    ));
                }
                warn!(
                    "{} attempt {}/{} failed: {}. Retrying in {:?}",
                    operation_name, attempt, max_retries, e, delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(5));
            }
        }
    }
}

/// Per-connector circuit breaker. After `threshold` consecutive failures
/// the connector is skipped during scans until `reset_timeout` passes.
pub struct CircuitBreaker {
    failures: std::sync::atomic::AtomicU32,
    last_failure: parking_lot::Mutex<Option<std::time::Instant>>,
    threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failures: std::sync::atomic::AtomicU32::new(0),
            last_failure: parking_lot::Mutex::new(None),
            threshold,
            reset_timeout,
        }
    }

    pub fn is_open(&self) -> bool {
        let failures = self.failures.load(std::sync::atomic::Ordering::Relaxed);
        if failures < self.threshold {
            return false;
        }

        if let Some(last) = *self.last_failure.lock() {
            if last.elapsed() > self.reset_timeout {
                self.reset();
                return false;
            }
        }

        true
    }

    pub fn record_success(&self) {
        self.failures.store(0, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        *self.last_failure.lock() = Some(std::time::Instant::now());
    }

    pub fn reset(&self) {
        self.failures.store(0, std::sync::atomic::Ordering::Relaxed);
        *self.last_failure.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_first_success() {
        let mut calls = 0;
        let result = retry_async("op", 3, || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 2 {
                    Err("transient")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let result: Result<()> =
            retry_async("op", 2, || async { Err::<(), _>("always down") }).await;
        assert!(result.is_err());
    }

    #[test]
    fn breaker_opens_at_threshold_and_resets() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(1));
        assert!(!breaker.is_open());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(5));
        // reset_timeout elapsed
        assert!(!breaker.is_open());
        breaker.record_success();
        assert!(!breaker.is_open());
    }
}
