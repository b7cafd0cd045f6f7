//! Connection to the runtime debug socket with retries
//!
//! A freshly spawned runtime needs a moment before it listens on its debug
//! port, so the first attempts are expected to be refused. The retry loop
//! covers that window without any explicit readiness signal.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::common::config::ConnectConfig;
use crate::common::{Error, Result};

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, at least one is always made
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub retry_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_factor: f64,
    /// Cap for the delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Fixed delay between a fixed number of attempts
    pub fn fixed(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
            backoff_factor: 1.0,
            max_delay: retry_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let delay = self.retry_delay.mul_f64(factor);
        delay.min(self.max_delay.max(self.retry_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ConnectConfig::default())
    }
}

impl From<&ConnectConfig> for RetryPolicy {
    fn from(config: &ConnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Connect to the runtime's debug port
#[tracing::instrument(skip(policy), fields(attempts = policy.max_attempts))]
pub async fn connect(host: &str, port: u16, policy: &RetryPolicy) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    let stream = connect_with(&addr, policy, || TcpStream::connect(addr.clone())).await?;
    // Commands are small and latency matters more than throughput
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Retry `dial` according to `policy`
///
/// Each call to `dial` consumes one attempt. The sleep between attempts is
/// asynchronous so other sessions keep running.
pub async fn connect_with<T, F, Fut>(addr: &str, policy: &RetryPolicy, mut dial: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match dial().await {
            Ok(conn) => {
                tracing::debug!(addr, attempt, "Connected to runtime");
                return Ok(conn);
            }
            Err(e) if attempt >= max_attempts => {
                tracing::warn!(addr, attempt, error = %e, "Giving up connecting to runtime");
                return Err(Error::ConnectionFailed {
                    addr: addr.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::trace!(addr, attempt, error = %e, ?delay, "Runtime not reachable yet");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn refused() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "refused")
    }

    #[tokio::test]
    async fn test_succeeds_on_last_allowed_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));

        let result = connect_with("test", &policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 3 {
                    Ok(n)
                } else {
                    Err(refused())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fails_after_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));

        let result: Result<()> = connect_with("test", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(refused()) }
        })
        .await;

        match result {
            Err(Error::ConnectionFailed { attempts, source, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source.kind(), io::ErrorKind::ConnectionRefused);
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(0, Duration::from_millis(1));

        let result: Result<()> = connect_with("test", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(refused()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            retry_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
    }

    #[test]
    fn test_default_policy_is_fixed() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.delay_after(1), policy.delay_after(5));
    }

    #[tokio::test]
    async fn test_connect_to_listening_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let policy = RetryPolicy::fixed(2, Duration::from_millis(1));
        let stream = connect("127.0.0.1", port, &policy).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }
}
