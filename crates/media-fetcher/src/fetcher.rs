//! Retrying fetcher

use crate::error::{FetchError, Result};
use crate::transport::{HttpTransport, Transport};
use crate::types::{FetchConfig, FetchRequest, Priority};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Fetches blobs with per-priority timeouts and exponential backoff
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, config: FetchConfig) -> Self {
        Self { transport, config }
    }

    /// Create a fetcher backed by a fresh HTTP client
    pub fn http(config: FetchConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new()?), config))
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch a URL, retrying transient failures.
    ///
    /// Returns the complete payload or a terminal error once the attempt
    /// ceiling is reached. Invalid URLs fail immediately.
    pub async fn fetch(&self, url: &str, priority: Priority) -> Result<Bytes> {
        let (_priority_tx, priority) = watch::channel(priority);
        self.fetch_watched(url, priority).await
    }

    /// Fetch a URL whose priority may be raised while it is in flight.
    ///
    /// Every attempt resolves its timeout from the current priority, and a
    /// raise during an attempt pulls that attempt's deadline in. Lowering
    /// the priority never extends a deadline.
    pub async fn fetch_watched(
        &self,
        url: &str,
        mut priority: watch::Receiver<Priority>,
    ) -> Result<Bytes> {
        url::Url::parse(url)?;
        let max_attempts = self.config.max_attempts.max(1);
        let mut current = *priority.borrow_and_update();
        let mut failures = 0;

        loop {
            let mut request = FetchRequest::new(url, current, &self.config);
            let outcome = self.attempt(&mut request, &mut priority).await;
            current = request.priority;

            let err = match outcome {
                Ok(data) => {
                    if failures > 0 {
                        debug!(url = %request.url, attempts = failures + 1, "Fetch succeeded after retry");
                    }
                    return Ok(data);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };

            failures += 1;
            if failures >= max_attempts {
                warn!(
                    url = %request.url,
                    priority = %request.priority,
                    attempts = failures,
                    error = %err,
                    "Fetch retries exhausted"
                );
                return Err(FetchError::Exhausted {
                    attempts: failures,
                    last: Box::new(err),
                });
            }

            let delay = self.config.backoff_after(failures);
            warn!(
                url = %request.url,
                error = %err,
                "Fetch failed, retrying in {:?} (attempt {}/{})",
                delay,
                failures + 1,
                max_attempts
            );
            tokio::time::sleep(delay).await;
            if priority.has_changed().unwrap_or(false) {
                current = current.max(*priority.borrow_and_update());
            }
        }
    }

    /// One transport call, bounded by the timeout of the most urgent
    /// priority seen since it started
    async fn attempt(
        &self,
        request: &mut FetchRequest,
        priority: &mut watch::Receiver<Priority>,
    ) -> Result<Bytes> {
        let started = Instant::now();
        let url = request.url.clone();
        let mut call = self.transport.get(&url);
        let mut watching = true;

        loop {
            tokio::select! {
                result = &mut call => return result,
                _ = tokio::time::sleep_until(started + request.timeout) => {
                    return Err(FetchError::Timeout(request.timeout));
                }
                changed = priority.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let raised = *priority.borrow_and_update();
                    if raised > request.priority {
                        debug!(url = %url, from = %request.priority, to = %raised, "Fetch priority raised");
                        request.priority = raised;
                        request.timeout = self.config.timeout_for(raised);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Fails the first `failures` calls with the given error kind, then succeeds
    struct FlakyTransport {
        failures: u32,
        status: Option<u16>,
        calls: AtomicU32,
        call_times: Mutex<Vec<Instant>>,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                status: None,
                calls: AtomicU32::new(0),
                call_times: Mutex::new(Vec::new()),
            }
        }

        fn with_status(failures: u32, status: u16) -> Self {
            Self {
                status: Some(status),
                ..Self::new(failures)
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn get(&self, _url: &str) -> Result<Bytes> {
            self.call_times.lock().unwrap().push(Instant::now());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(match self.status {
                    Some(code) => FetchError::Status(code),
                    None => FetchError::Timeout(Duration::from_secs(8)),
                });
            }
            Ok(Bytes::from_static(b"payload"))
        }
    }

    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn get(&self, _url: &str) -> Result<Bytes> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Bytes::new())
        }
    }

    /// Hangs on the first call, answers every later one immediately
    struct StallOnceTransport {
        stall: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for StallOnceTransport {
        async fn get(&self, _url: &str) -> Result<Bytes> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(self.stall).await;
            }
            Ok(Bytes::from_static(b"payload"))
        }
    }

    fn config(base_ms: u64, max_attempts: u32) -> FetchConfig {
        FetchConfig {
            base_delay: Duration::from_millis(base_ms),
            max_attempts,
            ..FetchConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_timeouts_then_success() {
        let transport = Arc::new(FlakyTransport::new(2));
        let fetcher = Fetcher::new(transport.clone(), config(100, 3));

        let data = fetcher
            .fetch("https://cdn.example.com/a.jpg", Priority::High)
            .await
            .unwrap();
        assert_eq!(&data[..], b"payload");

        let times = transport.call_times.lock().unwrap();
        assert_eq!(times.len(), 3);
        let before_third = times[2] - times[1];
        assert!(before_third >= Duration::from_millis(400));
        assert!(before_third < Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let transport = Arc::new(FlakyTransport::with_status(10, 503));
        let fetcher = Fetcher::new(transport.clone(), config(10, 3));

        let err = fetcher
            .fetch("https://cdn.example.com/a.jpg", Priority::Normal)
            .await
            .unwrap_err();

        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::Status(503)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_request_times_out_by_priority() {
        let fetcher = Fetcher::new(Arc::new(HangingTransport), config(10, 1));
        let started = Instant::now();

        let err = fetcher
            .fetch("https://cdn.example.com/slow.mp4", Priority::High)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Exhausted { attempts: 1, .. }));
        let high_timeout = FetchConfig::default().high_timeout;
        assert!(started.elapsed() >= high_timeout);
        assert!(started.elapsed() < high_timeout + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_invalid_url_is_not_retried() {
        let transport = Arc::new(FlakyTransport::new(0));
        let fetcher = Fetcher::new(transport.clone(), config(10, 3));

        let err = fetcher.fetch("not a url", Priority::High).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raised_priority_shortens_running_attempt() {
        let transport = Arc::new(StallOnceTransport {
            stall: Duration::from_secs(25),
            calls: AtomicU32::new(0),
        });
        let fetcher = Arc::new(Fetcher::new(transport.clone(), config(500, 3)));
        let (raise, priority) = watch::channel(Priority::Low);
        let started = Instant::now();

        let task = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move {
                fetcher
                    .fetch_watched("https://cdn.example.com/a.jpg", priority)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        raise.send(Priority::High).unwrap();

        let data = task.await.unwrap().unwrap();
        assert_eq!(&data[..], b"payload");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

        // high timeout plus one backoff step, well short of the stall
        let high_timeout = FetchConfig::default().high_timeout;
        assert!(started.elapsed() >= high_timeout);
        assert!(started.elapsed() < high_timeout + Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lowered_priority_keeps_deadline() {
        let fetcher = Fetcher::new(Arc::new(HangingTransport), config(10, 1));
        let (lower, priority) = watch::channel(Priority::High);
        let started = Instant::now();

        let fetch = fetcher.fetch_watched("https://cdn.example.com/slow.mp4", priority);
        let lowering = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            lower.send(Priority::Low).unwrap();
        };
        let (result, ()) = tokio::join!(fetch, lowering);

        assert!(matches!(result, Err(FetchError::Exhausted { attempts: 1, .. })));
        let high_timeout = FetchConfig::default().high_timeout;
        assert!(started.elapsed() < high_timeout + Duration::from_secs(1));
    }
}
