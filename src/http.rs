//! The HTTP worker pool: the single asynchronous stage in an otherwise
//! synchronous, thread-per-stage pipeline. A background Tokio runtime drains
//! a channel of outgoing requests with up to `concurrent` in flight, and
//! completed results are handed back through a synchronous channel so the
//! rest of the pipeline never has to touch an executor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::item::{HeaderList, Method, Request, Response};

/// One item submitted to the pool: the resolved request plus an opaque
/// token the caller uses to stitch the response back onto its `FuzzResult`.
pub struct TransportJob {
    pub token: u64,
    pub request: Request,
}

/// The outcome of one submitted job.
pub struct TransportOutcome {
    pub token: u64,
    pub response: Result<Response>,
}

/// Backend abstraction so the pipeline can run against a real network, a
/// canned dry-run response, or a replayed pre-built request, all through the
/// same pool plumbing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &Request) -> Result<Response>;
}

/// The real network transport: a pooled `reqwest::Client` shared across every
/// in-flight task.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(
        proxy: Option<&str>,
        timeout: Duration,
        user_agent: Option<&str>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::BadOptions(format!("invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        if let Some(ua) = user_agent {
            builder = builder.user_agent(ua.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| Error::Transport(format!("failed to build client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &Request) -> Result<Response> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| Error::Transport(e.to_string()))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers.0 {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let mut headers = HeaderList::default();
        for (name, value) in response.headers() {
            headers.push(name.as_str(), value.to_str().unwrap_or_default());
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?
            .to_vec();
        Ok(Response {
            status,
            headers,
            body,
            elapsed: started.elapsed(),
        })
    }
}

/// Synthesizes a canned `200 OK` without any network I/O, for `--dry-run`
/// and for exercising downstream stages in tests.
pub struct DryRunTransport;

#[async_trait::async_trait]
impl Transport for DryRunTransport {
    async fn execute(&self, request: &Request) -> Result<Response> {
        let _ = request;
        Ok(Response {
            status: 200,
            headers: HeaderList::default(),
            body: b"dry-run".to_vec(),
            elapsed: Duration::from_millis(0),
        })
    }
}

/// Replays a pre-built request (method/headers/body already resolved by a
/// `FuzzRes`-typed payload) through the real network, bypassing marker
/// substitution entirely.
pub struct PassthroughTransport {
    inner: HttpTransport,
}

impl PassthroughTransport {
    pub fn new(inner: HttpTransport) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl Transport for PassthroughTransport {
    async fn execute(&self, request: &Request) -> Result<Response> {
        self.inner.execute(request).await
    }
}

#[derive(Default)]
struct JobStats {
    submitted: AtomicU64,
    completed: AtomicU64,
}

/// Bounds concurrency to `concurrent` in-flight requests, accepts jobs from
/// any stage thread, and hands results back through a synchronous queue.
/// `register`/`deregister` let more than one stage (transport + recursion's
/// false-positive probe) share one pool without racing each other's shutdown.
pub struct HttpPool {
    runtime: Runtime,
    transport: Arc<dyn Transport>,
    semaphore: Arc<Semaphore>,
    results_tx: Mutex<std::sync::mpsc::Sender<TransportOutcome>>,
    results_rx: Mutex<std::sync::mpsc::Receiver<TransportOutcome>>,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    stats: Arc<JobStats>,
    registrations: AtomicU64,
}

impl HttpPool {
    pub fn new(transport: Arc<dyn Transport>, concurrent: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(concurrent.clamp(1, 64))
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("failed to start transport runtime: {e}")))?;
        let (tx, rx) = std::sync::mpsc::channel();
        Ok(Self {
            runtime,
            transport,
            semaphore: Arc::new(Semaphore::new(concurrent.max(1))),
            results_tx: Mutex::new(tx),
            results_rx: Mutex::new(rx),
            paused: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(JobStats::default()),
            registrations: AtomicU64::new(0),
        })
    }

    /// Registers an additional logical producer against this pool (e.g. the
    /// recursion stage's false-positive probe alongside the main transport
    /// stage); returns an id used only for bookkeeping symmetry.
    pub fn register(&self) -> u64 {
        self.registrations.fetch_add(1, Ordering::SeqCst)
    }

    pub fn deregister(&self) {
        self.registrations.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn queued_requests(&self) -> u64 {
        let submitted = self.stats.submitted.load(Ordering::SeqCst);
        let completed = self.stats.completed.load(Ordering::SeqCst);
        submitted.saturating_sub(completed)
    }

    pub fn job_stats(&self) -> (u64, u64) {
        (
            self.stats.submitted.load(Ordering::SeqCst),
            self.stats.completed.load(Ordering::SeqCst),
        )
    }

    /// Spawns a Tokio task that awaits its semaphore permit, honors pause by
    /// polling before acquiring, and pushes the outcome back synchronously.
    pub fn enqueue(&self, job: TransportJob) {
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::clone(&self.transport);
        let semaphore = Arc::clone(&self.semaphore);
        let paused = Arc::clone(&self.paused);
        let cancelled = Arc::clone(&self.cancelled);
        let stats = Arc::clone(&self.stats);
        let tx = self.results_tx.lock().unwrap().clone();
        self.runtime.spawn(async move {
            while paused.load(Ordering::SeqCst) && !cancelled.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            let token = job.token;
            if cancelled.load(Ordering::SeqCst) {
                stats.completed.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(TransportOutcome {
                    token,
                    response: Err(Error::Transport("run cancelled".into())),
                });
                return;
            }
            let _permit = semaphore.acquire().await;
            let response = transport.execute(&job.request).await;
            stats.completed.fetch_add(1, Ordering::SeqCst);
            if tx.send(TransportOutcome { token, response }).is_err() {
                debug!("transport outcome dropped: receiver gone");
            }
        });
    }

    /// Blocking receive of the next completed outcome. `None` once the
    /// channel is closed (all senders dropped, i.e. the pool has shut down).
    pub fn recv(&self) -> Option<TransportOutcome> {
        self.results_rx.lock().unwrap().recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<TransportOutcome> {
        self.results_rx.lock().unwrap().recv_timeout(timeout).ok()
    }
}

/// Picks the concrete [`Transport`] implementation for a run's configuration.
pub fn build_transport(
    dry_run: bool,
    proxy: Option<&str>,
    timeout: Duration,
    user_agent: Option<&str>,
) -> Result<Arc<dyn Transport>> {
    if dry_run {
        warn!("dry-run transport active: no network requests will be issued");
        return Ok(Arc::new(DryRunTransport));
    }
    Ok(Arc::new(HttpTransport::new(proxy, timeout, user_agent)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn sample_request() -> Request {
        Request {
            method: Method::Get,
            url: "http://example.invalid/".into(),
            headers: HeaderList::default(),
            body: None,
            follow_redirects: false,
        }
    }

    #[test]
    fn dry_run_pool_completes_jobs_without_network() {
        let pool = HttpPool::new(Arc::new(DryRunTransport), 4).unwrap();
        pool.enqueue(TransportJob {
            token: 1,
            request: sample_request(),
        });
        let outcome = pool.recv_timeout(StdDuration::from_secs(2)).unwrap();
        assert_eq!(outcome.token, 1);
        assert_eq!(outcome.response.unwrap().status, 200);
    }

    #[test]
    fn cancel_fails_pending_jobs() {
        let pool = HttpPool::new(Arc::new(DryRunTransport), 4).unwrap();
        pool.cancel();
        pool.enqueue(TransportJob {
            token: 7,
            request: sample_request(),
        });
        let outcome = pool.recv_timeout(StdDuration::from_secs(2)).unwrap();
        assert_eq!(outcome.token, 7);
        assert!(outcome.response.is_err());
    }

    #[test]
    fn queued_requests_tracks_in_flight_count() {
        let pool = HttpPool::new(Arc::new(DryRunTransport), 1).unwrap();
        pool.enqueue(TransportJob {
            token: 1,
            request: sample_request(),
        });
        let _ = pool.recv_timeout(StdDuration::from_secs(2));
        let (submitted, completed) = pool.job_stats();
        assert_eq!(submitted, completed);
    }
}
