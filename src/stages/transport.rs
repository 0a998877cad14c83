//! The one stage that breaks the synchronous thread-per-stage model: HTTP
//! requests are dispatched to the shared [`HttpPool`] without blocking the
//! worker thread, and a background thread drains completions and forwards
//! them once ready.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::warn;

use crate::error::Result;
use crate::http::{HttpPool, TransportJob};
use crate::item::{FuzzResult, ItemType};
use crate::queue::{PipelineItem, StageContext, StageLogic};

pub struct TransportConfig {
    pub delay: Duration,
}

/// Submits a request per `SEED`/`BACKFEED` item and forwards the completed
/// `RESULT` once the pool reports it, from a dedicated drain thread rather
/// than the stage's own worker loop.
pub struct TransportStage {
    pool: Arc<HttpPool>,
    config: TransportConfig,
    pending: Arc<Mutex<HashMap<u64, FuzzResult>>>,
    next_token: AtomicU64,
    stop: Arc<AtomicBool>,
    drain: Option<JoinHandle<()>>,
}

impl TransportStage {
    pub fn new(pool: Arc<HttpPool>, config: TransportConfig) -> Self {
        Self {
            pool,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
            stop: Arc::new(AtomicBool::new(false)),
            drain: None,
        }
    }
}

impl StageLogic for TransportStage {
    fn name(&self) -> &'static str {
        "transport"
    }

    fn handles(&self, item_type: ItemType) -> bool {
        // `Result` covers the common case: a pending request built by the
        // seed stage (and possibly sliced by a pre-filter), not yet
        // transported. `Backfeed` covers items routing injects directly
        // into this stage's input queue, bypassing the pre-filter.
        matches!(item_type, ItemType::Result | ItemType::Backfeed)
    }

    fn on_start(&mut self, ctx: &StageContext) {
        self.pool.register();
        let pool = Arc::clone(&self.pool);
        let pending = Arc::clone(&self.pending);
        let stop = Arc::clone(&self.stop);
        let output = ctx.output.clone();
        let stats = Arc::clone(&ctx.stats);
        self.drain = Some(
            std::thread::Builder::new()
                .name("transport-drain".to_string())
                .spawn(move || loop {
                    if stop.load(Ordering::SeqCst) && pool.queued_requests() == 0 {
                        break;
                    }
                    let Some(outcome) = pool.recv_timeout(Duration::from_millis(200)) else {
                        continue;
                    };
                    let Some(mut result) = pending.lock().unwrap().remove(&outcome.token) else {
                        continue;
                    };
                    match outcome.response {
                        Ok(response) => {
                            let decoded = String::from_utf8_lossy(&response.body).into_owned();
                            result.apply_response(response, &decoded);
                        }
                        Err(e) => {
                            warn!("transport: request to {} failed: {e}", result.url);
                            result.mark_transport_error(e.to_string());
                        }
                    }
                    stats.inc_processed();
                    result.result_number = stats.processed();
                    result.item.item_type = ItemType::Result;
                    output.send(PipelineItem::Fuzz(result));
                })
                .expect("failed to spawn transport drain"),
        );
    }

    fn process(&mut self, item: PipelineItem, _ctx: &StageContext) -> Result<()> {
        let Some(mut result) = item.into_fuzz() else {
            return Ok(());
        };
        if !self.config.delay.is_zero() {
            std::thread::sleep(self.config.delay);
        }

        let mut request = result.history.request.clone();
        request.url = result.url.clone();
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        result.history.request = request.clone();
        self.pending.lock().unwrap().insert(token, result);
        self.pool.enqueue(TransportJob { token, request });
        Ok(())
    }

    fn on_cleanup(&mut self, _ctx: &StageContext) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
        self.pool.deregister();
    }
}
