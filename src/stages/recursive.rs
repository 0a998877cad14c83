//! Detects directory results and synthesizes a `SEED` to recurse into them,
//! gated by the recursion cache, depth limits, and a false-positive probe
//! that defeats servers returning `200` for every path.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::cache::CacheCategory;
use crate::error::Result;
use crate::http::{HttpPool, TransportJob};
use crate::item::{FuzzResult, ItemType};
use crate::queue::{PipelineItem, StageContext, StageLogic};

const NONCE_A: &str = "thisdoesnotexist123";
const NONCE_B: &str = "thisdoesnotexist456";

/// The double-nonce false-positive probe: shared by the recursion stage
/// (checking a directory it already has a transported result for) and the
/// plugin stage (checking a directory a plugin invented from scratch,
/// fetching a baseline first).
pub struct FalsePositiveProbe {
    pool: Arc<HttpPool>,
    marker: String,
    timeout: Duration,
    next_token: u64,
}

impl FalsePositiveProbe {
    pub fn new(pool: Arc<HttpPool>, marker: String, timeout: Duration) -> Self {
        Self {
            pool,
            marker,
            timeout,
            next_token: 0,
        }
    }

    fn probe(&mut self, templated_url: &str, nonce: &str) -> Option<(u16, usize)> {
        let request = crate::item::Request {
            method: crate::item::Method::Get,
            url: templated_url.replace(&self.marker, nonce),
            headers: crate::item::HeaderList::default(),
            body: None,
            follow_redirects: false,
        };
        let token = self.next_token;
        self.next_token += 1;
        self.pool.enqueue(TransportJob { token, request });
        let outcome = self.pool.recv_timeout(self.timeout)?;
        let response = outcome.response.ok()?;
        let body = String::from_utf8_lossy(&response.body);
        Some((response.status, body.split_whitespace().count()))
    }

    /// Runs the double-probe algorithm against the candidate's observed
    /// `(status, words)`. Returns `true` if the candidate is a real hit.
    pub fn is_real_hit(
        &mut self,
        templated_url: &str,
        candidate_status: u16,
        candidate_words: usize,
    ) -> bool {
        let Some((status_a, words_a)) = self.probe(templated_url, NONCE_A) else {
            return true;
        };
        if status_a != candidate_status {
            return true;
        }
        if words_a != candidate_words {
            return true;
        }
        let Some((status_b, words_b)) = self.probe(templated_url, NONCE_B) else {
            return true;
        };
        status_b == status_a && words_b == words_a
    }

    /// For a directory with no transported baseline yet (a plugin-invented
    /// candidate): fetches the directory itself (marker replaced with
    /// nothing) as the baseline, then runs the usual double probe against it.
    pub fn is_real_directory(&mut self, templated_url: &str) -> bool {
        let Some((base_status, base_words)) = self.probe(templated_url, "") else {
            return false;
        };
        self.is_real_hit(templated_url, base_status, base_words)
    }
}

pub struct RecursiveConfig {
    pub marker: String,
    pub max_rlevel: u32,
    pub max_plugin_rlevel: u32,
    pub limit_requests: Option<u64>,
    pub probe_timeout: Duration,
}

pub struct RecursiveStage {
    config: RecursiveConfig,
    probe: FalsePositiveProbe,
}

impl RecursiveStage {
    pub fn new(config: RecursiveConfig, probe_pool: Arc<HttpPool>) -> Self {
        let probe = FalsePositiveProbe::new(probe_pool, config.marker.clone(), config.probe_timeout);
        Self { config, probe }
    }
}

impl StageLogic for RecursiveStage {
    fn name(&self) -> &'static str {
        "recursive"
    }

    fn handles(&self, item_type: ItemType) -> bool {
        matches!(item_type, ItemType::Result)
    }

    fn process(&mut self, item: PipelineItem, ctx: &StageContext) -> Result<()> {
        let Some(result) = item.as_fuzz().cloned() else {
            ctx.send(item);
            return Ok(());
        };
        if result.has_exception() || !result.history.request_found_directory() {
            ctx.send(item);
            return Ok(());
        }

        let recursion_url = result.history.parse_recursion_url(&self.config.marker);

        if ctx
            .cache
            .check_cache(&recursion_url, CacheCategory::Recursion, true)
        {
            ctx.send(item);
            return Ok(());
        }
        if let Some(limit) = self.config.limit_requests {
            if ctx.stats.pending_fuzz() > limit {
                debug!("recursive: request limit reached, not recursing into {recursion_url}");
                ctx.send(item);
                return Ok(());
            }
        }
        let (rlevel, plugin_rlevel) = (result.rlevel, result.plugin_rlevel);
        let limit = if result.from_plugin {
            self.config.max_plugin_rlevel
        } else {
            self.config.max_rlevel
        };
        let depth = if result.from_plugin {
            plugin_rlevel
        } else {
            rlevel
        };
        if depth >= limit {
            ctx.send(item);
            return Ok(());
        }

        if !self.probe.is_real_hit(&recursion_url, result.code(), result.words) {
            debug!("recursive: false-positive probe rejected {recursion_url}");
            ctx.send(item);
            return Ok(());
        }

        let mut seed = FuzzResult::new(
            recursion_url,
            result.history.request.clone(),
            crate::payload::PayloadManager::empty(),
        );
        seed.item.item_type = ItemType::Seed;
        seed.item.priority = result.item.priority;
        seed.rlevel = if result.from_plugin { rlevel } else { rlevel + 1 };
        seed.plugin_rlevel = if result.from_plugin {
            plugin_rlevel + 1
        } else {
            plugin_rlevel
        };
        seed.from_plugin = result.from_plugin;
        ctx.send(PipelineItem::Fuzz(seed));
        ctx.send(item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HttpCache;
    use crate::http::DryRunTransport;
    use crate::item::{HeaderList, Method, Request, Response};
    use crate::queue::SeedLedger;
    use crate::stats::FuzzStats;

    fn ctx() -> StageContext {
        StageContext {
            output: crate::queue::PriorityQueue::new(),
            discard: crate::queue::PriorityQueue::new(),
            stats: Arc::new(FuzzStats::new()),
            cache: Arc::new(HttpCache::new()),
            ledger: Arc::new(SeedLedger::default()),
        }
    }

    fn directory_result() -> FuzzResult {
        let mut r = FuzzResult::new(
            "http://h/admin/".into(),
            Request {
                method: Method::Get,
                url: "http://h/admin/".into(),
                headers: HeaderList::default(),
                body: None,
                follow_redirects: false,
            },
            crate::payload::PayloadManager::empty(),
        );
        r.apply_response(
            Response {
                status: 200,
                headers: HeaderList::default(),
                body: b"hi".to_vec(),
                elapsed: Duration::default(),
            },
            "hi",
        );
        r
    }

    #[test]
    fn non_directory_passes_through_unchanged() {
        let ctx = ctx();
        let pool = Arc::new(HttpPool::new(Arc::new(DryRunTransport), 1).unwrap());
        let mut stage = RecursiveStage::new(
            RecursiveConfig {
                marker: "FUZZ".into(),
                max_rlevel: 5,
                max_plugin_rlevel: 5,
                limit_requests: None,
                probe_timeout: Duration::from_secs(2),
            },
            pool,
        );
        let mut result = directory_result();
        result.url = "http://h/admin".into();
        result.history.request.url = "http://h/admin".into();
        result.history.response.as_mut().unwrap().status = 404;
        stage
            .process(PipelineItem::Fuzz(result), &ctx)
            .unwrap();
        assert_eq!(ctx.output.len(), 1);
    }

    #[test]
    fn false_positive_probe_suppresses_recursion_with_dry_run_transport() {
        // DryRunTransport always answers 200/"dry-run", matching the
        // candidate exactly, so the probe must classify it as a false
        // positive and only the original result passes through.
        let ctx = ctx();
        let pool = Arc::new(HttpPool::new(Arc::new(DryRunTransport), 1).unwrap());
        let mut stage = RecursiveStage::new(
            RecursiveConfig {
                marker: "FUZZ".into(),
                max_rlevel: 5,
                max_plugin_rlevel: 5,
                limit_requests: None,
                probe_timeout: Duration::from_secs(2),
            },
            pool,
        );
        let mut result = directory_result();
        result.apply_response(
            Response {
                status: 200,
                headers: HeaderList::default(),
                body: b"dry-run".to_vec(),
                elapsed: Duration::default(),
            },
            "dry-run",
        );
        stage.process(PipelineItem::Fuzz(result), &ctx).unwrap();
        assert_eq!(ctx.output.len(), 1);
    }
}
