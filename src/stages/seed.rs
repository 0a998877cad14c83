//! Expands one seed's payload cartesian product into pending requests.
//! Handles `STARTSEED` (the pipeline's single entry point) and `SEED`
//! (synthesized by routing when recursion or a plugin opens a new
//! directory).

use std::time::Duration;

use log::warn;

use crate::error::Result;
use crate::item::{FuzzItem, FuzzResult, HeaderList, ItemType, Method, Request};
use crate::marker;
use crate::payload::{Dictionary, PayloadManager, PayloadSource};
use crate::queue::{PipelineItem, StageContext, StageLogic};

pub struct SeedConfig {
    pub target_template: String,
    pub method: Method,
    pub body_template: Option<String>,
    pub headers: HeaderList,
    pub sources: Vec<PayloadSource>,
    pub concurrent: usize,
    pub delay: Option<Duration>,
    pub follow_redirects: bool,
}

pub struct SeedStage {
    config: SeedConfig,
}

impl SeedStage {
    pub fn new(config: SeedConfig) -> Self {
        Self { config }
    }

    fn build_request(&self, root: &str, words: &[crate::payload::FuzzWord]) -> Request {
        Request {
            method: self.config.method,
            url: marker::substitute(root, words),
            headers: self.config.headers.clone(),
            body: self
                .config
                .body_template
                .as_ref()
                .map(|b| marker::substitute(b, words).into_bytes()),
            follow_redirects: self.config.follow_redirects,
        }
    }

    fn emit(&self, root: &str, priority: i64, ctx: &StageContext) -> Result<()> {
        let empty_words: Vec<crate::payload::FuzzWord> = self
            .config
            .sources
            .iter()
            .map(|_| crate::payload::FuzzWord::word(""))
            .collect();
        let root_request = self.build_request(root, &empty_words);
        if !ctx.cache.check_processed(&root_request.url) {
            self.push(root_request, PayloadManager::empty(), priority, ctx);
        }

        let dictionary = Dictionary::new(self.config.sources.clone())?;
        for tuple in dictionary {
            if ctx.stats.is_cancelled() {
                break;
            }
            if let Some(delay) = self.config.delay {
                std::thread::sleep(delay);
            }
            let request = self.build_request(root, &tuple);
            if ctx.cache.check_processed(&request.url) {
                continue;
            }
            self.wait_for_backpressure(ctx);
            self.push(request, PayloadManager::new(tuple), priority, ctx);
        }

        ctx.send_last(PipelineItem::Control(FuzzItem::with_priority(
            ItemType::EndSeed,
            priority,
        )));
        ctx.ledger.seed_closed();
        Ok(())
    }

    fn push(
        &self,
        request: Request,
        payload_man: PayloadManager,
        priority: i64,
        ctx: &StageContext,
    ) {
        let url = request.url.clone();
        let mut result = FuzzResult::new(url, request, payload_man);
        result.item.priority = priority;
        ctx.stats.inc_pending_fuzz();
        ctx.send(PipelineItem::Fuzz(result));
    }

    fn wait_for_backpressure(&self, ctx: &StageContext) {
        let limit = self.config.concurrent.saturating_mul(5).max(1);
        while ctx.output.len() > limit && !ctx.stats.is_cancelled() {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl StageLogic for SeedStage {
    fn name(&self) -> &'static str {
        "seed"
    }

    fn handles(&self, item_type: ItemType) -> bool {
        matches!(item_type, ItemType::StartSeed | ItemType::Seed)
    }

    fn process(&mut self, item: PipelineItem, ctx: &StageContext) -> Result<()> {
        match item {
            PipelineItem::Control(control) if control.item_type == ItemType::StartSeed => {
                ctx.cache
                    .check_cache(&self.config.target_template, crate::cache::CacheCategory::Recursion, true);
                if let Err(e) = self.emit(&self.config.target_template.clone(), 0, ctx) {
                    warn!("seed stage: {e}");
                }
                Ok(())
            }
            PipelineItem::Fuzz(result) if result.item.item_type == ItemType::Seed => {
                let priority = result.item.priority;
                let root = result.url.clone();
                if let Err(e) = self.emit(&root, priority, ctx) {
                    warn!("seed stage: {e}");
                }
                Ok(())
            }
            other => {
                ctx.send(other);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HttpCache;
    use crate::queue::{PriorityQueue, SeedLedger};
    use crate::stats::FuzzStats;
    use std::sync::Arc;

    fn ctx() -> (StageContext, PriorityQueue) {
        let output = PriorityQueue::new();
        (
            StageContext {
                output: output.clone(),
                discard: PriorityQueue::new(),
                stats: Arc::new(FuzzStats::new()),
                cache: Arc::new(HttpCache::new()),
                ledger: Arc::new(SeedLedger::default()),
            },
            output,
        )
    }

    fn config() -> SeedConfig {
        SeedConfig {
            target_template: "http://h/FUZZ".into(),
            method: Method::Get,
            body_template: None,
            headers: HeaderList::default(),
            sources: vec![PayloadSource::from_words(vec!["a".into(), "b".into()])],
            concurrent: 10,
            delay: None,
            follow_redirects: false,
        }
    }

    #[test]
    fn startseed_emits_root_plus_every_payload() {
        let (ctx, output) = ctx();
        ctx.ledger.start();
        let mut stage = SeedStage::new(config());
        stage
            .process(
                PipelineItem::Control(FuzzItem::new(ItemType::StartSeed)),
                &ctx,
            )
            .unwrap();
        // root request ("") + "a" + "b" + ENDSEED
        assert_eq!(output.len(), 4);
    }

    #[test]
    fn duplicate_root_url_is_not_emitted_twice() {
        let (ctx, output) = ctx();
        ctx.ledger.start();
        let mut stage = SeedStage::new(config());
        ctx.cache.check_processed("http://h/");
        stage
            .process(
                PipelineItem::Control(FuzzItem::new(ItemType::StartSeed)),
                &ctx,
            )
            .unwrap();
        assert_eq!(output.len(), 3);
    }
}
