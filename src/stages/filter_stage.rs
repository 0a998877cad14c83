//! The three filter variants from the pipeline diagram: a pre-transport
//! slice filter, the post-transport `--filter`/`--hc` filter, and the
//! auto-filter that promotes recurring noise into a live negated clause.

use crate::error::Result;
use crate::filter::{AutoFilter, FuzzResFilter, SimpleFilter};
use crate::item::ItemType;
use crate::queue::{PipelineItem, StageContext, StageLogic};

/// Applied before transport to drop requests by expression on the pending
/// item (payload value, URL) — cheaper than letting them reach the network.
pub struct PrefilterStage {
    expressions: Vec<FuzzResFilter>,
}

impl PrefilterStage {
    pub fn new(expressions: Vec<FuzzResFilter>) -> Self {
        Self { expressions }
    }
}

impl StageLogic for PrefilterStage {
    fn name(&self) -> &'static str {
        "prefilter"
    }

    fn handles(&self, item_type: ItemType) -> bool {
        matches!(item_type, ItemType::Result)
    }

    fn process(&mut self, item: PipelineItem, ctx: &StageContext) -> Result<()> {
        let Some(fuzz) = item.as_fuzz() else {
            ctx.send(item);
            return Ok(());
        };
        for expr in &self.expressions {
            if !expr.is_visible(fuzz)? {
                ctx.discard(item);
                return Ok(());
            }
        }
        ctx.send(item);
        Ok(())
    }
}

/// The main `--filter` / `--hc`/`--sc`/... filter, applied after the full
/// pipeline (redirects, plugins, recursion) has had a chance to annotate
/// the result.
pub struct FilterStage {
    expression: Option<FuzzResFilter>,
    simple: SimpleFilter,
}

impl FilterStage {
    pub fn new(expression: Option<FuzzResFilter>, simple: SimpleFilter) -> Self {
        Self { expression, simple }
    }
}

impl StageLogic for FilterStage {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn handles(&self, item_type: ItemType) -> bool {
        matches!(item_type, ItemType::Result)
    }

    fn process(&mut self, item: PipelineItem, ctx: &StageContext) -> Result<()> {
        let Some(fuzz) = item.as_fuzz() else {
            ctx.send(item);
            return Ok(());
        };
        if !self.simple.is_visible(fuzz) {
            ctx.discard(item);
            return Ok(());
        }
        if let Some(expr) = &self.expression {
            if !expr.is_visible(fuzz)? {
                ctx.discard(item);
                return Ok(());
            }
        }
        ctx.send(item);
        Ok(())
    }
}

/// Tracks recurring `(code, lines, words)` signatures and discards results
/// matching any clause promoted so far.
pub struct AutoFilterStage {
    tracker: AutoFilter,
}

impl AutoFilterStage {
    pub fn new() -> Self {
        Self {
            tracker: AutoFilter::new(),
        }
    }
}

impl Default for AutoFilterStage {
    fn default() -> Self {
        Self::new()
    }
}

impl StageLogic for AutoFilterStage {
    fn name(&self) -> &'static str {
        "auto-filter"
    }

    fn handles(&self, item_type: ItemType) -> bool {
        matches!(item_type, ItemType::Result)
    }

    fn process(&mut self, item: PipelineItem, ctx: &StageContext) -> Result<()> {
        let Some(fuzz) = item.as_fuzz() else {
            ctx.send(item);
            return Ok(());
        };
        if fuzz.has_exception() {
            ctx.send(item);
            return Ok(());
        }
        self.tracker.observe(fuzz);
        if let Some(compiled) = self.tracker.compiled()? {
            if !compiled.is_visible(fuzz)? {
                ctx.discard(item);
                return Ok(());
            }
        }
        ctx.send(item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HttpCache;
    use crate::item::{FuzzResult, HeaderList, Method, Request, Response};
    use crate::queue::{PriorityQueue, SeedLedger};
    use crate::stats::FuzzStats;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> StageContext {
        StageContext {
            output: PriorityQueue::new(),
            discard: PriorityQueue::new(),
            stats: Arc::new(FuzzStats::new()),
            cache: Arc::new(HttpCache::new()),
            ledger: Arc::new(SeedLedger::default()),
        }
    }

    fn result_with(code: u16) -> FuzzResult {
        let mut r = FuzzResult::new(
            "http://h/x".into(),
            Request {
                method: Method::Get,
                url: "http://h/x".into(),
                headers: HeaderList::default(),
                body: None,
                follow_redirects: false,
            },
            crate::payload::PayloadManager::empty(),
        );
        r.apply_response(
            Response {
                status: code,
                headers: HeaderList::default(),
                body: b"a".to_vec(),
                elapsed: Duration::default(),
            },
            "a",
        );
        r
    }

    #[test]
    fn filter_stage_discards_filtered_result() {
        let ctx = ctx();
        let expr = FuzzResFilter::compile("c=404").unwrap();
        let mut stage = FilterStage::new(Some(expr), SimpleFilter::default());
        stage
            .process(PipelineItem::Fuzz(result_with(404)), &ctx)
            .unwrap();
        assert!(ctx.output.is_empty());
        assert_eq!(ctx.discard.len(), 1);
    }

    #[test]
    fn filter_stage_forwards_visible_result() {
        let ctx = ctx();
        let expr = FuzzResFilter::compile("c=404").unwrap();
        let mut stage = FilterStage::new(Some(expr), SimpleFilter::default());
        stage
            .process(PipelineItem::Fuzz(result_with(200)), &ctx)
            .unwrap();
        assert_eq!(ctx.output.len(), 1);
    }

    #[test]
    fn autofilter_stage_discards_after_threshold() {
        let ctx = ctx();
        let mut stage = AutoFilterStage::new();
        for _ in 0..9 {
            stage
                .process(PipelineItem::Fuzz(result_with(403)), &ctx)
                .unwrap();
        }
        assert_eq!(ctx.output.len(), 9);
        stage
            .process(PipelineItem::Fuzz(result_with(403)), &ctx)
            .unwrap();
        // the 10th occurrence both crosses the threshold and is itself discarded
        assert_eq!(ctx.output.len(), 9);
        assert_eq!(ctx.discard.len(), 1);
    }
}
