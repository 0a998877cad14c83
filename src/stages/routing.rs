//! Fans `SEED` back to the seed stage's input (priority-demoted) and
//! `BACKFEED` to the transport input. The only stage permitted to address a
//! non-adjacent stage's queue directly.

use crate::error::Result;
use crate::item::{ItemType, PRIORITY_STEP};
use crate::queue::{PipelineItem, PriorityQueue, StageContext, StageLogic};

pub struct RoutingStage {
    seed_input: PriorityQueue,
    transport_input: PriorityQueue,
}

impl RoutingStage {
    pub fn new(seed_input: PriorityQueue, transport_input: PriorityQueue) -> Self {
        Self {
            seed_input,
            transport_input,
        }
    }
}

impl StageLogic for RoutingStage {
    fn name(&self) -> &'static str {
        "routing"
    }

    fn handles(&self, item_type: ItemType) -> bool {
        matches!(item_type, ItemType::Seed | ItemType::Backfeed)
    }

    fn process(&mut self, item: PipelineItem, ctx: &StageContext) -> Result<()> {
        match item {
            PipelineItem::Fuzz(mut result) if result.item.item_type == ItemType::Seed => {
                result.item.priority += PRIORITY_STEP;
                ctx.ledger.seed_opened();
                ctx.stats.new_seed(&result.url);
                self.seed_input.send(PipelineItem::Fuzz(result));
                Ok(())
            }
            PipelineItem::Fuzz(result) if result.item.item_type == ItemType::Backfeed => {
                ctx.stats.new_backfeed();
                self.transport_input.send(PipelineItem::Fuzz(result));
                Ok(())
            }
            other => {
                ctx.send(other);
                Ok(())
            }
        }
    }
}
