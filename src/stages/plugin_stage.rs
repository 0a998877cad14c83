//! Runs every enabled plugin against each result, gating whatever
//! `BACKFEED`/`SEED` they synthesize through scope, cache, and depth checks
//! before enqueuing.
//!
//! The distilled design calls for `P` parallel sub-stages dispatched via
//! `send_to_any`; here all enabled plugins for one result run sequentially
//! within a single stage worker. Plugin CPU cost is negligible next to the
//! HTTP pool's network latency, so the extra fan-out buys little at real
//! cost in queue-wiring complexity — documented as a simplification rather
//! than carried through unimplemented.

use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::error::Result;
use crate::http::HttpPool;
use crate::item::{Finding, FuzzResult, HeaderList, ItemType, Method, Request, Severity};
use crate::plugin::{Plugin, PluginOutput};
use crate::queue::{PipelineItem, StageContext, StageLogic};
use crate::stages::recursive::FalsePositiveProbe;

pub struct PluginStageConfig {
    pub cancel_on_plugin_exception: bool,
    pub domain_based_scope: bool,
    pub max_backfeed_level: u32,
    pub max_plugin_rlevel: u32,
    pub marker: String,
    pub probe_timeout: Duration,
}

pub struct PluginStage {
    plugins: Vec<Box<dyn Plugin>>,
    disabled: Vec<bool>,
    config: PluginStageConfig,
    probe: FalsePositiveProbe,
}

impl PluginStage {
    pub fn new(plugins: Vec<Box<dyn Plugin>>, config: PluginStageConfig, probe_pool: Arc<HttpPool>) -> Self {
        let disabled = vec![false; plugins.len()];
        let probe = FalsePositiveProbe::new(probe_pool, config.marker.clone(), config.probe_timeout);
        Self {
            plugins,
            disabled,
            config,
            probe,
        }
    }

    fn handle_seed_output(
        &mut self,
        url: String,
        backfeed: bool,
        source: &FuzzResult,
        ctx: &StageContext,
    ) -> Option<Finding> {
        if !source
            .history
            .check_in_scope(&url, self.config.domain_based_scope)
        {
            return Some(Finding {
                plugin_name: "plugin-stage".into(),
                message: format!("Skipped out-of-scope plugin target {url}"),
                severity: Severity::Info,
            });
        }

        if backfeed {
            return self.handle_backfeed_output(url, source, ctx);
        }
        self.handle_seed_directory_output(url, source, ctx)
    }

    fn handle_backfeed_output(
        &self,
        url: String,
        source: &FuzzResult,
        ctx: &StageContext,
    ) -> Option<Finding> {
        if ctx.cache.check_processed(&url) {
            return None;
        }
        if source.backfeed_level + 1 > self.config.max_backfeed_level {
            return Some(Finding {
                plugin_name: "plugin-stage".into(),
                message: format!("backfeed_level cap reached, not enqueuing {url}"),
                severity: Severity::Low,
            });
        }

        let mut synthesized = FuzzResult::new(
            url.clone(),
            Request {
                method: Method::Get,
                url,
                headers: HeaderList::default(),
                body: None,
                follow_redirects: source.history.request.follow_redirects,
            },
            crate::payload::PayloadManager::empty(),
        );
        synthesized.item.priority = source.item.priority;
        synthesized.from_plugin = true;
        synthesized.rlevel = source.rlevel;
        synthesized.plugin_rlevel = source.plugin_rlevel;
        synthesized.backfeed_level = source.backfeed_level + 1;
        synthesized.item.item_type = ItemType::Backfeed;
        ctx.send(PipelineItem::Fuzz(synthesized));
        None
    }

    /// `seed` of type `SEED`: recursion-cache check, plugin-depth check,
    /// false-positive probe — mirroring `stages/recursive.rs`'s own gate
    /// for a directory it derives instead of having transported already.
    fn handle_seed_directory_output(
        &mut self,
        url: String,
        source: &FuzzResult,
        ctx: &StageContext,
    ) -> Option<Finding> {
        let templated_url = format!("{}/{}", url.trim_end_matches('/'), self.config.marker);

        if ctx
            .cache
            .check_cache(&templated_url, crate::cache::CacheCategory::Recursion, true)
        {
            return None;
        }
        if source.plugin_rlevel + 1 > self.config.max_plugin_rlevel {
            return Some(Finding {
                plugin_name: "plugin-stage".into(),
                message: format!("plugin recursion depth reached, not enqueuing {url}"),
                severity: Severity::Low,
            });
        }
        if !self.probe.is_real_directory(&templated_url) {
            return Some(Finding {
                plugin_name: "plugin-stage".into(),
                message: format!("false-positive probe rejected {url}"),
                severity: Severity::Low,
            });
        }

        let mut synthesized = FuzzResult::new(
            templated_url.clone(),
            Request {
                method: Method::Get,
                url: templated_url,
                headers: HeaderList::default(),
                body: None,
                follow_redirects: source.history.request.follow_redirects,
            },
            crate::payload::PayloadManager::empty(),
        );
        synthesized.item.priority = source.item.priority;
        synthesized.from_plugin = true;
        synthesized.rlevel = source.rlevel;
        synthesized.plugin_rlevel = source.plugin_rlevel + 1;
        synthesized.backfeed_level = source.backfeed_level;
        synthesized.item.item_type = ItemType::Seed;
        ctx.send(PipelineItem::Fuzz(synthesized));
        None
    }
}

impl StageLogic for PluginStage {
    fn name(&self) -> &'static str {
        "plugin"
    }

    fn handles(&self, item_type: ItemType) -> bool {
        matches!(item_type, ItemType::Result)
    }

    fn process(&mut self, item: PipelineItem, ctx: &StageContext) -> Result<()> {
        let PipelineItem::Fuzz(mut result) = item else {
            ctx.send(item);
            return Ok(());
        };
        if result.has_exception() {
            ctx.send(PipelineItem::Fuzz(result));
            return Ok(());
        }

        for idx in 0..self.plugins.len() {
            if self.disabled[idx] {
                continue;
            }
            if !self.plugins[idx].validate(&result) {
                continue;
            }
            let outputs = self.plugins[idx].run(&result);
            if self.plugins[idx].run_once() {
                self.disabled[idx] = true;
            }
            let mut enqueued = 0u32;
            for output in outputs {
                match output {
                    PluginOutput::Message(message) => result.plugins_res.push(Finding {
                        plugin_name: self.plugins[idx].name().to_string(),
                        message,
                        severity: Severity::Info,
                    }),
                    PluginOutput::Finding { message, severity } => {
                        result.plugins_res.push(Finding {
                            plugin_name: self.plugins[idx].name().to_string(),
                            message,
                            severity,
                        })
                    }
                    PluginOutput::Exception(message) => {
                        if self.config.cancel_on_plugin_exception {
                            warn!("plugin {} raised: {message}", self.plugins[idx].name());
                            return Err(crate::error::Error::Internal(message));
                        }
                        result.plugins_res.push(Finding {
                            plugin_name: self.plugins[idx].name().to_string(),
                            message,
                            severity: Severity::High,
                        });
                    }
                    PluginOutput::Seed { url, backfeed } => {
                        if let Some(finding) = self.handle_seed_output(url, backfeed, &result, ctx)
                        {
                            result.plugins_res.push(finding);
                        } else {
                            enqueued += 1;
                        }
                    }
                }
            }
            if enqueued > 0 {
                result.plugins_res.push(Finding {
                    plugin_name: self.plugins[idx].name().to_string(),
                    message: format!("Enqueued {enqueued} request(s)/seed(s)"),
                    severity: Severity::Info,
                });
            }
        }

        ctx.send(PipelineItem::Fuzz(result));
        Ok(())
    }
}
