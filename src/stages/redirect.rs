//! Follows in-scope 3xx redirects by synthesizing a `BACKFEED` request.

use log::debug;
use url::Url;

use crate::error::Result;
use crate::item::{Finding, FuzzResult, HeaderList, ItemType, Method, Request, Severity};
use crate::queue::{PipelineItem, StageContext, StageLogic};

const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "ttf",
];

pub struct RedirectConfig {
    pub domain_based_scope: bool,
}

pub struct RedirectStage {
    config: RedirectConfig,
}

impl RedirectStage {
    pub fn new(config: RedirectConfig) -> Self {
        Self { config }
    }

    fn method_for(&self, url: &str) -> Method {
        let ext = url
            .rsplit('.')
            .next()
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if STATIC_EXTENSIONS.contains(&ext.as_str()) {
            Method::Head
        } else {
            Method::Get
        }
    }
}

/// Pulls the redirect target out of a response: `Location` if present,
/// otherwise the URL inside a `Link: <url>; rel="..."` header.
fn redirect_target(headers: &HeaderList) -> Option<&str> {
    headers.get("Location").or_else(|| {
        let link = headers.get("Link")?;
        let start = link.find('<')? + 1;
        let end = link[start..].find('>')? + start;
        Some(&link[start..end])
    })
}

impl StageLogic for RedirectStage {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn handles(&self, item_type: ItemType) -> bool {
        matches!(item_type, ItemType::Result)
    }

    fn process(&mut self, item: PipelineItem, ctx: &StageContext) -> Result<()> {
        let Some(fuzz) = item.as_fuzz() else {
            ctx.send(item);
            return Ok(());
        };
        let status = fuzz.code();
        if !(300..400).contains(&status) {
            ctx.send(item);
            return Ok(());
        }
        let Some(location) = fuzz
            .history
            .response
            .as_ref()
            .and_then(|r| redirect_target(&r.headers))
        else {
            ctx.send(item);
            return Ok(());
        };
        let Ok(base) = Url::parse(&fuzz.history.request.url) else {
            ctx.send(item);
            return Ok(());
        };
        let Ok(target) = base.join(location) else {
            ctx.send(item);
            return Ok(());
        };
        let target_url = target.to_string();

        if !fuzz
            .history
            .check_in_scope(&target_url, self.config.domain_based_scope)
        {
            ctx.send(item);
            return Ok(());
        }
        if ctx.cache.check_processed(&target_url) {
            ctx.send(item);
            return Ok(());
        }

        debug!("redirect: following {target_url}");
        let mut backfeed = FuzzResult::new(
            target_url.clone(),
            Request {
                method: self.method_for(&target_url),
                url: target_url.clone(),
                headers: HeaderList::default(),
                body: None,
                follow_redirects: fuzz.history.request.follow_redirects,
            },
            crate::payload::PayloadManager::empty(),
        );
        backfeed.item.item_type = ItemType::Backfeed;
        backfeed.item.priority = fuzz.item.priority;
        backfeed.backfeed_level = fuzz.backfeed_level + 1;
        backfeed.rlevel = fuzz.rlevel;
        backfeed.plugin_rlevel = fuzz.plugin_rlevel;

        let mut item = item;
        if let PipelineItem::Fuzz(result) = &mut item {
            result.plugins_res.push(Finding {
                plugin_name: "redirect".into(),
                message: format!("Following redirect to {target_url}"),
                severity: Severity::Info,
            });
        }
        ctx.send(PipelineItem::Fuzz(backfeed));
        ctx.send(item);
        Ok(())
    }
}
