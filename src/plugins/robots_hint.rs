//! Enrichment plugin (added; no counterpart in `original_source/`): when a
//! request to `/robots.txt` succeeds, mines its `Disallow:` lines for paths
//! worth probing directly, demonstrating the "plugin synthesizes a backfeed
//! seed" path through the plugin stage.

use url::Url;

use crate::item::FuzzResult;
use crate::plugin::{Plugin, PluginOutput};

pub struct RobotsHintPlugin;

impl Plugin for RobotsHintPlugin {
    fn name(&self) -> &'static str {
        "robots_hint"
    }

    fn run_once(&self) -> bool {
        true
    }

    fn validate(&self, result: &FuzzResult) -> bool {
        !result.has_exception() && result.url.ends_with("/robots.txt") && result.code() == 200
    }

    fn run(&self, result: &FuzzResult) -> Vec<PluginOutput> {
        let Some(response) = &result.history.response else {
            return Vec::new();
        };
        let Ok(base) = Url::parse(&result.url) else {
            return Vec::new();
        };
        let body = String::from_utf8_lossy(&response.body);
        body.lines()
            .filter_map(|line| {
                let line = line.trim();
                let path = line.strip_prefix("Disallow:").map(|p| p.trim())?;
                if path.is_empty() || path == "/" {
                    return None;
                }
                base.join(path).ok().map(|target| PluginOutput::Seed {
                    url: target.to_string(),
                    backfeed: true,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{HeaderList, Method, Request, Response};
    use std::time::Duration;

    fn robots_result(body: &str) -> FuzzResult {
        let mut r = FuzzResult::new(
            "http://h/robots.txt".into(),
            Request {
                method: Method::Get,
                url: "http://h/robots.txt".into(),
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
                body: body.as_bytes().to_vec(),
                elapsed: Duration::default(),
            },
            body,
        );
        r
    }

    #[test]
    fn extracts_disallowed_paths_as_backfeed_seeds() {
        let result = robots_result("User-agent: *\nDisallow: /admin\nDisallow: /\n");
        let outputs = RobotsHintPlugin.run(&result);
        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            PluginOutput::Seed { url, backfeed } => {
                assert_eq!(url, "http://h/admin");
                assert!(*backfeed);
            }
            _ => panic!("expected a seed output"),
        }
    }

    #[test]
    fn validate_rejects_non_robots_urls() {
        let mut r = robots_result("Disallow: /x");
        r.url = "http://h/other".into();
        assert!(!RobotsHintPlugin.validate(&r));
    }
}
