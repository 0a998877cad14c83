//! The plugin ABI: a small ledger of what a plugin produces, independent of
//! how the plugin stage schedules and gates those outputs.

use crate::item::{FuzzResult, Severity};

/// What running a plugin against one result can produce. The plugin stage
/// owns scope/cache/depth gating for `Seed`; a plugin never enqueues
/// directly.
#[derive(Debug, Clone)]
pub enum PluginOutput {
    Message(String),
    Finding { message: String, severity: Severity },
    Seed { url: String, backfeed: bool },
    Exception(String),
}

/// A unit of enrichment run against every eligible result. `validate`
/// decides eligibility; `run` produces zero or more [`PluginOutput`]s.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn run_once(&self) -> bool {
        false
    }

    fn validate(&self, result: &FuzzResult) -> bool {
        !result.has_exception()
    }

    fn run(&self, result: &FuzzResult) -> Vec<PluginOutput>;
}

/// Resolves the `--script` name list (with `-A` as sugar for the default
/// set) into plugin instances.
pub fn resolve_plugins(names: &[String], default_set: bool) -> Vec<Box<dyn Plugin>> {
    let mut resolved: Vec<Box<dyn Plugin>> = Vec::new();
    let names: Vec<String> = if default_set {
        vec!["headers".to_string(), "robots_hint".to_string()]
    } else {
        names.to_vec()
    };
    for name in names {
        match name.as_str() {
            "headers" => resolved.push(Box::new(crate::plugins::headers::HeadersPlugin)),
            "robots_hint" => resolved.push(Box::new(crate::plugins::robots_hint::RobotsHintPlugin)),
            other => log::warn!("unknown plugin '{other}', skipping"),
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_resolves_to_headers_and_robots_hint() {
        let plugins = resolve_plugins(&[], true);
        let names: Vec<&str> = plugins.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["headers", "robots_hint"]);
    }

    #[test]
    fn unknown_plugin_name_is_skipped() {
        let plugins = resolve_plugins(&["nonexistent".to_string()], false);
        assert!(plugins.is_empty());
    }
}
