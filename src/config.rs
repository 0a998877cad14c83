//! `RunConfig`: the single source of truth assembled once from parsed CLI
//! flags and handed by reference to every stage at construction, mirroring
//! how the teacher threads one state struct through the fuzzing loop.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::filter::{FuzzResFilter, SimpleFilter};
use crate::item::{HeaderList, Method};
use crate::marker::contains_marker;
use crate::payload::PayloadSource;

/// Where `-f FILE[,FORMAT]` writes results. Only `json` is implemented;
/// other formats fall back to it with a warning at parse time.
pub struct OutputFile {
    pub path: String,
}

pub struct RunConfig {
    pub target: String,
    pub method: Method,
    pub body: Option<String>,
    pub headers: HeaderList,
    pub follow_redirects: bool,
    pub domain_based_scope: bool,

    pub sources: Vec<PayloadSource>,

    pub concurrent: usize,
    pub delay: Duration,
    pub proxy: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub dry_run: bool,
    pub no_scanmode: bool,
    pub limit_requests: Option<u64>,

    pub max_rlevel: u32,
    pub max_plugin_rlevel: u32,
    pub scripts: Vec<String>,
    pub use_default_scripts: bool,
    pub cancel_on_plugin_exception: bool,

    pub filter_expr: Option<String>,
    pub prefilter_exprs: Vec<String>,
    pub hard_filter: bool,
    pub auto_filter: bool,
    pub simple: SimpleFilter,

    pub verbose: bool,
    pub no_color: bool,
    pub quiet: bool,
    pub out_file: Option<OutputFile>,
}

impl RunConfig {
    /// Cross-flag validation the CLI layer can't express declaratively:
    /// a marker must appear somewhere the payload can reach, and any
    /// filter expression must parse.
    pub fn validate(&self) -> Result<()> {
        let body_has_marker = self.body.as_deref().is_some_and(contains_marker);
        if !contains_marker(&self.target) && !body_has_marker {
            return Err(Error::BadOptions(
                "no FUZZ marker found in target or post data".into(),
            ));
        }
        if self.sources.is_empty() {
            return Err(Error::BadOptions(
                "at least one payload source (-w/-z) is required".into(),
            ));
        }
        if let Some(expr) = &self.filter_expr {
            FuzzResFilter::compile(expr)?;
        }
        for expr in &self.prefilter_exprs {
            FuzzResFilter::compile(expr)?;
        }
        Ok(())
    }

    pub fn compiled_filter(&self) -> Result<Option<FuzzResFilter>> {
        self.filter_expr
            .as_deref()
            .map(FuzzResFilter::compile)
            .transpose()
    }

    pub fn compiled_prefilters(&self) -> Result<Vec<FuzzResFilter>> {
        self.prefilter_exprs
            .iter()
            .map(|e| FuzzResFilter::compile(e))
            .collect()
    }
}

/// Parses a `--hc`/`--sc`/... style comma-separated list of `u16`s,
/// ignoring blanks so `--hc 404,,500` doesn't error.
pub fn parse_code_list(raw: &str) -> HashSet<u16> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

pub fn parse_usize_list(raw: &str) -> HashSet<usize> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RunConfig {
        RunConfig {
            target: "http://h/FUZZ".into(),
            method: Method::Get,
            body: None,
            headers: HeaderList::default(),
            follow_redirects: false,
            domain_based_scope: false,
            sources: vec![PayloadSource::from_words(vec!["admin".into()])],
            concurrent: 10,
            delay: Duration::default(),
            proxy: None,
            timeout: Duration::from_secs(10),
            user_agent: None,
            dry_run: true,
            no_scanmode: false,
            limit_requests: None,
            max_rlevel: 2,
            max_plugin_rlevel: 2,
            scripts: Vec::new(),
            use_default_scripts: false,
            cancel_on_plugin_exception: false,
            filter_expr: None,
            prefilter_exprs: Vec::new(),
            hard_filter: false,
            auto_filter: false,
            simple: SimpleFilter::default(),
            verbose: false,
            no_color: false,
            quiet: false,
            out_file: None,
        }
    }

    #[test]
    fn rejects_target_without_marker_or_payload() {
        let mut config = base_config();
        config.target = "http://h/admin".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_payload_sources() {
        let mut config = base_config();
        config.sources.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_filter_expression() {
        let mut config = base_config();
        config.filter_expr = Some("c===200".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn code_list_ignores_blanks() {
        let set = parse_code_list("404,,500,");
        assert_eq!(set.len(), 2);
        assert!(set.contains(&404));
    }
}
