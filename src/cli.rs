//! `clap` flag surface. `Cli::into_config` does the cross-field assembly;
//! `RunConfig::validate` (in `config.rs`) does the cross-field rejection.

use std::fs;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::config::{parse_code_list, parse_usize_list, OutputFile, RunConfig};
use crate::error::{Error, Result};
use crate::filter::SimpleFilter;
use crate::item::{HeaderList, Method};
use crate::payload::PayloadSource;

#[derive(Parser, Debug)]
#[command(name = "webfuzz", version, about = "Web content-discovery fuzzer")]
pub struct Cli {
    /// Target URL containing one or more FUZZ markers.
    #[arg(value_name = "URL")]
    pub url: Option<String>,

    #[arg(short = 'u', long = "url")]
    pub url_flag: Option<String>,

    #[arg(short = 'X', long = "method", default_value = "GET")]
    pub method: String,

    #[arg(short = 'd', long = "data")]
    pub post_data: Option<String>,

    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    #[arg(short = 'b', long = "cookie")]
    pub cookies: Vec<String>,

    #[arg(short = 'w', long = "wordlist")]
    pub wordlists: Vec<String>,

    /// Inline payload list, comma-separated, for quick runs and tests.
    #[arg(short = 'z', long = "payload")]
    pub inline_payloads: Vec<String>,

    #[arg(short = 't', long = "threads", default_value_t = 40)]
    pub concurrent: usize,

    #[arg(short = 's', long = "delay-ms", default_value_t = 0)]
    pub delay_ms: u64,

    #[arg(short = 'p', long = "proxy")]
    pub proxy: Option<String>,

    #[arg(long = "timeout-secs", default_value_t = 30)]
    pub timeout_secs: u64,

    #[arg(long = "user-agent")]
    pub user_agent: Option<String>,

    #[arg(short = 'F', long = "follow-redirects")]
    pub follow_redirects: bool,

    #[arg(short = 'o', long = "domain-scope")]
    pub domain_based_scope: bool,

    #[arg(short = 'Z', long = "no-scanmode")]
    pub no_scanmode: bool,

    #[arg(long = "limit-requests")]
    pub limit_requests: Option<u64>,

    #[arg(long = "dry-run")]
    pub dry_run: bool,

    #[arg(short = 'R', long = "recursion-depth", default_value_t = 2)]
    pub max_rlevel: u32,

    #[arg(short = 'q', long = "plugin-depth", default_value_t = 2)]
    pub max_plugin_rlevel: u32,

    #[arg(long = "script", value_delimiter = ',')]
    pub scripts: Vec<String>,

    #[arg(short = 'A', long = "default-scripts")]
    pub default_scripts: bool,

    #[arg(long = "cancel-on-plugin-exception")]
    pub cancel_on_plugin_exception: bool,

    #[arg(long = "filter")]
    pub filter: Option<String>,

    #[arg(long = "prefilter")]
    pub prefilters: Vec<String>,

    #[arg(long = "hard-filter")]
    pub hard_filter: bool,

    #[arg(long = "auto-filter")]
    pub auto_filter: bool,

    #[arg(long = "hc")]
    pub hide_codes: Option<String>,
    #[arg(long = "hl")]
    pub hide_lines: Option<String>,
    #[arg(long = "hw")]
    pub hide_words: Option<String>,
    #[arg(long = "hh")]
    pub hide_chars: Option<String>,
    #[arg(long = "sc")]
    pub show_codes: Option<String>,
    #[arg(long = "sl")]
    pub show_lines: Option<String>,
    #[arg(long = "sw")]
    pub show_words: Option<String>,
    #[arg(long = "sh")]
    pub show_chars: Option<String>,

    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    #[arg(short = 'c', long = "no-color")]
    pub no_color: bool,

    #[arg(short = 'a', long = "quiet")]
    pub quiet: bool,

    /// `FILE[,FORMAT]`; only `json` is supported, anything else warns and
    /// falls back to it.
    #[arg(short = 'f', long = "output")]
    pub output: Option<String>,
}

impl Cli {
    pub fn into_config(self) -> Result<RunConfig> {
        let target = self
            .url_flag
            .or(self.url)
            .ok_or_else(|| Error::BadOptions("no target URL given".into()))?;

        let method = Method::from_str(&self.method)?;

        let mut headers = HeaderList::default();
        for raw in &self.headers {
            let (name, value) = raw
                .split_once(':')
                .ok_or_else(|| Error::BadOptions(format!("malformed header '{raw}'")))?;
            headers.push(name.trim(), value.trim());
        }
        if !self.cookies.is_empty() {
            headers.push("Cookie", self.cookies.join("; "));
        }
        if let Some(ua) = &self.user_agent {
            headers.push("User-Agent", ua.clone());
        }

        let mut sources = Vec::new();
        for path in &self.wordlists {
            let content = fs::read_to_string(path).map_err(|e| Error::BadFile {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let words: Vec<String> = content.lines().map(str::to_string).collect();
            sources.push(PayloadSource::from_words(words));
        }
        for inline in &self.inline_payloads {
            let words: Vec<String> = inline.split(',').map(str::to_string).collect();
            sources.push(PayloadSource::from_words(words));
        }

        let mut simple = SimpleFilter::default();
        if let Some(raw) = &self.hide_codes {
            simple.hide_codes = parse_code_list(raw);
        }
        if let Some(raw) = &self.hide_lines {
            simple.hide_lines = parse_usize_list(raw);
        }
        if let Some(raw) = &self.hide_words {
            simple.hide_words = parse_usize_list(raw);
        }
        if let Some(raw) = &self.hide_chars {
            simple.hide_chars = parse_usize_list(raw);
        }
        if let Some(raw) = &self.show_codes {
            simple.show_codes = parse_code_list(raw);
        }
        if let Some(raw) = &self.show_lines {
            simple.show_lines = parse_usize_list(raw);
        }
        if let Some(raw) = &self.show_words {
            simple.show_words = parse_usize_list(raw);
        }
        if let Some(raw) = &self.show_chars {
            simple.show_chars = parse_usize_list(raw);
        }

        let out_file = self.output.map(|raw| {
            let (path, format) = raw.split_once(',').unwrap_or((raw.as_str(), "json"));
            if !format.eq_ignore_ascii_case("json") {
                log::warn!("output format '{format}' is not supported, writing json");
            }
            OutputFile { path: path.to_string() }
        });

        Ok(RunConfig {
            target,
            method,
            body: self.post_data,
            headers,
            follow_redirects: self.follow_redirects,
            domain_based_scope: self.domain_based_scope,
            sources,
            concurrent: self.concurrent.max(1),
            delay: Duration::from_millis(self.delay_ms),
            proxy: self.proxy,
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            user_agent: self.user_agent,
            dry_run: self.dry_run,
            no_scanmode: self.no_scanmode,
            limit_requests: self.limit_requests,
            max_rlevel: self.max_rlevel,
            max_plugin_rlevel: self.max_plugin_rlevel,
            scripts: self.scripts,
            use_default_scripts: self.default_scripts,
            cancel_on_plugin_exception: self.cancel_on_plugin_exception,
            filter_expr: self.filter,
            prefilter_exprs: self.prefilters,
            hard_filter: self.hard_filter,
            auto_filter: self.auto_filter,
            simple,
            verbose: self.verbose,
            no_color: self.no_color,
            quiet: self.quiet,
            out_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_header_is_rejected() {
        let cli = Cli {
            url: Some("http://h/FUZZ".into()),
            url_flag: None,
            method: "GET".into(),
            post_data: None,
            headers: vec!["not-a-header".into()],
            cookies: Vec::new(),
            wordlists: Vec::new(),
            inline_payloads: vec!["a,b".into()],
            concurrent: 10,
            delay_ms: 0,
            proxy: None,
            timeout_secs: 30,
            user_agent: None,
            follow_redirects: false,
            domain_based_scope: false,
            no_scanmode: false,
            limit_requests: None,
            dry_run: true,
            max_rlevel: 2,
            max_plugin_rlevel: 2,
            scripts: Vec::new(),
            default_scripts: false,
            cancel_on_plugin_exception: false,
            filter: None,
            prefilters: Vec::new(),
            hard_filter: false,
            auto_filter: false,
            hide_codes: None,
            hide_lines: None,
            hide_words: None,
            hide_chars: None,
            show_codes: None,
            show_lines: None,
            show_words: None,
            show_chars: None,
            verbose: false,
            no_color: false,
            quiet: false,
            output: None,
        };
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn inline_payload_becomes_a_source() {
        let cli = Cli {
            url: Some("http://h/FUZZ".into()),
            url_flag: None,
            method: "GET".into(),
            post_data: None,
            headers: Vec::new(),
            cookies: Vec::new(),
            wordlists: Vec::new(),
            inline_payloads: vec!["admin,api".into()],
            concurrent: 10,
            delay_ms: 0,
            proxy: None,
            timeout_secs: 30,
            user_agent: None,
            follow_redirects: false,
            domain_based_scope: false,
            no_scanmode: false,
            limit_requests: None,
            dry_run: true,
            max_rlevel: 2,
            max_plugin_rlevel: 2,
            scripts: Vec::new(),
            default_scripts: false,
            cancel_on_plugin_exception: false,
            filter: None,
            prefilters: Vec::new(),
            hard_filter: false,
            auto_filter: false,
            hide_codes: None,
            hide_lines: None,
            hide_words: None,
            hide_chars: None,
            show_codes: None,
            show_lines: None,
            show_words: None,
            show_chars: None,
            verbose: false,
            no_color: false,
            quiet: false,
            output: None,
        };
        let config = cli.into_config().unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].words, vec!["admin", "api"]);
    }
}
