//! Flags a small, fixed set of server-disclosure response headers.
//!
//! Grounded on the disclosure-only slice of the original `headers` plugin:
//! it drops the uncommon-header heuristics (those need the knowledge-base
//! keyed de-duplication the core doesn't carry) and keeps the
//! unambiguously useful signal, a direct `Server`/`X-Powered-By`/`Via`
//! check against the response.

use crate::item::{FuzzResult, Severity};
use crate::plugin::{Plugin, PluginOutput};

const DISCLOSURE_HEADERS: &[&str] = &["Server", "X-Powered-By", "Via"];

pub struct HeadersPlugin;

impl Plugin for HeadersPlugin {
    fn name(&self) -> &'static str {
        "headers"
    }

    fn run_once(&self) -> bool {
        false
    }

    fn validate(&self, result: &FuzzResult) -> bool {
        !result.has_exception()
    }

    fn run(&self, result: &FuzzResult) -> Vec<PluginOutput> {
        let Some(response) = &result.history.response else {
            return Vec::new();
        };
        DISCLOSURE_HEADERS
            .iter()
            .filter_map(|name| {
                response.headers.get(name).map(|value| PluginOutput::Finding {
                    message: format!("{name}: {value}"),
                    severity: Severity::Info,
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

    fn result_with_headers(headers: HeaderList) -> FuzzResult {
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
        r.history.response = Some(Response {
            status: 200,
            headers,
            body: Vec::new(),
            elapsed: Duration::default(),
        });
        r
    }

    #[test]
    fn flags_server_header() {
        let mut headers = HeaderList::default();
        headers.push("Server", "nginx/1.18");
        let result = result_with_headers(headers);
        let outputs = HeadersPlugin.run(&result);
        assert_eq!(outputs.len(), 1);
        assert!(matches!(outputs[0], PluginOutput::Finding { .. }));
    }

    #[test]
    fn no_disclosure_headers_yields_no_findings() {
        let result = result_with_headers(HeaderList::default());
        assert!(HeadersPlugin.run(&result).is_empty());
    }
}
