//! The data model that flows through the pipeline: [`FuzzItem`], its
//! [`FuzzResult`] specialization, and the request/response pair a result
//! carries once transport has run.

use std::time::Duration;

use crate::payload::PayloadManager;

/// The step increment assigned to seeds created during a run, relative to
/// the seed that spawned them. Keeps breadth-first ordering between seeds
/// while preserving FIFO within one seed (ties are broken by insertion
/// sequence in the priority queue, see `queue.rs`).
pub const PRIORITY_STEP: i64 = 10;

/// Sentinel status code attached to results that failed transport.
pub const ERROR_CODE: u16 = 0;

/// Cap on `backfeed_level`/`plugin_rlevel` depth for plugin- and
/// redirect-synthesized items, independent of the user's `-R`/`-q` flags.
pub const MAX_BACKFEED_LEVEL: u32 = 15;

/// Every value a [`FuzzItem`] can carry as it moves through stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    /// The single item that kicks off the pipeline.
    StartSeed,
    /// A new directory expansion point, either the initial one or one
    /// synthesized by recursion/plugins.
    Seed,
    /// A single pre-resolved request synthesized by a redirect or plugin.
    Backfeed,
    /// A completed request/response pair.
    Result,
    /// An informational line for the printers (not a request outcome).
    Message,
    /// A fatal, non-recoverable condition; carries `exception`.
    Error,
    /// Marks the end of one seed's dictionary; a priority-ordered tombstone.
    EndSeed,
}

/// The envelope every pipeline message is wrapped in.
#[derive(Debug, Clone)]
pub struct FuzzItem {
    pub item_type: ItemType,
    /// Lower drains earlier. Siblings within a seed share a priority value;
    /// children seeds receive `parent_priority + PRIORITY_STEP`.
    pub priority: i64,
    pub discarded: bool,
    pub exception: Option<String>,
}

impl FuzzItem {
    pub fn new(item_type: ItemType) -> Self {
        Self {
            item_type,
            priority: 0,
            discarded: false,
            exception: None,
        }
    }

    pub fn with_priority(item_type: ItemType, priority: i64) -> Self {
        Self {
            item_type,
            priority,
            discarded: false,
            exception: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            item_type: ItemType::Error,
            priority: i64::MIN,
            discarded: false,
            exception: Some(message.into()),
        }
    }
}

/// HTTP method, restricted to what the pipeline ever issues itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }
}

impl std::str::FromStr for Method {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "PATCH" => Ok(Method::Patch),
            other => Err(crate::error::Error::BadOptions(format!(
                "unsupported HTTP method {other}"
            ))),
        }
    }
}

/// An ordered header list; duplicates are legal per HTTP semantics, so this
/// is a plain `Vec` rather than a map. Case-insensitive lookup is provided
/// for the handful of places that need it (redirect following, the `headers`
/// plugin, the filter field schema).
#[derive(Debug, Clone, Default)]
pub struct HeaderList(pub Vec<(String, String)>);

impl HeaderList {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }
}

/// The outgoing half of a [`History`].
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HeaderList,
    pub body: Option<Vec<u8>>,
    pub follow_redirects: bool,
}

/// The incoming half of a [`History`]; absent until transport completes.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

/// The `(Request, Response)` pair a completed [`FuzzResult`] carries.
/// Never mutated once transport has filled it in.
#[derive(Debug, Clone)]
pub struct History {
    pub request: Request,
    pub response: Option<Response>,
}

impl History {
    /// A directory candidate is either a URL whose path ends in `/`, or a
    /// 3xx response whose `Location` resolves (relative to the request URL)
    /// to the same path plus a trailing slash.
    pub fn request_found_directory(&self) -> bool {
        if self.request.url.ends_with('/') {
            return true;
        }
        let Some(response) = &self.response else {
            return false;
        };
        if !(300..400).contains(&response.status) {
            return false;
        }
        let Some(location) = response.headers.get("Location") else {
            return false;
        };
        let Ok(base) = url::Url::parse(&self.request.url) else {
            return false;
        };
        let Ok(resolved) = base.join(location) else {
            return false;
        };
        let resolved_path = resolved.path();
        let request_path = base.path();
        resolved_path == format!("{request_path}/")
    }

    /// Builds the recursion candidate URL by replacing the trailing segment
    /// with the marker again, e.g. `http://h/admin/` -> `http://h/admin/FUZZ`.
    pub fn parse_recursion_url(&self, marker: &str) -> String {
        let base = self.request.url.trim_end_matches('/');
        format!("{base}/{marker}")
    }

    pub fn check_in_scope(&self, target_url: &str, domain_based: bool) -> bool {
        crate::scope::in_scope(&self.request.url, target_url, domain_based)
    }
}

/// Severity of a [`Finding`] attached to a result by a plugin or stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

/// One line of plugin/stage-produced commentary attached to a result.
#[derive(Debug, Clone)]
pub struct Finding {
    pub plugin_name: String,
    pub message: String,
    pub severity: Severity,
}

/// One completed (or failed) request attempt: the unit the user actually
/// sees in the output stream.
#[derive(Debug, Clone)]
pub struct FuzzResult {
    pub item: FuzzItem,
    /// Assigned monotonically once transport completes; `0` beforehand.
    pub result_number: u64,
    pub url: String,
    pub history: History,
    pub payload_man: PayloadManager,
    pub rlevel: u32,
    pub plugin_rlevel: u32,
    pub backfeed_level: u32,
    pub from_plugin: bool,
    pub is_baseline: bool,
    pub plugins_res: Vec<Finding>,
    pub lines: usize,
    pub words: usize,
    pub chars: usize,
    pub timer: Duration,
}

impl FuzzResult {
    pub fn new(url: String, request: Request, payload_man: PayloadManager) -> Self {
        Self {
            item: FuzzItem::new(ItemType::Result),
            result_number: 0,
            url,
            history: History { request, response: None },
            payload_man,
            rlevel: 0,
            plugin_rlevel: 0,
            backfeed_level: 0,
            from_plugin: false,
            is_baseline: false,
            plugins_res: Vec::new(),
            lines: 0,
            words: 0,
            chars: 0,
            timer: Duration::default(),
        }
    }

    pub fn code(&self) -> u16 {
        self.history
            .response
            .as_ref()
            .map(|r| r.status)
            .unwrap_or(ERROR_CODE)
    }

    /// Fills in the derived metrics from a completed transport response.
    /// `lines` counts newlines plus one for a non-empty body; `words` counts
    /// whitespace-delimited runs; `chars` is the decoded body's byte length.
    pub fn apply_response(&mut self, response: Response, decoded_body: &str) {
        self.lines = if decoded_body.is_empty() {
            0
        } else {
            decoded_body.matches('\n').count() + 1
        };
        self.words = decoded_body.split_whitespace().count();
        self.chars = decoded_body.len();
        self.timer = response.elapsed;
        self.history.response = Some(response);
    }

    pub fn mark_transport_error(&mut self, message: impl Into<String>) {
        self.item.exception = Some(message.into());
    }

    pub fn has_exception(&self) -> bool {
        self.item.exception.is_some()
    }
}
