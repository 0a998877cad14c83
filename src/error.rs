//! The error taxonomy shared by every stage of the pipeline.
//!
//! Replaces the teacher's reliance on `libafl_bolts::Error`: a single enum
//! covers the kinds a run can fail with, and `Result<T, Error>` propagates
//! with `?` throughout instead of exceptions.

use thiserror::Error;

/// All the ways a run can go wrong, grouped the way the CLI reports them.
#[derive(Debug, Error)]
pub enum Error {
    /// User-supplied configuration is inconsistent (bad flag combination, no
    /// marker present, empty payload set, ...). Surfaced at startup.
    #[error("bad options: {0}")]
    BadOptions(String),

    /// I/O or parse failure on a wordlist, recipe, or cache file.
    #[error("bad file {path}: {reason}")]
    BadFile { path: String, reason: String },

    /// A filter expression failed to parse or referenced an unknown field.
    #[error("incorrect filter: {0}")]
    IncorrectFilter(String),

    /// An invariant was violated somewhere in the pipeline.
    #[error("internal error: {0}")]
    Internal(String),

    /// A plugin failed to construct.
    #[error("failed to load plugin {name}: {reason}")]
    PluginLoad { name: String, reason: String },

    /// A per-request transport failure (DNS, connect, TLS, timeout). Carried
    /// on the `FuzzResult` it belongs to rather than propagated, unless
    /// `-Z` (no-scanmode) is set.
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
