//! Error types for the honeypot core.
//!
//! Two failure classes exist: a failed clone of the root page aborts that
//! clone and is surfaced to the caller, while persistence failures on the
//! log/blocklist/config files are reported on the tracing channel and never
//! take down the serving loop.

use thiserror::Error;

/// Fatal failure of a clone operation. Per-asset fetch failures are not
/// errors at this level; they degrade to the remote-URL fallback.
#[derive(Debug, Error)]
pub enum CloneError {
    #[error("failed to fetch root page {url}: {source}")]
    RootFetch {
        url: String,
        source: reqwest::Error,
    },
}

/// Write failure for one of the persisted files. Callers log and continue.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config serialization failed: {0}")]
    Toml(#[from] toml::ser::Error),
}
