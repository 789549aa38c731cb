//! Error types for each layer of the cache.
//!
//! None of these reach the user directly except through the binary. Storage
//! errors are always swallowed by the store, fetch errors drive the proxy's
//! fallback logic, and API errors are what the coordinator escalates.

use std::path::PathBuf;

/// Failures of the persistent SQLite backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("failed to create database directory {}: {source}", path.display())]
  CreateDir {
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("failed to open database at {}: {source}", path.display())]
  Open {
    path: PathBuf,
    source: rusqlite::Error,
  },

  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to encode or decode payload: {0}")]
  Codec(#[from] serde_json::Error),

  #[error("connection lock poisoned")]
  Poisoned,

  #[error("storage task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

/// Failures of a single network fetch.
///
/// A non-2xx response is not a fetch error; it is a response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
  #[error("network failure: {0}")]
  Network(String),

  #[error("request proxy is not running")]
  ProxyUnavailable,
}

/// Failures of a call against the authoritative API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error("API returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("invalid JSON payload: {0}")]
  Json(#[from] serde_json::Error),

  #[error("invalid API url: {0}")]
  Url(#[from] url::ParseError),
}

impl ApiError {
  /// HTTP status of the failed call, if the server answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }
}
