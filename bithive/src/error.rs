//! Crate-wide error type.

use thiserror::Error;

/// Errors surfaced by the library.
///
/// Per-device poll failures never reach this type during a cycle; the
/// fan-out folds them into "no data" for the device. This type covers the
/// operations a caller asks for directly: store writes and settings
/// changes. Device control calls report [`crate::api_client::FetchError`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("monitor is not running")]
    MonitorStopped,
}

pub type Result<T> = std::result::Result<T, Error>;
