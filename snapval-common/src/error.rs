//! Error types shared by the SnapVal services.

use thiserror::Error;

/// Convenience alias for fallible SnapVal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors common to the SnapVal services.
///
/// Service crates define richer error types at their API boundaries;
/// this enum covers the shared infrastructure paths (configuration
/// resolution and filesystem access).
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
