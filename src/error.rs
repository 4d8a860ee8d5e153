//! Application-wide error types.
//!
//! Library modules use specific error types via `thiserror`, while
//! CLI/main uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error`]: Top-level error enum
//! - Module-specific errors ([`ScanError`], [`PlayerError`]) for detailed handling
//! - All errors implement `std::error::Error` for compatibility
//!
//! # Example
//!
//! ```ignore
//! use pocket_player::error::{Error, Result};
//!
//! async fn rebuild(store: &SqliteLibraryStore) -> Result<()> {
//!     let tracks = store.load_all().await?; // Database errors auto-convert
//!     Ok(())
//! }
//! ```

use crate::player::PlayerError;
use crate::scanner::ScanError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Device scan failed
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// Audio playback error
    #[error("Playback error: {0}")]
    Playback(#[from] PlayerError),

    /// Library store failure that is not a database error
    #[error("Library store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_scan_error_converts() {
        let err: Error = ScanError::RootNotFound(PathBuf::from("/sdcard/Music")).into();
        assert!(err.to_string().contains("/sdcard/Music"));
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::store("disk full").context("while applying library changes");
        let msg = err.to_string();
        assert!(msg.contains("while applying library changes"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_playback_error_converts() {
        let err: Error = PlayerError::ChannelClosed.into();
        assert!(err.to_string().contains("channel closed"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(Error::config("bad repeat mode"));
        let with_ctx = result.with_context("loading config");
        assert!(with_ctx.unwrap_err().to_string().contains("loading config"));
    }
}
