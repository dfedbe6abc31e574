//! Error types for the TabWarden engine.
//!
//! This module defines the error types used throughout the engine crate,
//! providing structured error handling with clear, human-readable messages.
//!
//! The engine's propagation policy is deliberately forgiving: transient host
//! failures (storage reads/writes, tab-directory calls) are logged and the
//! operation is retried on the next natural trigger. The one hard failure is
//! an archive write during a close, which must abort the close entirely.

use thiserror::Error;

use crate::host::{HostError, TabId};

/// Errors that can occur during engine operations.
///
/// This is the primary error type for the engine crate, encompassing all
/// possible failure modes.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Host interface error (tab directory or persistence store).
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The archive write for a closing tab failed.
    ///
    /// A tab is never destroyed without a durable archive record, so this
    /// error aborts the close. The tab remains open and is re-evaluated on
    /// the next sweep.
    #[error("archive write failed for tab {tab_id}: {source}")]
    ArchiveWrite {
        /// The tab whose close was aborted.
        tab_id: TabId,
        /// The underlying store failure.
        #[source]
        source: HostError,
    },
}

/// A specialized `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_error_display() {
        let err = EngineError::Host(HostError::StoreUnavailable("disk full".to_string()));
        assert_eq!(err.to_string(), "host error: storage unavailable: disk full");
    }

    #[test]
    fn archive_write_error_display() {
        let err = EngineError::ArchiveWrite {
            tab_id: 42,
            source: HostError::StoreUnavailable("write denied".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "archive write failed for tab 42: storage unavailable: write denied"
        );
    }

    #[test]
    fn json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid }").unwrap_err();
        let err: EngineError = json_err.into();
        assert!(matches!(err, EngineError::Json(_)));
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn error_source_chain() {
        use std::error::Error;

        let err = EngineError::ArchiveWrite {
            tab_id: 7,
            source: HostError::TabGone(7),
        };
        assert!(err.source().is_some());
    }
}
