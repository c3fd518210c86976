//! XLS error types

use thiserror::Error;

/// Result type for XLS operations
pub type XlsResult<T> = std::result::Result<T, XlsError>;

/// Errors that can occur during XLS reading/writing
#[derive(Debug, Error)]
pub enum XlsError {
    /// IO error (also covers CFB errors which use std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format
    #[error("Invalid XLS format: {0}")]
    InvalidFormat(String),

    /// Unsupported version
    #[error("Unsupported XLS version: {0}")]
    UnsupportedVersion(String),

    /// Truncated or undecodable record body
    #[error("Parse error: {0}")]
    Parse(String),

    /// A record that breaks the stream structure
    #[error("Malformed record 0x{record_type:04X} at offset {offset}: {reason}")]
    Malformed {
        record_type: u16,
        offset: u64,
        reason: String,
    },

    /// Valid BIFF8 that this library does not handle
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Formula error
    #[error("Formula error: {0}")]
    Formula(#[from] biffbook_formula::FormulaError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] biffbook_core::Error),
}

impl XlsError {
    pub(crate) fn malformed<S: Into<String>>(record_type: u16, offset: u64, reason: S) -> Self {
        XlsError::Malformed {
            record_type,
            offset,
            reason: reason.into(),
        }
    }
}
