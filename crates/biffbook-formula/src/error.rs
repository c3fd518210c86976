//! Formula error types

use thiserror::Error;

use crate::names::NameId;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Errors that can occur while parsing, rendering or managing formulas
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormulaError {
    /// Formula text could not be parsed
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// Unknown function
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Wrong number of arguments
    #[error("Wrong number of arguments for {function}: expected {expected}, got {actual}")]
    ArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },

    /// A sheet-qualified reference names a sheet the workbook does not have
    #[error("Unknown sheet: {0}")]
    UnknownSheet(String),

    /// A reference names an external workbook that has not been linked
    #[error("Unknown external workbook: {0}")]
    UnknownExternalWorkbook(String),

    /// A non-deleted name with the same text already exists in that scope
    #[error("Name '{0}' is already defined in this scope")]
    DuplicateName(String),

    /// Name text that Excel would not accept
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Name index that does not exist in the table
    #[error("No defined name with index {0}")]
    NameNotFound(NameId),

    /// The name exists but has been deleted
    #[error("Defined name {0} has been deleted")]
    NameDeleted(NameId),

    /// External link index that does not exist in the table
    #[error("No external link with index {0}")]
    LinkNotFound(u16),

    /// Token sequence that does not form a valid expression
    #[error("Malformed token sequence: {0}")]
    MalformedTokens(String),
}

impl FormulaError {
    pub(crate) fn parse<S: Into<String>>(position: usize, message: S) -> Self {
        FormulaError::Parse {
            position,
            message: message.into(),
        }
    }
}
