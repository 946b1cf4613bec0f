use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coord::CellCoord;

/// Errors raised while compiling, evaluating or authorizing sheet operations
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum SheetError {
    /// Formula source failed to compile; sticky until the cell is rewritten
    #[error("{cell}:{position}: {message}")]
    Parse {
        cell: String,
        position: usize,
        message: String,
    },

    /// Operator/shape mismatch, non-boolean condition, non-numeric arithmetic
    #[error("{0}")]
    RuntimeType(String),

    #[error("undefined identifier '{0}'")]
    UndefinedIdentifier(String),

    #[error("undefined function '{0}'")]
    UndefinedFunction(String),

    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("missing field '{0}'")]
    MissingField(String),

    /// A cell was re-entered while being evaluated
    #[error("Loop")]
    ValueDependencyLoop(CellCoord),

    /// A permission cell was re-entered while being evaluated
    #[error("Perm Loop")]
    PermissionDependencyLoop(CellCoord),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Raised by the `ASSERT` built-in with the user's message
    #[error("{0}")]
    Assertion(String),

    #[error("no such table '{0}'")]
    NoSuchTable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("mail error: {0}")]
    Mail(String),

    #[error("script error: {0}")]
    Script(String),
}

impl SheetError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            SheetError::Parse { .. } => "PARSE_ERROR",
            SheetError::RuntimeType(_) => "TYPE_ERROR",
            SheetError::UndefinedIdentifier(_) => "UNDEFINED_IDENTIFIER",
            SheetError::UndefinedFunction(_) => "UNDEFINED_FUNCTION",
            SheetError::IndexOutOfBounds { .. } => "INDEX_OUT_OF_BOUNDS",
            SheetError::MissingField(_) => "MISSING_FIELD",
            SheetError::ValueDependencyLoop(_) => "LOOP",
            SheetError::PermissionDependencyLoop(_) => "PERM_LOOP",
            SheetError::PermissionDenied(_) => "PERMISSION_DENIED",
            SheetError::Assertion(_) => "ASSERTION",
            SheetError::NoSuchTable(_) => "NO_SUCH_TABLE",
            SheetError::InvalidArgument(_) => "INVALID_ARGUMENT",
            SheetError::Mail(_) => "MAIL",
            SheetError::Script(_) => "SCRIPT",
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        SheetError::RuntimeType(message.into())
    }

    /// Dependency loops are never cached; the cell is left retryable
    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            SheetError::ValueDependencyLoop(_) | SheetError::PermissionDependencyLoop(_)
        )
    }
}
