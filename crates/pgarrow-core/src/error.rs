use thiserror::Error;

use crate::transaction::Operation;

/// Errors that can occur in pgarrow-core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("unknown operation kind '{0}'")]
    UnknownOperation(String),

    #[error("invalid {op} transaction: {reason}")]
    InvalidTransaction { op: Operation, reason: String },

    #[error("column '{0}' holds an unchanged TOAST value and cannot be rendered as SQL")]
    UnchangedValue(String),

    #[error("refusing to emit unquoted SQL literal: {0}")]
    UnsafeLiteral(String),

    #[error("{0} statement has no columns to write")]
    EmptyColumnList(Operation),

    #[error("record encoding error: {0}")]
    Record(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(op: Operation, reason: impl Into<String>) -> Self {
        Error::InvalidTransaction {
            op,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
