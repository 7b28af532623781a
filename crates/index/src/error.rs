use granite_primitives::RowId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemeError {
    #[error("could not read row {0}: {1}")]
    Cell(RowId, String),
    #[error("invalid regular expression `{pattern}`: {reason}")]
    BadRegex { pattern: String, reason: String },
    #[error("no regular expression bridge is installed")]
    NoRegexBridge,
}

pub type Result<T> = std::result::Result<T, SchemeError>;
