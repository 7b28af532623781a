use granite_index::SchemeError;
use granite_primitives::{RowId, TableId};
use granite_store::StoreError;
use granite_value::ValueError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("table `{0}` already exists")]
    Exists(String),
    #[error("table `{0}` not found")]
    NotFound(String),
    #[error("table with id {0} not found")]
    IdNotFound(TableId),
    #[error("column `{0}` not found in table `{1}`")]
    ColumnNotFound(String, String),
    #[error("column `{0}` is declared more than once")]
    DuplicateColumnName(String),
    #[error("table `{0}` has no columns")]
    NoColumns(String),
    #[error("row {row} of table `{table}` is not visible")]
    RowNotVisible { table: String, row: RowId },
}

#[derive(Error, Debug)]
pub enum ConstraintError {
    #[error("null value in non-null column `{column}` of table `{table}`")]
    NotNull { table: String, column: String },
    #[error("duplicate value {value} for unique column `{column}` of table `{table}`")]
    Unique {
        table: String,
        column: String,
        value: String,
    },
    #[error("value of type {found:?} cannot be stored in column `{column}` of type {declared:?}")]
    TypeMismatch {
        column: String,
        declared: granite_value::SqlType,
        found: granite_value::SqlType,
    },
}

#[derive(Error, Debug)]
pub enum TransactionError {
    /// Two concurrently committed transactions removed the same row.
    #[error("transaction conflict: row {row} of table `{table}` was removed by a concurrent commit")]
    RowRemoveClash { row: RowId, table: String },
    #[error("the transaction is already closed")]
    Closed,
    #[error("table `{0}` is not part of this transaction")]
    TableNotOpen(String),
}

#[derive(Error, Debug)]
pub enum DBError {
    #[error("StoreError: {0}")]
    Store(#[from] StoreError),
    #[error("SchemeError: {0}")]
    Scheme(#[from] SchemeError),
    #[error("ValueError: {0}")]
    Value(#[from] ValueError),
    #[error("TableError: {0}")]
    Table(#[from] TableError),
    #[error("ConstraintError: {0}")]
    Constraint(#[from] ConstraintError),
    #[error("TransactionError: {0}")]
    Transaction(#[from] TransactionError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DBError {
    /// Whether a retry of the whole transaction may succeed.
    pub fn is_retry_eligible(&self) -> bool {
        matches!(self, DBError::Transaction(TransactionError::RowRemoveClash { .. }))
    }
}

pub type Result<T> = std::result::Result<T, DBError>;
