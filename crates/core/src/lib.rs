//! The granite storage and execution core.
//!
//! A [`Conglomerate`] owns the state store and every master table of one
//! database; [`Transaction`]s layer journaled changes over copy-on-write
//! index snapshots and commit through a clash-checked, totally ordered
//! commit protocol. Query execution composes [`expr`] trees over
//! transaction views; the [`catalog`] managers keep trigger, grant and
//! view state cached against their system tables, invalidated by the
//! commit event stream.
//!
//! The SQL parser, planner and wire protocol live outside this crate; it
//! consumes opaque plans (see [`catalog::QueryPlanNode`]) and serves the
//! storage contract below them.

pub mod catalog;
pub mod conglomerate;
pub mod error;
pub mod events;
pub mod expr;
pub mod flush;
pub mod journal;
pub mod locking;
pub mod master_table;
pub mod row;
pub mod schema;
pub mod state_store;
pub mod transaction;
pub mod worker_pool;

pub use conglomerate::Conglomerate;
pub use error::{ConstraintError, DBError, Result, TableError, TransactionError};
pub use events::{CommitEvent, CommitEventBus};
pub use expr::{TableExpr, Variable};
pub use flush::BackgroundFlusher;
pub use journal::{JournalCommand, MasterTableJournal};
pub use locking::{AccessType, LockHandle, LockMode, LockingMechanism};
pub use master_table::{CellCache, MasterTableSource, RowState};
pub use row::RowData;
pub use schema::{ColumnDef, SchemeKind, TableDef, TableName};
pub use state_store::StateStore;
pub use transaction::Transaction;
pub use worker_pool::WorkerPool;
