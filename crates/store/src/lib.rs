//! On-disk storage for granite tables.
//!
//! Three layers, lowest first:
//!
//! * [`sector`]: a paged file of equally sized sectors with a free list, a
//!   reserved header area and a write-ahead journal for crash recovery.
//! * [`record`]: variable-size, optionally Deflate-compressed records
//!   chained across sectors of an allocation file (`.axi`) and a data file
//!   (`.dss`).
//! * [`index_store`]: persistent ordered lists of row indices (`.iid`),
//!   snapshot-read and commit-swapped.
//!
//! [`lock_file`] guards a whole database directory against concurrent
//! opens.

pub mod block_list;
mod cache;
pub mod error;
pub mod index_store;
mod journal;
pub mod lock_file;
pub mod record;
pub mod sector;

pub use block_list::BlockIntList;
pub use error::{Result, StoreError};
pub use index_store::{IndexSetStore, SnapshotIndexSet};
pub use lock_file::DatabaseLock;
pub use record::{AllocEntry, RecordReader, RecordWriter, StoreStatistics, VarRecordStore};
pub use sector::FixedSectorStore;
