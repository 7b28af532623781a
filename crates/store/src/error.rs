use granite_primitives::{RecordId, SectorId};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("store `{path}` carries bad magic {found:#010x}")]
    BadMagic { path: PathBuf, found: u32 },
    #[error("store `{path}` has unsupported format version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },
    #[error("sector {0} is out of bounds")]
    SectorOutOfBounds(SectorId),
    #[error("sector {0} is not in use")]
    SectorNotInUse(SectorId),
    #[error("record {0} is not allocated")]
    RecordNotAllocated(RecordId),
    #[error("payload of {len} bytes exceeds sector capacity {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },
    #[error("store is corrupt: {0}")]
    Corrupt(String),
    #[error("database is already in use (lock file `{0}` is held)")]
    AlreadyInUse(PathBuf),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for std::io::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }
}
