//! Identifier newtypes used throughout the granite crates.
//!
//! Each identifier is a thin wrapper around an integer. Wrapping them keeps
//! the signatures of the storage and transaction layers honest: a row index
//! cannot be passed where a table id is expected, and vice versa.

use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident($prim:ty)) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub $prim);

        impl $name {
            pub const fn idx(self) -> usize {
                self.0 as usize
            }
        }

        impl From<$prim> for $name {
            fn from(value: $prim) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $prim {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl From<usize> for $name {
            fn from(value: usize) -> Self {
                Self(value as $prim)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_type!(
    /// The identifier of a table within a conglomerate.
    ///
    /// Assigned from the state store's monotonic counter when the table is
    /// created, and never reused.
    TableId(u32)
);

id_type!(
    /// The index of a row within one table's row domain.
    ///
    /// Row ids are offsets into the table's record store (the row at
    /// `RowId(n)` lives in record `n + 1`, record 0 being reserved for the
    /// table definition blob).
    RowId(u32)
);

id_type!(
    /// The ordinal position of a column within a table definition.
    ColId(u32)
);

id_type!(
    /// A commit sequence number.
    ///
    /// Commit ids are assigned monotonically under the conglomerate commit
    /// lock; a transaction observes the snapshot at the commit id current
    /// when it began.
    CommitId(u64)
);

id_type!(
    /// The index of a record in a variable-size record store.
    RecordId(u32)
);

/// The index of a sector in a fixed-size sector store.
///
/// Unlike the other identifiers this is signed: sector chains are terminated
/// by [`SectorId::NIL`] (`-1`), which also marks an empty free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectorId(pub i32);

impl SectorId {
    pub const NIL: SectorId = SectorId(-1);

    pub const fn is_nil(self) -> bool {
        self.0 < 0
    }

    pub const fn idx(self) -> usize {
        self.0 as usize
    }
}

impl From<i32> for SectorId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<SectorId> for i32 {
    fn from(value: SectorId) -> Self {
        value.0
    }
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trip() {
        let t = TableId::from(7u32);
        assert_eq!(u32::from(t), 7);
        assert_eq!(t.idx(), 7);
        assert_eq!(t.to_string(), "7");
    }

    #[test]
    fn nil_sector() {
        assert!(SectorId::NIL.is_nil());
        assert!(!SectorId(0).is_nil());
    }
}
