use std::cmp::Ordering;

use granite_primitives::RowId;
use granite_store::block_list::DEFAULT_BLOCK_ENTRIES;
use granite_store::BlockIntList;

use crate::error::Result;
use crate::scheme::SchemeSource;

/// The maintained scheme: a block integer list of row indices kept in the
/// collation order of the indexed column. Inserts and removes are
/// comparator-driven binary operations against the backing table.
#[derive(Debug, Clone)]
pub struct InsertSort {
    list: BlockIntList,
    immutable: bool,
}

impl Default for InsertSort {
    fn default() -> Self {
        Self::new()
    }
}

impl InsertSort {
    pub fn new() -> InsertSort {
        InsertSort {
            list: BlockIntList::new(DEFAULT_BLOCK_ENTRIES),
            immutable: false,
        }
    }

    /// Wrap an already-ordered list, e.g. one loaded from the index-set
    /// store.
    pub fn from_list(list: BlockIntList, immutable: bool) -> InsertSort {
        InsertSort { list, immutable }
    }

    /// Rebuild from every row of the source.
    pub fn build(source: &dyn SchemeSource) -> Result<InsertSort> {
        let mut scheme = InsertSort::new();
        for row in source.scheme_rows()? {
            scheme.insert(source, row)?;
        }
        Ok(scheme)
    }

    pub fn list(&self) -> &BlockIntList {
        &self.list
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// A copy; an immutable copy shares blocks with this scheme.
    pub fn copy(&self, immutable: bool) -> InsertSort {
        InsertSort {
            list: self.list.clone(),
            immutable,
        }
    }

    pub(crate) fn insert(&mut self, source: &dyn SchemeSource, row: RowId) -> Result<()> {
        assert!(!self.immutable, "insert into an immutable scheme");
        let value = source.scheme_cell(row)?;
        // Insert after the last equal value: equal rows keep insertion order.
        let mut err = None;
        let pos = self.list.upper_bound_by(|existing| {
            match source.scheme_cell(RowId(existing)) {
                Ok(cell) => cell.total_compare(&value),
                Err(e) => {
                    err.get_or_insert(e);
                    Ordering::Equal
                }
            }
        });
        if let Some(e) = err {
            return Err(e);
        }
        self.list.insert_at(pos, row.0);
        Ok(())
    }

    pub(crate) fn remove(&mut self, source: &dyn SchemeSource, row: RowId) -> Result<()> {
        assert!(!self.immutable, "remove from an immutable scheme");
        let value = source.scheme_cell(row)?;
        let mut err = None;
        let mut pos = self.list.lower_bound_by(|existing| {
            match source.scheme_cell(RowId(existing)) {
                Ok(cell) => cell.total_compare(&value),
                Err(e) => {
                    err.get_or_insert(e);
                    Ordering::Equal
                }
            }
        });
        if let Some(e) = err {
            return Err(e);
        }
        // Walk the run of equal values for the exact row.
        while pos < self.list.len() {
            if self.list.get(pos) == row.0 {
                self.list.remove_at(pos);
                return Ok(());
            }
            let cell = source.scheme_cell(RowId(self.list.get(pos)))?;
            if cell.total_compare(&value) != Ordering::Equal {
                break;
            }
            pos += 1;
        }
        panic!("row {row} is not present in the scheme");
    }
}
