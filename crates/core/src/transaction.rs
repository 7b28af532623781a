use std::collections::HashMap;
use std::sync::Arc;

use granite_index::{SelectableRange, SelectableScheme};
use granite_primitives::{CommitId, RowId, TableId};
use granite_store::SnapshotIndexSet;
use granite_value::TypedValue;
use log::warn;

use crate::conglomerate::ConglomerateInner;
use crate::error::{Result, TableError, TransactionError};
use crate::journal::{JournalCommand, MasterTableJournal};
use crate::master_table::{CellCache, MasterTableSource, VisibleColumnSource};
use crate::row::RowData;
use crate::schema::{TableDef, TableName};

/// The per-transaction view of one table: a copy-on-write snapshot of its
/// index lists, mutable scheme copies over them, and the append-only
/// journal of this transaction's changes.
pub(crate) struct TxTable {
    pub(crate) master: Arc<MasterTableSource>,
    pub(crate) set: SnapshotIndexSet,
    pub(crate) schemes: Vec<SelectableScheme>,
    pub(crate) journal: MasterTableJournal,
}

impl TxTable {
    fn new(master: Arc<MasterTableSource>) -> TxTable {
        let set = master.create_index_set();
        let schemes = (0..master.table_def().column_count())
            .map(|col| master.scheme_for_column(&set, col))
            .collect();
        let journal = MasterTableJournal::new(master.table_id());
        TxTable {
            master,
            set,
            schemes,
            journal,
        }
    }

    fn visible_contains(&self, row: RowId) -> bool {
        self.set.index(0).contains(row.0)
    }

    fn add_to_view(&mut self, row: RowId) -> Result<()> {
        let visible = self.set.index_mut(0);
        let pos = visible.lower_bound_by(|v| v.cmp(&row.0));
        visible.insert_at(pos, row.0);
        for (col, scheme) in self.schemes.iter_mut().enumerate() {
            if !matches!(scheme, SelectableScheme::BlindScan(_)) {
                let source = VisibleColumnSource {
                    master: &self.master,
                    column: col,
                    visible: self.set.index(0),
                };
                scheme.insert(&source, row)?;
            }
        }
        Ok(())
    }

    /// The `INITIALLY IMMEDIATE` uniqueness probe: reject a row whose value
    /// in a unique column is already visible in this transaction's view.
    /// `exclude` names the row an update is about to replace.
    fn check_unique(&self, row: &RowData, exclude: Option<RowId>) -> Result<()> {
        for (col, column) in self.master.table_def().columns().iter().enumerate() {
            if !column.unique {
                continue;
            }
            let value = row.cell(col);
            if value.is_null() {
                continue;
            }
            let source = VisibleColumnSource {
                master: &self.master,
                column: col,
                visible: self.set.index(0),
            };
            let hits = self.schemes[col].select_equal(&source, value)?;
            if hits.iter().any(|&hit| Some(hit) != exclude) {
                return Err(crate::error::ConstraintError::Unique {
                    table: self.master.table_def().table_name().to_string(),
                    column: column.name.clone(),
                    value: value.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn remove_from_view(&mut self, row: RowId) -> Result<()> {
        self.set.index_mut(0).remove_value(row.0);
        for (col, scheme) in self.schemes.iter_mut().enumerate() {
            if !matches!(scheme, SelectableScheme::BlindScan(_)) {
                let source = VisibleColumnSource {
                    master: &self.master,
                    column: col,
                    visible: self.set.index(0),
                };
                scheme.remove(&source, row)?;
            }
        }
        Ok(())
    }
}

/// An open transaction over a conglomerate.
///
/// A transaction observes the snapshot at the commit id current when it
/// began; its own writes are layered on top through per-table journals and
/// copy-on-write index snapshots. Dropping a transaction without committing
/// rolls it back.
pub struct Transaction {
    pub(crate) inner: Arc<ConglomerateInner>,
    pub(crate) serial: u64,
    pub(crate) snapshot_id: CommitId,
    pub(crate) tables: HashMap<TableId, TxTable>,
    pub(crate) closed: bool,
}

impl Transaction {
    /// Built by the conglomerate under its commit lock, so the snapshot id
    /// and every table's index snapshot describe the same committed state.
    pub(crate) fn new(
        inner: Arc<ConglomerateInner>,
        serial: u64,
        snapshot_id: CommitId,
        masters: Vec<Arc<MasterTableSource>>,
    ) -> Transaction {
        let tables = masters
            .into_iter()
            .map(|master| (master.table_id(), TxTable::new(master)))
            .collect();
        Transaction {
            inner,
            serial,
            snapshot_id,
            tables,
            closed: false,
        }
    }

    pub fn snapshot_id(&self) -> CommitId {
        self.snapshot_id
    }

    /// Resolve a table of this transaction's snapshot by name. Tables
    /// created after the transaction began are not visible.
    pub fn open_table(&mut self, name: &TableName) -> Result<TableId> {
        self.tables
            .iter()
            .find(|(_, t)| t.master.table_def().table_name() == name)
            .map(|(&id, _)| id)
            .ok_or_else(|| TableError::NotFound(name.to_string()).into())
    }

    pub fn table_def(&self, table: TableId) -> Result<Arc<TableDef>> {
        Ok(self.tx_table(table)?.master.table_def().clone())
    }

    fn tx_table(&self, table: TableId) -> Result<&TxTable> {
        self.tables
            .get(&table)
            .ok_or_else(|| TransactionError::TableNotOpen(table.to_string()).into())
    }

    fn tx_table_mut(&mut self, table: TableId) -> Result<&mut TxTable> {
        self.tables
            .get_mut(&table)
            .ok_or_else(|| TransactionError::TableNotOpen(table.to_string()).into())
    }

    /// Serialize `row`, journal a `TABLE_ADD`, and index the new row in
    /// this transaction's view. Returns the new row's index.
    pub fn add_row(&mut self, table: TableId, row: RowData) -> Result<RowId> {
        row.check_constraints()?;
        let t = self.tx_table_mut(table)?;
        t.check_unique(&row, None)?;
        let row_id = t.master.write_row(&row)?;
        t.journal.add_entry(JournalCommand::TableAdd, row_id);
        if let Err(e) = t.add_to_view(row_id) {
            // Undo the half-added row: journal entry and record.
            t.journal.rollback_entries(1);
            let _ = t.master.rollback_journal(&single_add(table, row_id));
            return Err(e);
        }
        Ok(row_id)
    }

    /// Journal a `TABLE_REMOVE` for `row`. Physical deletion is deferred to
    /// the commit merge.
    pub fn remove_row(&mut self, table: TableId, row: RowId) -> Result<()> {
        let t = self.tx_table_mut(table)?;
        if !t.visible_contains(row) {
            return Err(TableError::RowNotVisible {
                table: t.master.table_def().table_name().to_string(),
                row,
            }
            .into());
        }
        t.journal.add_entry(JournalCommand::TableRemove, row);
        t.remove_from_view(row)?;
        Ok(())
    }

    /// Replace `old` with `row`, journaled as an update pair so commit
    /// clash detection and cache invalidation see one update, not an
    /// unrelated delete and insert.
    pub fn update_row(&mut self, table: TableId, old: RowId, row: RowData) -> Result<RowId> {
        row.check_constraints()?;
        let t = self.tx_table_mut(table)?;
        if !t.visible_contains(old) {
            return Err(TableError::RowNotVisible {
                table: t.master.table_def().table_name().to_string(),
                row: old,
            }
            .into());
        }
        t.check_unique(&row, Some(old))?;
        let new_row = t.master.write_row(&row)?;
        t.journal.add_entry(JournalCommand::TableUpdateRemove, old);
        t.journal.add_entry(JournalCommand::TableUpdateAdd, new_row);
        t.remove_from_view(old)?;
        if let Err(e) = t.add_to_view(new_row) {
            t.journal.rollback_entries(2);
            let _ = t.add_to_view(old);
            let _ = t.master.rollback_journal(&single_add(table, new_row));
            return Err(e);
        }
        Ok(new_row)
    }

    /// The rows visible to this transaction, ascending by row index.
    pub fn visible_rows(&self, table: TableId) -> Result<Vec<RowId>> {
        Ok(self.tx_table(table)?.set.index(0).iter().map(RowId).collect())
    }

    pub fn row_count(&self, table: TableId) -> Result<usize> {
        Ok(self.tx_table(table)?.set.index(0).len())
    }

    pub fn cell(&self, table: TableId, col: usize, row: RowId) -> Result<TypedValue> {
        self.tx_table(table)?.master.cell(col, row)
    }

    pub fn cell_with_cache(&self, cache: &mut CellCache, table: TableId, col: usize, row: RowId) -> Result<TypedValue> {
        self.tx_table(table)?.master.cell_with_cache(cache, col, row)
    }

    /// Run a range select through the column's scheme, in this
    /// transaction's view.
    pub fn select_ranges(&self, table: TableId, col: usize, ranges: &[SelectableRange]) -> Result<Vec<RowId>> {
        let t = self.tx_table(table)?;
        let source = VisibleColumnSource {
            master: &t.master,
            column: col,
            visible: t.set.index(0),
        };
        Ok(t.schemes[col].select_ranges(&source, ranges)?)
    }

    /// The column's scheme together with this view's row enumeration;
    /// the expression layer drives all thirteen select operations off this.
    pub(crate) fn scheme_and_source<'a>(
        &'a self,
        table: TableId,
        col: usize,
    ) -> Result<(&'a SelectableScheme, VisibleColumnSource<'a>)> {
        let t = self.tx_table(table)?;
        Ok((
            &t.schemes[col],
            VisibleColumnSource {
                master: &t.master,
                column: col,
                visible: t.set.index(0),
            },
        ))
    }

    pub(crate) fn master(&self, table: TableId) -> Result<&Arc<MasterTableSource>> {
        Ok(&self.tx_table(table)?.master)
    }

    /// Create a table. Takes effect immediately in the conglomerate's
    /// catalog (DDL is not journaled with row changes).
    pub fn create_table(&mut self, def: TableDef) -> Result<TableId> {
        self.inner.create_table(def)
    }

    pub fn drop_table(&mut self, name: &TableName) -> Result<()> {
        self.inner.drop_table(name)
    }

    /// Commit every journaled change. On a clash the transaction is rolled
    /// back and [`TransactionError::RowRemoveClash`] is returned; the
    /// caller may retry with a fresh transaction.
    pub fn commit(mut self) -> Result<CommitId> {
        self.closed = true;
        let inner = self.inner.clone();
        inner.commit_transaction(&mut self)
    }

    /// Discard every journaled change, physically deleting rows this
    /// transaction added.
    pub fn rollback(mut self) {
        self.closed = true;
        let inner = self.inner.clone();
        inner.rollback_transaction(&mut self);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.closed {
            warn!("transaction {} dropped without commit or rollback; rolling back", self.serial);
            self.closed = true;
            let inner = self.inner.clone();
            inner.rollback_transaction(self);
        }
    }
}

fn single_add(table: TableId, row: RowId) -> MasterTableJournal {
    let mut j = MasterTableJournal::new(table);
    j.add_entry(JournalCommand::TableAdd, row);
    j
}
