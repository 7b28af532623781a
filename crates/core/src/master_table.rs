use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use granite_index::scheme::SchemeSource;
use granite_index::{InsertSort, SchemeError, SelectableScheme};
use granite_primitives::{CommitId, RecordId, RowId, TableId};
use granite_store::{BlockIntList, IndexSetStore, SnapshotIndexSet, StoreError, VarRecordStore};
use granite_value::TypedValue;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, TableError};
use crate::journal::MasterTableJournal;
use crate::schema::{SchemeKind, TableDef};

// Row state, held in the upper 24 bits of a record's type key. The low
// byte belongs to the record store.
pub const ROW_STATE_UNCOMMITTED: i32 = 0x000;
pub const ROW_STATE_COMMITTED_ADDED: i32 = 0x100;
pub const ROW_STATE_COMMITTED_REMOVED: i32 = 0x200;
pub const ROW_STATE_MARKED_DELETED: i32 = 0x300;

/// Lifecycle state of one physical row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Uncommitted,
    CommittedAdded,
    CommittedRemoved,
    MarkedDeleted,
}

impl RowState {
    pub fn from_type_key(key: i32) -> RowState {
        match key & 0x300 {
            ROW_STATE_COMMITTED_ADDED => RowState::CommittedAdded,
            ROW_STATE_COMMITTED_REMOVED => RowState::CommittedRemoved,
            ROW_STATE_MARKED_DELETED => RowState::MarkedDeleted,
            _ => RowState::Uncommitted,
        }
    }

    pub fn to_type_key(self) -> i32 {
        match self {
            RowState::Uncommitted => ROW_STATE_UNCOMMITTED,
            RowState::CommittedAdded => ROW_STATE_COMMITTED_ADDED,
            RowState::CommittedRemoved => ROW_STATE_COMMITTED_REMOVED,
            RowState::MarkedDeleted => ROW_STATE_MARKED_DELETED,
        }
    }
}

/// Per-reader fast path for sequential column access: the record bytes of
/// the last row read, plus how far into them the reader has skipped.
#[derive(Debug, Default)]
pub struct CellCache {
    row: Option<RowId>,
    bytes: Vec<u8>,
    next_col: usize,
    offset: u64,
}

struct CommittedTableState {
    set: SnapshotIndexSet,
}

/// The per-table coordinator: owns the record store, the index-set store
/// and the multi-version journal history, and serializes rows in and out.
///
/// Row `r` lives in record `r + 1`; record 0 holds the serialized table
/// definition.
pub struct MasterTableSource {
    table_id: TableId,
    def: Arc<TableDef>,
    resource_name: String,
    store: VarRecordStore,
    index_store: IndexSetStore,
    committed: RwLock<CommittedTableState>,
    journal_history: Mutex<Vec<(CommitId, MasterTableJournal)>>,
    root_locks: AtomicUsize,
}

impl MasterTableSource {
    pub fn resource_name_for(table_id: TableId) -> String {
        format!("t_{:08}", table_id.0)
    }

    /// Create the backing stores for a new table and seed them with the
    /// definition blob and an empty master index.
    pub fn create(dir: &Path, table_id: TableId, mut def: TableDef, data_sector_size: usize) -> Result<MasterTableSource> {
        def.set_immutable();
        let resource_name = Self::resource_name_for(table_id);
        let base = dir.join(&resource_name);

        let (store, _) = VarRecordStore::options().data_sector_size(data_sector_size).open(&base)?;
        let def_record = store.write(&def.serialize())?;
        assert_eq!(def_record, RecordId(0), "table definition must land in record 0");

        let (index_store, _) = IndexSetStore::open(base.with_extension("iid"))?;
        let set = index_store.snapshot_with_lists(1 + def.column_count());
        index_store.commit_index_set(set.clone())?;

        debug!("created table {table_id} as {resource_name}");
        Ok(MasterTableSource {
            table_id,
            def: Arc::new(def),
            resource_name,
            store,
            index_store,
            committed: RwLock::new(CommittedTableState { set }),
            journal_history: Mutex::new(Vec::new()),
            root_locks: AtomicUsize::new(0),
        })
    }

    /// Open an existing table. The boolean reports whether either backing
    /// store replayed its journal.
    ///
    /// The opening scan re-classifies every record left `uncommitted` by a
    /// crash as `marked-deleted`, before any transaction starts.
    pub fn open(dir: &Path, table_id: TableId, resource_name: &str) -> Result<(MasterTableSource, bool)> {
        let base = dir.join(resource_name);
        let (store, store_recovered) = VarRecordStore::open(&base)?;
        let (index_store, index_recovered) = IndexSetStore::open(base.with_extension("iid"))?;

        let def_blob = store.read(RecordId(0))?;
        let def = TableDef::deserialize(&def_blob)?;

        let mut reclassified = 0;
        for (record, entry) in store.records()? {
            if record == RecordId(0) {
                continue;
            }
            if RowState::from_type_key(entry.user_type()) == RowState::Uncommitted {
                store.write_record_type(record, ROW_STATE_MARKED_DELETED)?;
                reclassified += 1;
            }
        }
        if reclassified > 0 {
            debug!("table {resource_name}: {reclassified} uncommitted records marked deleted");
        }

        let set = index_store.snapshot_index_set();
        Ok((
            MasterTableSource {
                table_id,
                def: Arc::new(def),
                resource_name: resource_name.to_owned(),
                store,
                index_store,
                committed: RwLock::new(CommittedTableState { set }),
                journal_history: Mutex::new(Vec::new()),
                root_locks: AtomicUsize::new(0),
            },
            store_recovered || index_recovered,
        ))
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn table_def(&self) -> &Arc<TableDef> {
        &self.def
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// Number of rows visible in the committed state.
    pub fn committed_row_count(&self) -> usize {
        self.committed.read().set.index(0).len()
    }

    /// The committed index lists, as a copy-on-write snapshot.
    pub fn committed_snapshot(&self) -> SnapshotIndexSet {
        self.committed.read().set.clone()
    }

    /// A fresh index set for a new transaction view; proxies the committed
    /// snapshot.
    pub fn create_index_set(&self) -> SnapshotIndexSet {
        self.committed_snapshot()
    }

    /// Serialize a row into the record store. The record starts out in
    /// state `uncommitted`; journal bookkeeping belongs to the caller.
    pub fn write_row(&self, row: &crate::row::RowData) -> Result<RowId> {
        let mut buf = Vec::new();
        for cell in row.cells() {
            cell.encode_cell(&mut buf)?;
        }
        let record = self.store.write(&buf)?;
        assert!(record != RecordId(0), "record 0 is reserved for the table definition");
        Ok(RowId(record.0 - 1))
    }

    fn record_of(row: RowId) -> RecordId {
        RecordId(row.0 + 1)
    }

    /// The value of one cell.
    pub fn cell(&self, col: usize, row: RowId) -> Result<TypedValue> {
        let bytes = self.store.read(Self::record_of(row)).map_err(|e| match e {
            StoreError::RecordNotAllocated(_) => TableError::RowNotVisible {
                table: self.def.table_name().to_string(),
                row,
            }
            .into(),
            other => crate::error::DBError::Store(other),
        })?;
        let mut cursor = Cursor::new(&bytes);
        for _ in 0..col {
            TypedValue::skip_cell(&mut cursor)?;
        }
        let value = TypedValue::decode_cell(&mut cursor)?;
        Ok(value.with_collation(&self.def.column(col).collation))
    }

    /// Like [`MasterTableSource::cell`] but keeping a per-reader skip
    /// cache, so walking a row's columns left to right re-reads nothing.
    pub fn cell_with_cache(&self, cache: &mut CellCache, col: usize, row: RowId) -> Result<TypedValue> {
        if cache.row != Some(row) || col < cache.next_col {
            cache.bytes = self.store.read(Self::record_of(row))?;
            cache.row = Some(row);
            cache.next_col = 0;
            cache.offset = 0;
        }
        let mut cursor = Cursor::new(&cache.bytes);
        cursor.set_position(cache.offset);
        for _ in cache.next_col..col {
            TypedValue::skip_cell(&mut cursor)?;
        }
        let value = TypedValue::decode_cell(&mut cursor)?;
        cache.offset = cursor.position();
        cache.next_col = col + 1;
        Ok(value.with_collation(&self.def.column(col).collation))
    }

    pub fn row_state(&self, row: RowId) -> Result<RowState> {
        Ok(RowState::from_type_key(self.store.record_type(Self::record_of(row))?))
    }

    pub fn set_row_state(&self, row: RowId, state: RowState) -> Result<()> {
        self.store.write_record_type(Self::record_of(row), state.to_type_key())?;
        Ok(())
    }

    /// Build the scheme for one column over a given snapshot list.
    pub fn scheme_for_column(&self, set: &SnapshotIndexSet, col: usize) -> SelectableScheme {
        match self.def.column(col).scheme {
            SchemeKind::BlindScan => SelectableScheme::BlindScan(granite_index::BlindScan::new()),
            SchemeKind::InsertSort => {
                SelectableScheme::InsertSort(InsertSort::from_list(set.index(col + 1).clone(), false))
            }
        }
    }

    /// Apply a committed journal to the master state: update the visible
    /// index and every column scheme, flip row states, and commit the new
    /// index set. Returns nothing; physical deletion of removed rows is
    /// deferred to [`MasterTableSource::merge_journal_changes`].
    pub fn apply_journal(&self, mut journal: MasterTableJournal, commit_id: CommitId) -> Result<()> {
        let mut state = self.committed.write();
        let mut set = state.set.clone();

        let mut schemes: Vec<Option<SelectableScheme>> = (0..self.def.column_count())
            .map(|col| match self.def.column(col).scheme {
                SchemeKind::BlindScan => None,
                SchemeKind::InsertSort => Some(self.scheme_for_column(&set, col)),
            })
            .collect();

        for &(command, row) in journal.entries() {
            let visible = set.index_mut(0);
            if command.is_add() {
                let pos = visible.lower_bound_by(|v| v.cmp(&row.0));
                visible.insert_at(pos, row.0);
            } else {
                visible.remove_value(row.0);
            }
            for (col, scheme) in schemes.iter_mut().enumerate() {
                if let Some(scheme) = scheme {
                    let source = VisibleColumnSource {
                        master: self,
                        column: col,
                        visible: set.index(0),
                    };
                    if command.is_add() {
                        scheme.insert(&source, row)?;
                    } else {
                        scheme.remove(&source, row)?;
                    }
                }
            }
        }

        for (col, scheme) in schemes.into_iter().enumerate() {
            if let Some(scheme) = scheme {
                *set.index_mut(col + 1) = scheme.ordered_list().expect("insert-sort scheme keeps a list").clone();
            }
        }

        // States flip before the index set is swapped in, so everything the
        // visible index reaches is committed-added.
        let net_added = journal.normalized_added_rows();
        for &row in &net_added {
            self.set_row_state(row, RowState::CommittedAdded)?;
        }
        for row in journal.normalized_removed_rows() {
            self.set_row_state(row, RowState::CommittedRemoved)?;
        }
        // Rows added and removed again inside the same transaction never
        // became visible anywhere; their records go away now.
        for &(command, row) in journal.entries() {
            if command.is_add() && !net_added.contains(&row) {
                self.store.delete(Self::record_of(row))?;
            }
        }

        self.index_store.commit_index_set(set.clone())?;
        state.set = set;

        journal.set_commit_id(commit_id);
        self.journal_history.lock().push((commit_id, journal));
        Ok(())
    }

    /// Apply every committed journal with id at most `up_to`: physically
    /// delete rows whose net effect in the merged set is removal. Returns
    /// the number of records deleted.
    pub fn merge_journal_changes(&self, up_to: CommitId) -> Result<usize> {
        let merged: Vec<(CommitId, MasterTableJournal)> = {
            let mut history = self.journal_history.lock();
            let keep: Vec<_> = history.drain(..).collect();
            let (merge, keep): (Vec<_>, Vec<_>) = keep.into_iter().partition(|(id, _)| *id <= up_to);
            *history = keep;
            merge
        };

        let mut deleted = 0;
        for (_, journal) in merged {
            for row in journal.normalized_removed_rows() {
                if self.row_state(row)? == RowState::CommittedRemoved {
                    self.set_row_state(row, RowState::MarkedDeleted)?;
                    self.store.delete(Self::record_of(row))?;
                    deleted += 1;
                }
            }
        }
        if deleted > 0 {
            debug!("table {}: merged journals up to commit {up_to}, {deleted} rows reclaimed", self.resource_name);
        }
        Ok(deleted)
    }

    /// Undo a rolled-back journal: rows it added never committed, so their
    /// records are deleted outright.
    pub fn rollback_journal(&self, journal: &MasterTableJournal) -> Result<()> {
        for row in journal.normalized_added_rows() {
            self.store.delete(Self::record_of(row))?;
        }
        Ok(())
    }

    /// Journals committed after `snapshot`, for commit-time clash checks.
    pub fn journals_since(&self, snapshot: CommitId) -> Vec<(CommitId, MasterTableJournal)> {
        self.journal_history
            .lock()
            .iter()
            .filter(|(id, _)| *id > snapshot)
            .cloned()
            .collect()
    }

    // Root locks pin the physical rows of this table while an outer reader
    // may still reach them, even across commits of the producing
    // transaction.

    pub fn lock_root(&self) {
        self.root_locks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unlock_root(&self) {
        let prev = self.root_locks.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "unlock_root without a matching lock_root");
    }

    pub fn has_roots_locked(&self) -> bool {
        self.root_locks.load(Ordering::SeqCst) > 0
    }

    pub fn synch(&self) -> Result<()> {
        self.store.synch()?;
        self.index_store.synch()?;
        Ok(())
    }

    pub fn hard_synch(&self) -> Result<()> {
        self.store.hard_synch()?;
        self.index_store.hard_synch()?;
        Ok(())
    }

    pub fn check_and_repair(&self) -> Result<u32> {
        let repaired = self.store.check_and_repair()?;
        Ok(repaired)
    }

    pub fn close(self) -> Result<()> {
        self.store.close()?;
        self.index_store.close()?;
        Ok(())
    }

    /// Remove the table's backing files. Only valid once no root locks
    /// remain and the table is closed.
    pub fn delete_files(dir: &Path, resource_name: &str) -> Result<()> {
        let base: PathBuf = dir.join(resource_name);
        VarRecordStore::delete_files(&base)?;
        IndexSetStore::delete_files(base.with_extension("iid"))?;
        Ok(())
    }
}

/// A scheme source over an explicit row enumeration: the transaction's own
/// visible set, or the set a commit is currently building.
pub(crate) struct VisibleColumnSource<'a> {
    pub(crate) master: &'a MasterTableSource,
    pub(crate) column: usize,
    pub(crate) visible: &'a BlockIntList,
}

impl SchemeSource for VisibleColumnSource<'_> {
    fn scheme_cell(&self, row: RowId) -> std::result::Result<TypedValue, SchemeError> {
        self.master
            .cell(self.column, row)
            .map_err(|e| SchemeError::Cell(row, e.to_string()))
    }

    fn scheme_rows(&self) -> std::result::Result<Vec<RowId>, SchemeError> {
        Ok(self.visible.iter().map(RowId).collect())
    }
}
