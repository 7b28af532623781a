use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use granite_primitives::{CommitId, TableId};
use granite_store::DatabaseLock;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, TableError, TransactionError};
use crate::events::{CommitEvent, CommitEventBus};
use crate::master_table::MasterTableSource;
use crate::schema::{TableDef, TableName};
use crate::state_store::{StateStore, TableEntry};
use crate::transaction::Transaction;

/// Options for opening a [`Conglomerate`].
#[derive(Clone, Copy, Debug)]
pub struct OpenOptions {
    data_sector_size: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions { data_sector_size: 1024 }
    }
}

impl OpenOptions {
    /// Payload size of data sectors for tables created through this
    /// conglomerate. Existing tables keep their own.
    pub fn data_sector_size(&mut self, size: usize) -> &mut Self {
        self.data_sector_size = size;
        self
    }

    /// Open (or create) the conglomerate `name` in `dir`.
    ///
    /// The boolean reports whether any backing store needed journal
    /// recovery. Takes the `<name>.lock` presence lock; fails with
    /// "already in use" if another process holds it.
    pub fn open(&self, dir: impl AsRef<Path>, name: &str) -> Result<(Conglomerate, bool)> {
        let dir = dir.as_ref().to_owned();
        std::fs::create_dir_all(&dir)?;
        let lock = DatabaseLock::acquire(dir.join(format!("{name}.lock")))?;
        let state = StateStore::open(dir.join(format!("{name}.sf")))?;

        let mut tables = HashMap::new();
        let mut recovered = false;
        for entry in state.visible_tables().to_vec() {
            let (master, table_recovered) = MasterTableSource::open(&dir, entry.id, &entry.resource_name)?;
            recovered |= table_recovered;
            tables.insert(entry.id, Arc::new(master));
        }

        let inner = Arc::new(ConglomerateInner {
            dir,
            name: name.to_owned(),
            data_sector_size: self.data_sector_size,
            _lock: lock,
            state: Mutex::new(state),
            tables: RwLock::new(tables),
            dropped: Mutex::new(HashMap::new()),
            commit_lock: Mutex::new(()),
            open_transactions: Mutex::new(Vec::new()),
            next_tx_serial: AtomicU64::new(1),
            events: CommitEventBus::new(),
        });
        inner.cleanup_deleted_tables()?;

        Ok((Conglomerate { inner }, recovered))
    }
}

/// The engine object owning the state store, the table universe and the
/// commit protocol. Thread-safe; clones share the same conglomerate.
#[derive(Clone)]
pub struct Conglomerate {
    inner: Arc<ConglomerateInner>,
}

pub(crate) struct ConglomerateInner {
    dir: PathBuf,
    name: String,
    data_sector_size: usize,
    _lock: DatabaseLock,
    state: Mutex<StateStore>,
    pub(crate) tables: RwLock<HashMap<TableId, Arc<MasterTableSource>>>,
    /// Dropped tables whose backing files still wait for the last pin
    /// (an open transaction or a root lock) to go away.
    dropped: Mutex<HashMap<TableId, Arc<MasterTableSource>>>,
    /// Serializes the whole commit protocol; the "conglomerate write lock".
    commit_lock: Mutex<()>,
    /// `(transaction serial, snapshot commit id)` for every open
    /// transaction, for snapshot-floor calculations.
    open_transactions: Mutex<Vec<(u64, CommitId)>>,
    next_tx_serial: AtomicU64,
    pub(crate) events: CommitEventBus,
}

impl Conglomerate {
    pub fn options() -> OpenOptions {
        OpenOptions::default()
    }

    /// Open with default options. See [`OpenOptions::open`].
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<(Conglomerate, bool)> {
        OpenOptions::default().open(dir, name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn commit_id(&self) -> CommitId {
        self.inner.state.lock().commit_id()
    }

    /// The commit event stream; catalog caches subscribe here.
    pub fn events(&self) -> &CommitEventBus {
        &self.inner.events
    }

    pub fn create_table(&self, def: TableDef) -> Result<TableId> {
        self.inner.create_table(def)
    }

    pub fn drop_table(&self, name: &TableName) -> Result<()> {
        self.inner.drop_table(name)
    }

    pub fn table_names(&self) -> Vec<TableName> {
        self.inner
            .tables
            .read()
            .values()
            .map(|t| t.table_def().table_name().clone())
            .collect()
    }

    pub fn table_exists(&self, name: &TableName) -> bool {
        self.inner.table_by_name(name).is_ok()
    }

    /// Begin a transaction at the current snapshot. Every visible table's
    /// index snapshot is taken here, under the commit lock, so the
    /// transaction observes one consistent commit id.
    pub fn begin_transaction(&self) -> Transaction {
        let (serial, snapshot, masters) = {
            let _guard = self.inner.commit_lock.lock();
            let serial = self.inner.next_tx_serial.fetch_add(1, Ordering::SeqCst);
            let snapshot = self.inner.state.lock().commit_id();
            let masters: Vec<_> = self.inner.tables.read().values().cloned().collect();
            self.inner.open_transactions.lock().push((serial, snapshot));
            (serial, snapshot, masters)
        };
        debug!("transaction {serial} begins at snapshot {snapshot}");
        Transaction::new(self.inner.clone(), serial, snapshot, masters)
    }

    /// The master table behind `name`, for storage-level inspection.
    pub fn table_source(&self, name: &TableName) -> Result<Arc<MasterTableSource>> {
        self.inner.table_by_name(name)
    }

    /// Run `check_and_repair` on every table's stores. Returns the number
    /// of repaired sectors.
    pub fn check_and_repair(&self) -> Result<u32> {
        let mut repaired = 0;
        for master in self.inner.tables.read().values() {
            repaired += master.check_and_repair()?;
        }
        Ok(repaired)
    }

    /// Push all stores to the OS and checkpoint their journals.
    pub fn synch(&self) -> Result<()> {
        for master in self.inner.tables.read().values() {
            master.synch()?;
        }
        self.inner.state.lock().synch()
    }

    /// Like [`Conglomerate::synch`] but forcing the durable barrier.
    pub fn hard_synch(&self) -> Result<()> {
        for master in self.inner.tables.read().values() {
            master.hard_synch()?;
        }
        self.inner.state.lock().synch()
    }

    /// Flush everything and release the lock file.
    pub fn close(self) -> Result<()> {
        self.inner.cleanup_deleted_tables()?;
        self.hard_synch()?;
        // The lock file is removed when `inner` drops its `DatabaseLock`.
        Ok(())
    }
}

impl ConglomerateInner {
    pub(crate) fn table_by_name(&self, name: &TableName) -> Result<Arc<MasterTableSource>> {
        self.tables
            .read()
            .values()
            .find(|t| t.table_def().table_name() == name)
            .cloned()
            .ok_or_else(|| TableError::NotFound(name.to_string()).into())
    }

    pub(crate) fn table_by_id(&self, id: TableId) -> Result<Arc<MasterTableSource>> {
        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| TableError::IdNotFound(id).into())
    }

    pub(crate) fn create_table(&self, def: TableDef) -> Result<TableId> {
        if def.column_count() == 0 {
            return Err(TableError::NoColumns(def.table_name().to_string()).into());
        }
        let name = def.table_name().clone();
        if self.table_by_name(&name).is_ok() {
            return Err(TableError::Exists(name.to_string()).into());
        }

        let mut state = self.state.lock();
        let table_id = state.next_table_id()?;
        let master = MasterTableSource::create(&self.dir, table_id, def, self.data_sector_size)?;
        let resource_name = master.resource_name().to_owned();
        self.tables.write().insert(table_id, Arc::new(master));

        let mut visible = state.visible_tables().to_vec();
        visible.push(TableEntry {
            id: table_id,
            resource_name,
        });
        let deleted = state.deleted_tables().to_vec();
        let commit_id = state.commit_id();
        state.commit(visible, deleted, commit_id)?;
        Ok(table_id)
    }

    pub(crate) fn drop_table(&self, name: &TableName) -> Result<()> {
        let master = self.table_by_name(name)?;
        let table_id = master.table_id();

        let mut state = self.state.lock();
        let mut visible = state.visible_tables().to_vec();
        let Some(pos) = visible.iter().position(|e| e.id == table_id) else {
            return Err(TableError::NotFound(name.to_string()).into());
        };
        let entry = visible.remove(pos);
        let mut deleted = state.deleted_tables().to_vec();
        deleted.push(entry);
        let commit_id = state.commit_id();
        state.commit(visible, deleted, commit_id)?;
        drop(state);

        if let Some(master) = self.tables.write().remove(&table_id) {
            self.dropped.lock().insert(table_id, master);
        }
        drop(master);
        // Backing files go away once nothing pins the table.
        self.cleanup_deleted_tables()
    }

    /// Delete the backing stores of dropped tables once their root-lock
    /// count is zero and no live reader can reach them any more.
    pub(crate) fn cleanup_deleted_tables(&self) -> Result<()> {
        let mut state = self.state.lock();
        let deleted = state.deleted_tables().to_vec();
        if deleted.is_empty() {
            return Ok(());
        }
        let mut dropped = self.dropped.lock();
        let mut remaining = Vec::new();
        for entry in deleted {
            if let Some(master) = dropped.remove(&entry.id) {
                if master.has_roots_locked() || Arc::strong_count(&master) > 1 {
                    dropped.insert(entry.id, master);
                    remaining.push(entry);
                    continue;
                }
                match Arc::try_unwrap(master) {
                    Ok(master) => {
                        let _ = master.close();
                    }
                    Err(master) => {
                        dropped.insert(entry.id, master);
                        remaining.push(entry);
                        continue;
                    }
                }
            }
            debug!("deleting backing files of dropped table {}", entry.resource_name);
            if let Err(e) = MasterTableSource::delete_files(&self.dir, &entry.resource_name) {
                warn!("could not delete files of {}: {e}", entry.resource_name);
                remaining.push(entry);
            }
        }
        let visible = state.visible_tables().to_vec();
        let commit_id = state.commit_id();
        state.commit(visible, remaining, commit_id)?;
        Ok(())
    }

    fn min_open_snapshot(&self, exclude_serial: u64, fallback: CommitId) -> CommitId {
        self.open_transactions
            .lock()
            .iter()
            .filter(|(serial, _)| *serial != exclude_serial)
            .map(|(_, snapshot)| *snapshot)
            .min()
            .unwrap_or(fallback)
    }

    fn forget_transaction(&self, serial: u64) {
        self.open_transactions.lock().retain(|(s, _)| *s != serial);
    }

    /// The commit protocol. Any failure (clash, deferred constraint, I/O)
    /// aborts the transaction; only a clash is retry-eligible.
    pub(crate) fn commit_transaction(&self, tx: &mut Transaction) -> Result<CommitId> {
        match self.commit_transaction_inner(tx) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.abort_transaction(tx);
                Err(e)
            }
        }
    }

    fn commit_transaction_inner(&self, tx: &mut Transaction) -> Result<CommitId> {
        // 1. The conglomerate write lock serializes committers.
        let _commit_guard = self.commit_lock.lock();

        // 2. The next commit id.
        let new_commit_id = CommitId(self.state.lock().commit_id().0 + 1);

        // 3. Clash detection against every journal committed after this
        //    transaction's snapshot.
        let mut clash = None;
        'clash_scan: for t in tx.tables.values() {
            if t.journal.is_empty() {
                continue;
            }
            for (_, committed) in t.master.journals_since(tx.snapshot_id) {
                if let Some(row) = t.journal.test_commit_clash(&committed) {
                    clash = Some((row, t.master.table_def().table_name().to_string()));
                    break 'clash_scan;
                }
            }
        }
        if let Some((row, table)) = clash {
            debug!("commit of transaction {} clashes on row {row} of {table}", tx.serial);
            return Err(TransactionError::RowRemoveClash { row, table }.into());
        }

        // 4. Deferred (INITIALLY DEFERRED) integrity checks over what the
        //    commit is about to publish. Uniqueness is re-verified against
        //    the state as of this commit, not the transaction's snapshot:
        //    a concurrently committed duplicate fails here.
        let mut violation = None;
        'deferred_scan: for t in tx.tables.values() {
            if t.journal.is_empty() {
                continue;
            }
            let def = t.master.table_def();
            let added = t.journal.normalized_added_rows();
            let removed = t.journal.normalized_removed_rows();

            for col in (0..def.column_count()).filter(|&c| def.column(c).not_null) {
                for &row in &added {
                    if t.master.cell(col, row)?.is_null() {
                        violation = Some(crate::error::ConstraintError::NotNull {
                            table: def.table_name().to_string(),
                            column: def.column(col).name.clone(),
                        });
                        break 'deferred_scan;
                    }
                }
            }

            for (col, column) in def.columns().iter().enumerate() {
                if !column.unique {
                    continue;
                }
                let committed = t.master.committed_snapshot();
                let scheme = t.master.scheme_for_column(&committed, col);
                let source = crate::master_table::VisibleColumnSource {
                    master: &t.master,
                    column: col,
                    visible: committed.index(0),
                };
                let mut seen: Vec<granite_value::TypedValue> = Vec::new();
                for &row in &added {
                    let value = t.master.cell(col, row)?;
                    if value.is_null() {
                        continue;
                    }
                    let dup_in_commit = seen
                        .iter()
                        .any(|v| v.total_compare(&value) == std::cmp::Ordering::Equal);
                    let dup_committed = scheme
                        .select_equal(&source, &value)?
                        .iter()
                        .any(|hit| !removed.contains(hit) && !added.contains(hit));
                    if dup_in_commit || dup_committed {
                        violation = Some(crate::error::ConstraintError::Unique {
                            table: def.table_name().to_string(),
                            column: column.name.clone(),
                            value: value.to_string(),
                        });
                        break 'deferred_scan;
                    }
                    seen.push(value);
                }
            }
        }
        if let Some(violation) = violation {
            return Err(violation.into());
        }

        // 5. Persist: merge each journal into its master table, then record
        //    the new commit id in the state store.
        let mut events = Vec::new();
        for (table_id, t) in tx.tables.iter_mut() {
            if t.journal.is_empty() {
                continue;
            }
            let journal = std::mem::replace(&mut t.journal, crate::journal::MasterTableJournal::new(*table_id));
            events.push(CommitEvent {
                commit_id: new_commit_id,
                committer: tx.serial,
                table_id: *table_id,
                table_name: t.master.table_def().table_name().clone(),
                added_rows: journal.normalized_added_rows(),
                removed_rows: journal.normalized_removed_rows(),
            });
            t.master.apply_journal(journal, new_commit_id)?;
        }
        {
            let mut state = self.state.lock();
            let visible = state.visible_tables().to_vec();
            let deleted = state.deleted_tables().to_vec();
            state.commit(visible, deleted, new_commit_id)?;
        }

        // 6. Table-backed caches hear about the commit while the lock is
        //    still held, so they observe commits in order.
        for event in &events {
            self.events.dispatch(event);
        }

        // 7. Release the write lock, then opportunistically merge journals
        //    no open snapshot needs any more.
        drop(_commit_guard);
        self.forget_transaction(tx.serial);
        let floor = self.min_open_snapshot(tx.serial, new_commit_id);
        for event in &events {
            if let Ok(master) = self.table_by_id(event.table_id) {
                if !master.has_roots_locked() {
                    master.merge_journal_changes(floor)?;
                }
            }
        }

        debug!("transaction {} committed as {new_commit_id}", tx.serial);
        Ok(new_commit_id)
    }

    pub(crate) fn rollback_transaction(&self, tx: &mut Transaction) {
        self.abort_transaction(tx);
        debug!("transaction {} rolled back", tx.serial);
    }

    fn abort_transaction(&self, tx: &mut Transaction) {
        for t in tx.tables.values_mut() {
            if !t.journal.is_empty() {
                if let Err(e) = t.master.rollback_journal(&t.journal) {
                    warn!(
                        "rollback of table {} left garbage records: {e}",
                        t.master.resource_name()
                    );
                }
            }
        }
        tx.tables.clear();
        self.forget_transaction(tx.serial);
    }
}
