use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::Result;
use crate::events::CommitEventBus;
use crate::schema::TableName;

struct CacheState<T> {
    value: Option<T>,
    invalidations: u64,
    flushes: u64,
}

/// A lazily built value backed by one system catalog table.
///
/// The cache subscribes to the conglomerate's commit events for its table.
/// A commit by the owning connection marks the value invalid (it rebuilds
/// on next use); a commit by any other connection that added or removed
/// rows flushes it outright. Either way the next read rebuilds from the
/// table.
pub struct TableBackedCache<T> {
    table: TableName,
    subscription: u64,
    state: Arc<Mutex<CacheState<T>>>,
}

impl<T: Send + 'static> TableBackedCache<T> {
    /// Attach a cache for `table` on behalf of connection `connection`.
    pub fn attach(bus: &CommitEventBus, table: TableName, connection: u64) -> TableBackedCache<T> {
        let state = Arc::new(Mutex::new(CacheState {
            value: None,
            invalidations: 0,
            flushes: 0,
        }));
        let handler_state = state.clone();
        let handler_table = table.clone();
        let subscription = bus.subscribe(table.clone(), move |event| {
            let mut state = handler_state.lock();
            if event.committer == connection {
                state.value = None;
                state.invalidations += 1;
                debug!("cache on {handler_table} invalidated by own commit {}", event.commit_id);
            } else if !event.added_rows.is_empty() || !event.removed_rows.is_empty() {
                state.value = None;
                state.flushes += 1;
                debug!("cache on {handler_table} flushed by commit {}", event.commit_id);
            }
        });
        TableBackedCache {
            table,
            subscription,
            state,
        }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// The cached value, rebuilding it with `build` if a commit cleared
    /// it. The boolean reports whether a rebuild happened.
    pub fn get_or_build(&self, build: impl FnOnce() -> Result<T>) -> Result<(T, bool)>
    where
        T: Clone,
    {
        let mut state = self.state.lock();
        if let Some(value) = &state.value {
            return Ok((value.clone(), false));
        }
        let value = build()?;
        state.value = Some(value.clone());
        Ok((value, true))
    }

    /// How often another connection's commit cleared the value.
    pub fn flush_count(&self) -> u64 {
        self.state.lock().flushes
    }

    /// How often the owning connection's own commit cleared the value.
    pub fn invalidation_count(&self) -> u64 {
        self.state.lock().invalidations
    }

    /// Drop the bus subscription. The cache keeps serving its last value
    /// but no longer reacts to commits.
    pub fn detach(&self, bus: &CommitEventBus) {
        bus.unsubscribe(self.subscription);
    }
}
