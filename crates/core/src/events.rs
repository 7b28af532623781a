use granite_primitives::{CommitId, RowId, TableId};
use parking_lot::Mutex;

use crate::schema::TableName;

/// What one commit did to one table. Delivered to subscribed listeners
/// while the conglomerate still holds its commit lock, so listeners observe
/// commits in commit-id order.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub commit_id: CommitId,
    /// Serial of the transaction (and thus connection) that committed.
    pub committer: u64,
    pub table_id: TableId,
    pub table_name: TableName,
    pub added_rows: Vec<RowId>,
    pub removed_rows: Vec<RowId>,
}

type Handler = Box<dyn Fn(&CommitEvent) + Send + Sync>;

struct Subscription {
    id: u64,
    table: TableName,
    handler: Handler,
}

/// One-way stream of commit events from the conglomerate to table-backed
/// caches. The bus owns its listeners; a subscriber keeps only the returned
/// id for unsubscribing, which avoids reference cycles between connections
/// and caches.
#[derive(Default)]
pub struct CommitEventBus {
    state: Mutex<BusState>,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

impl CommitEventBus {
    pub fn new() -> CommitEventBus {
        CommitEventBus::default()
    }

    /// Subscribe to events for `table`. The handler runs on the committing
    /// thread; it must not start transactions of its own.
    pub fn subscribe(&self, table: TableName, handler: impl Fn(&CommitEvent) + Send + Sync + 'static) -> u64 {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.subscriptions.push(Subscription {
            id,
            table,
            handler: Box::new(handler),
        });
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.state.lock().subscriptions.retain(|s| s.id != id);
    }

    pub fn dispatch(&self, event: &CommitEvent) {
        let state = self.state.lock();
        for sub in state.subscriptions.iter().filter(|s| s.table == event.table_name) {
            (sub.handler)(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(table: &TableName) -> CommitEvent {
        CommitEvent {
            commit_id: CommitId(1),
            committer: 9,
            table_id: TableId(1),
            table_name: table.clone(),
            added_rows: vec![RowId(0)],
            removed_rows: vec![],
        }
    }

    #[test]
    fn dispatch_filters_by_table() {
        let bus = CommitEventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let triggers = TableName::new("SYS_INFO", "sys_data_trigger");
        let views = TableName::new("SYS_INFO", "sys_view");

        let hits_ = hits.clone();
        bus.subscribe(triggers.clone(), move |_| {
            hits_.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch(&event(&triggers));
        bus.dispatch(&event(&views));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = CommitEventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let table = TableName::new("SYS_INFO", "sys_grants");

        let hits_ = hits.clone();
        let id = bus.subscribe(table.clone(), move |_| {
            hits_.fetch_add(1, Ordering::SeqCst);
        });
        bus.dispatch(&event(&table));
        bus.unsubscribe(id);
        bus.dispatch(&event(&table));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
