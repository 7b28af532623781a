use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::conglomerate::Conglomerate;

/// Background checkpoint timer: periodically pushes every store's writes
/// to the OS and truncates their write-ahead journals, so recovery after a
/// crash replays minutes, not hours.
///
/// The thread is cooperative: [`BackgroundFlusher::stop`] (or drop) wakes
/// it and waits for it to exit. One flusher per conglomerate is plenty;
/// commits do not wait on it.
pub struct BackgroundFlusher {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundFlusher {
    pub fn start(conglomerate: Conglomerate, interval: Duration) -> BackgroundFlusher {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = signal.clone();
        let handle = thread::Builder::new()
            .name("granite-flusher".to_owned())
            .spawn(move || {
                let (stop, cond) = &*thread_signal;
                loop {
                    {
                        let mut stopped = stop.lock();
                        if !*stopped {
                            cond.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    match conglomerate.synch() {
                        Ok(()) => debug!("periodic checkpoint of {}", conglomerate.name()),
                        Err(e) => warn!("periodic checkpoint failed: {e}"),
                    }
                }
                debug!("flusher exits");
            })
            .expect("could not spawn flusher thread");
        BackgroundFlusher {
            signal,
            handle: Some(handle),
        }
    }

    /// Wake the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        let (stop, cond) = &*self.signal;
        *stop.lock() = true;
        cond.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundFlusher {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, TableDef, TableName};
    use crate::Conglomerate;
    use granite_value::{SqlType, TypedValue};
    use tempfile::TempDir;

    #[test]
    fn flusher_checkpoints_and_stops_cleanly() {
        let tmp = TempDir::new().unwrap();
        let (db, _) = Conglomerate::open(tmp.path(), "flushdb").unwrap();

        let mut def = TableDef::new(TableName::new("APP", "t"));
        def.add_column(ColumnDef::new("a", SqlType::Integer)).unwrap();
        db.create_table(def).unwrap();

        let flusher = BackgroundFlusher::start(db.clone(), Duration::from_millis(10));
        let name = TableName::new("APP", "t");
        for v in 0..20 {
            let mut tx = db.begin_transaction();
            let t = tx.open_table(&name).unwrap();
            let mut row = crate::RowData::new(tx.table_def(t).unwrap());
            row.set_cell(0, TypedValue::from_i64(v)).unwrap();
            tx.add_row(t, row).unwrap();
            tx.commit().unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        flusher.stop();

        let mut tx = db.begin_transaction();
        let t = tx.open_table(&name).unwrap();
        assert_eq!(tx.row_count(t).unwrap(), 20);
        tx.rollback();
        db.close().unwrap();
    }
}
