use std::sync::Arc;
use std::thread;

use granite::locking::{LockMode, LockingMechanism};
use granite::{ColumnDef, Conglomerate, DBError, RowData, TableDef, TableName, TransactionError, WorkerPool};
use granite_primitives::TableId;
use granite_value::{SqlType, TypedValue};
use tempfile::TempDir;

fn counter_table() -> TableDef {
    let mut def = TableDef::new(TableName::new("APP", "events"));
    def.add_column(ColumnDef::new("worker", SqlType::Integer).not_null().indexed())
        .unwrap();
    def.add_column(ColumnDef::new("seq", SqlType::Integer).not_null()).unwrap();
    def
}

fn insert_event(db: &Conglomerate, name: &TableName, worker: i64, seq: i64) -> granite::Result<()> {
    let mut tx = db.begin_transaction();
    let t = tx.open_table(name)?;
    let mut row = RowData::new(tx.table_def(t)?);
    row.set_cell(0, TypedValue::from_i64(worker))?;
    row.set_cell(1, TypedValue::from_i64(seq))?;
    tx.add_row(t, row)?;
    tx.commit()?;
    Ok(())
}

#[test]
fn concurrent_committers_preserve_every_row() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "concdb").unwrap();
    db.create_table(counter_table()).unwrap();
    let name = TableName::new("APP", "events");

    const WRITERS: i64 = 4;
    const PER_WRITER: i64 = 25;

    let mut handles = Vec::new();
    for worker in 0..WRITERS {
        let db = db.clone();
        let name = name.clone();
        handles.push(thread::spawn(move || {
            for seq in 0..PER_WRITER {
                insert_event(&db, &name, worker, seq).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    assert_eq!(tx.row_count(t).unwrap(), (WRITERS * PER_WRITER) as usize);

    // Every worker's rows all made it.
    for worker in 0..WRITERS {
        let hits = tx
            .select_ranges(
                t,
                0,
                &[granite_index::SelectableRange::new(
                    granite_index::StartFlag::FirstValue,
                    granite_index::RangePoint::Value(TypedValue::from_i64(worker)),
                    granite_index::EndFlag::LastValue,
                    granite_index::RangePoint::Value(TypedValue::from_i64(worker)),
                )],
            )
            .unwrap();
        assert_eq!(hits.len(), PER_WRITER as usize);
    }
    tx.rollback();
    db.close().unwrap();
}

#[test]
fn readers_observe_whole_commits_only() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "concdb").unwrap();
    db.create_table(counter_table()).unwrap();
    let name = TableName::new("APP", "events");

    // Each committed transaction adds a pair of rows; a reader must never
    // observe an odd row count.
    let writer = {
        let db = db.clone();
        let name = name.clone();
        thread::spawn(move || {
            for seq in 0..40 {
                let mut tx = db.begin_transaction();
                let t = tx.open_table(&name).unwrap();
                for half in 0..2 {
                    let mut row = RowData::new(tx.table_def(t).unwrap());
                    row.set_cell(0, TypedValue::from_i64(half)).unwrap();
                    row.set_cell(1, TypedValue::from_i64(seq)).unwrap();
                    tx.add_row(t, row).unwrap();
                }
                tx.commit().unwrap();
            }
        })
    };

    let reader = {
        let db = db.clone();
        let name = name.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let mut tx = db.begin_transaction();
                let t = tx.open_table(&name).unwrap();
                let count = tx.row_count(t).unwrap();
                assert_eq!(count % 2, 0, "a commit must be visible in full or not at all");
                tx.rollback();
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    db.close().unwrap();
}

#[test]
fn worker_pool_drives_transactions_under_table_locks() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "concdb").unwrap();
    db.create_table(counter_table()).unwrap();
    let name = TableName::new("APP", "events");

    let locking = LockingMechanism::new();
    let pool = WorkerPool::new(3);
    let table_id: TableId = db.table_source(&name).unwrap().table_id();
    let clashes = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for worker in 0..6i64 {
        let db = db.clone();
        let name = name.clone();
        let locking = locking.clone();
        let clashes = clashes.clone();
        pool.execute("admin", "concdb", move || {
            locking.set_mode(LockMode::Shared);
            let handle = locking.lock_tables(&[table_id], &[]);
            match insert_event(&db, &name, worker, 0) {
                Ok(()) => {}
                Err(DBError::Transaction(TransactionError::RowRemoveClash { .. })) => {
                    clashes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
                Err(e) => panic!("unexpected failure: {e}"),
            }
            handle.unlock_all();
            locking.finish_mode(LockMode::Shared);
        });
    }
    pool.shutdown();

    // Inserts never clash; the write locks serialized them anyway.
    assert_eq!(clashes.load(std::sync::atomic::Ordering::SeqCst), 0);
    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    assert_eq!(tx.row_count(t).unwrap(), 6);
    tx.rollback();
    db.close().unwrap();
}
