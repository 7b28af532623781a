use granite::expr::{TableExpr, TransactionTable};
use granite::master_table::{MasterTableSource, RowState};
use granite::{ColumnDef, Conglomerate, RowData, TableDef, TableName};
use granite_primitives::{RowId, TableId};
use granite_value::{SqlType, TypedValue};
use tempfile::TempDir;

fn logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ints_table() -> TableDef {
    let mut def = TableDef::new(TableName::new("APP", "t"));
    def.add_column(ColumnDef::new("a", SqlType::Integer).not_null().indexed())
        .unwrap();
    def
}

fn insert_int(tx: &mut granite::Transaction, table: TableId, v: i64) -> RowId {
    let mut row = RowData::new(tx.table_def(table).unwrap());
    row.set_cell(0, TypedValue::from_i64(v)).unwrap();
    tx.add_row(table, row).unwrap()
}

#[test]
fn insert_and_select_greater() {
    logging();
    let tmp = TempDir::new().unwrap();
    let (db, recovered) = Conglomerate::open(tmp.path(), "testdb").unwrap();
    assert!(!recovered);
    db.create_table(ints_table()).unwrap();

    let name = TableName::new("APP", "t");
    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    for v in [1, 2, 3] {
        insert_int(&mut tx, t, v);
    }
    tx.commit().unwrap();

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let view = TransactionTable::new(&tx, t).unwrap();
    let expr: &dyn TableExpr = &view;

    let rows = expr.select_greater(0, &TypedValue::from_i64(1)).unwrap();
    let values: Vec<TypedValue> = rows.iter().map(|&r| expr.cell(0, r).unwrap()).collect();
    assert_eq!(values, vec![TypedValue::from_i64(2), TypedValue::from_i64(3)]);

    db.close().unwrap();
}

#[test]
fn visible_rows_are_committed_added() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "testdb").unwrap();
    db.create_table(ints_table()).unwrap();
    let name = TableName::new("APP", "t");

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    for v in [10, 20] {
        insert_int(&mut tx, t, v);
    }
    tx.commit().unwrap();

    let master = db.table_source(&name).unwrap();
    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    for row in tx.visible_rows(t).unwrap() {
        assert_eq!(master.row_state(row).unwrap(), RowState::CommittedAdded);
    }
    db.close().unwrap();
}

#[test]
fn data_survives_reopen_without_recovery() {
    let tmp = TempDir::new().unwrap();
    let name = TableName::new("APP", "t");
    {
        let (db, _) = Conglomerate::open(tmp.path(), "testdb").unwrap();
        db.create_table(ints_table()).unwrap();
        let mut tx = db.begin_transaction();
        let t = tx.open_table(&name).unwrap();
        for v in [7, 5, 9] {
            insert_int(&mut tx, t, v);
        }
        tx.commit().unwrap();
        db.close().unwrap();
    }

    let (db, recovered) = Conglomerate::open(tmp.path(), "testdb").unwrap();
    assert!(!recovered, "a cleanly closed conglomerate must not recover");

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let view = TransactionTable::new(&tx, t).unwrap();
    let expr: &dyn TableExpr = &view;
    let ordered = expr.select_all(0).unwrap();
    let values: Vec<TypedValue> = ordered.iter().map(|&r| expr.cell(0, r).unwrap()).collect();
    assert_eq!(
        values,
        vec![TypedValue::from_i64(5), TypedValue::from_i64(7), TypedValue::from_i64(9)]
    );
    db.close().unwrap();
}

#[test]
fn uncommitted_records_are_reclassified_at_open() {
    let tmp = TempDir::new().unwrap();
    let table_id = TableId(1);
    let resource = {
        let mut def = ints_table();
        def.set_immutable();
        let master = MasterTableSource::create(tmp.path(), table_id, def, 512).unwrap();
        let resource = master.resource_name().to_owned();

        // A row written but never journaled into a commit: the crash case.
        let mut row = RowData::new(master.table_def().clone());
        row.set_cell(0, TypedValue::from_i64(42)).unwrap();
        let row_id = master.write_row(&row).unwrap();
        assert_eq!(master.row_state(row_id).unwrap(), RowState::Uncommitted);
        master.close().unwrap();
        resource
    };

    let (master, _) = MasterTableSource::open(tmp.path(), table_id, &resource).unwrap();
    assert_eq!(master.row_state(RowId(0)).unwrap(), RowState::MarkedDeleted);
    assert_eq!(master.committed_row_count(), 0);
    master.close().unwrap();
}

#[test]
fn second_open_of_a_live_database_fails() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "testdb").unwrap();
    let second = Conglomerate::open(tmp.path(), "testdb");
    assert!(second.is_err(), "the lock file must refuse a second opener");
    db.close().unwrap();

    // After a clean close the database opens again.
    let (db, recovered) = Conglomerate::open(tmp.path(), "testdb").unwrap();
    assert!(!recovered);
    db.close().unwrap();
}
