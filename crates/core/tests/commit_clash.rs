use granite::{ColumnDef, Conglomerate, DBError, RowData, TableDef, TableName, TransactionError};
use granite_primitives::{RowId, TableId};
use granite_value::{SqlType, TypedValue};
use tempfile::TempDir;

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

fn setup(tmp: &TempDir) -> (Conglomerate, TableName, RowId) {
    let (db, _) = Conglomerate::open(tmp.path(), "clashdb").unwrap();
    db.create_table(ints_table()).unwrap();
    let name = TableName::new("APP", "t");
    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let row = insert_int(&mut tx, t, 100);
    tx.commit().unwrap();
    (db, name, row)
}

#[test]
fn concurrent_removes_of_the_same_row_clash() {
    let tmp = TempDir::new().unwrap();
    let (db, name, row) = setup(&tmp);

    // Both transactions observe the same snapshot.
    let mut t1 = db.begin_transaction();
    let mut t2 = db.begin_transaction();
    assert_eq!(t1.snapshot_id(), t2.snapshot_id());

    let id1 = t1.open_table(&name).unwrap();
    t1.remove_row(id1, row).unwrap();
    t1.commit().unwrap();

    let id2 = t2.open_table(&name).unwrap();
    t2.remove_row(id2, row).unwrap();
    let err = t2.commit().unwrap_err();
    match &err {
        DBError::Transaction(TransactionError::RowRemoveClash { row: r, table }) => {
            assert_eq!(*r, row);
            assert_eq!(table, "APP.t");
        }
        other => panic!("expected a row-remove clash, got {other:?}"),
    }
    // A clash leaves the user free to retry with a fresh transaction.
    assert!(err.is_retry_eligible());
    db.close().unwrap();
}

#[test]
fn removes_of_different_rows_do_not_clash() {
    let tmp = TempDir::new().unwrap();
    let (db, name, first) = setup(&tmp);

    let second = {
        let mut tx = db.begin_transaction();
        let t = tx.open_table(&name).unwrap();
        let row = insert_int(&mut tx, t, 200);
        tx.commit().unwrap();
        row
    };

    let mut t1 = db.begin_transaction();
    let mut t2 = db.begin_transaction();
    let id1 = t1.open_table(&name).unwrap();
    let id2 = t2.open_table(&name).unwrap();
    t1.remove_row(id1, first).unwrap();
    t2.remove_row(id2, second).unwrap();
    t1.commit().unwrap();
    t2.commit().unwrap();

    let mut check = db.begin_transaction();
    let t = check.open_table(&name).unwrap();
    assert!(check.visible_rows(t).unwrap().is_empty());
    check.rollback();
    db.close().unwrap();
}

#[test]
fn uncommitted_writes_are_invisible_to_other_transactions() {
    let tmp = TempDir::new().unwrap();
    let (db, name, _) = setup(&tmp);

    let mut writer = db.begin_transaction();
    let wt = writer.open_table(&name).unwrap();
    let fresh = insert_int(&mut writer, wt, 555);

    let mut reader = db.begin_transaction();
    let rt = reader.open_table(&name).unwrap();
    assert!(!reader.visible_rows(rt).unwrap().contains(&fresh));
    reader.rollback();

    writer.commit().unwrap();

    let mut reader = db.begin_transaction();
    let rt = reader.open_table(&name).unwrap();
    assert!(reader.visible_rows(rt).unwrap().contains(&fresh));
    reader.rollback();
    db.close().unwrap();
}

#[test]
fn rollback_discards_added_rows() {
    let tmp = TempDir::new().unwrap();
    let (db, name, seeded) = setup(&tmp);

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    insert_int(&mut tx, t, 1);
    insert_int(&mut tx, t, 2);
    tx.rollback();

    let mut check = db.begin_transaction();
    let t = check.open_table(&name).unwrap();
    assert_eq!(check.visible_rows(t).unwrap(), vec![seeded]);
    check.rollback();
    db.close().unwrap();
}

#[test]
fn update_produces_a_new_row_and_keeps_history_consistent() {
    let tmp = TempDir::new().unwrap();
    let (db, name, old) = setup(&tmp);

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let mut row = RowData::new(tx.table_def(t).unwrap());
    row.set_cell(0, TypedValue::from_i64(101)).unwrap();
    let new = tx.update_row(t, old, row).unwrap();
    assert_ne!(new, old);
    tx.commit().unwrap();

    let mut check = db.begin_transaction();
    let t = check.open_table(&name).unwrap();
    let visible = check.visible_rows(t).unwrap();
    assert_eq!(visible, vec![new]);
    assert_eq!(check.cell(t, 0, new).unwrap(), TypedValue::from_i64(101));
    check.rollback();
    db.close().unwrap();
}
