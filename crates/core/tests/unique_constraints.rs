use granite::{ColumnDef, Conglomerate, ConstraintError, DBError, RowData, TableDef, TableName};
use granite_primitives::TableId;
use granite_value::{SqlType, TypedValue};
use tempfile::TempDir;

fn accounts_table() -> TableDef {
    let mut def = TableDef::new(TableName::new("APP", "accounts"));
    def.add_column(ColumnDef::new("id", SqlType::Integer).not_null().unique())
        .unwrap();
    def.add_column(ColumnDef::new("nick", SqlType::Varchar).unique()).unwrap();
    def
}

fn insert(tx: &mut granite::Transaction, table: TableId, id: i64, nick: Option<&str>) -> granite::Result<granite_primitives::RowId> {
    let mut row = RowData::new(tx.table_def(table)?);
    row.set_cell(0, TypedValue::from_i64(id))?;
    if let Some(nick) = nick {
        row.set_cell(1, TypedValue::string(nick))?;
    }
    tx.add_row(table, row)
}

#[test]
fn duplicates_are_rejected_immediately() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "uniqdb").unwrap();
    db.create_table(accounts_table()).unwrap();
    let name = TableName::new("APP", "accounts");

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    insert(&mut tx, t, 1, Some("walter")).unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    // Against committed state.
    let err = insert(&mut tx, t, 1, Some("other")).unwrap_err();
    assert!(matches!(err, DBError::Constraint(ConstraintError::Unique { .. })));
    // Within the transaction's own writes.
    insert(&mut tx, t, 2, Some("ines")).unwrap();
    let err = insert(&mut tx, t, 3, Some("ines")).unwrap_err();
    assert!(matches!(err, DBError::Constraint(ConstraintError::Unique { .. })));
    tx.rollback();
    db.close().unwrap();
}

#[test]
fn nulls_do_not_collide() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "uniqdb").unwrap();
    db.create_table(accounts_table()).unwrap();
    let name = TableName::new("APP", "accounts");

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    insert(&mut tx, t, 1, None).unwrap();
    insert(&mut tx, t, 2, None).unwrap();
    tx.commit().unwrap();
    db.close().unwrap();
}

#[test]
fn update_may_keep_its_own_unique_value() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "uniqdb").unwrap();
    db.create_table(accounts_table()).unwrap();
    let name = TableName::new("APP", "accounts");

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let row = insert(&mut tx, t, 1, Some("walter")).unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let mut replacement = RowData::new(tx.table_def(t).unwrap());
    replacement.set_cell(0, TypedValue::from_i64(1)).unwrap();
    replacement.set_cell(1, TypedValue::string("walter the second")).unwrap();
    tx.update_row(t, row, replacement).unwrap();
    tx.commit().unwrap();
    db.close().unwrap();
}

#[test]
fn concurrent_duplicate_inserts_fail_at_commit() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "uniqdb").unwrap();
    db.create_table(accounts_table()).unwrap();
    let name = TableName::new("APP", "accounts");

    let mut t1 = db.begin_transaction();
    let mut t2 = db.begin_transaction();
    let id1 = t1.open_table(&name).unwrap();
    let id2 = t2.open_table(&name).unwrap();

    // Neither transaction can see the other's insert; both pass the
    // immediate check.
    insert(&mut t1, id1, 7, Some("dup")).unwrap();
    insert(&mut t2, id2, 7, Some("dup")).unwrap();

    t1.commit().unwrap();
    let err = t2.commit().unwrap_err();
    assert!(matches!(err, DBError::Constraint(ConstraintError::Unique { .. })));

    // Only the first insert survived.
    let mut check = db.begin_transaction();
    let t = check.open_table(&name).unwrap();
    assert_eq!(check.row_count(t).unwrap(), 1);
    check.rollback();
    db.close().unwrap();
}
