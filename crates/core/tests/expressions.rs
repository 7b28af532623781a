use granite::expr::{
    CompositeFunction, CompositeTable, FilterTable, JoinedTable, OuterTable, ReferenceTable, TableExpr,
    TemporaryTable, TransactionTable, Variable,
};
use granite::{ColumnDef, Conglomerate, RowData, TableDef, TableName, Transaction};
use granite_primitives::{RowId, TableId};
use granite_value::{SqlType, TypedValue};
use tempfile::TempDir;

fn people_table() -> TableDef {
    let mut def = TableDef::new(TableName::new("APP", "people"));
    def.add_column(ColumnDef::new("id", SqlType::Integer).not_null().indexed())
        .unwrap();
    def.add_column(ColumnDef::new("name", SqlType::Varchar).not_null().indexed())
        .unwrap();
    def
}

fn seed(db: &Conglomerate) -> (TableName, Vec<RowId>) {
    db.create_table(people_table()).unwrap();
    let name = TableName::new("APP", "people");
    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let mut rows = Vec::new();
    for (id, person) in [(1, "walter"), (2, "ines"), (3, "bob")] {
        let mut row = RowData::new(tx.table_def(t).unwrap());
        row.set_cell(0, TypedValue::from_i64(id)).unwrap();
        row.set_cell(1, TypedValue::string(person)).unwrap();
        rows.push(tx.add_row(t, row).unwrap());
    }
    tx.commit().unwrap();
    (name, rows)
}

fn base<'a>(tx: &'a Transaction, table: TableId) -> TransactionTable<'a> {
    TransactionTable::new(tx, table).unwrap()
}

#[test]
fn filter_renames_and_masks_columns() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "exprdb").unwrap();
    let (name, _) = seed(&db);

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let people = base(&tx, t);

    let alias = TableName::new("APP", "p");
    let filtered = FilterTable::with_columns(&people, alias.clone(), vec![1]);
    assert_eq!(filtered.column_count(), 1);
    assert_eq!(filtered.row_count(), 3);

    // The alias resolves; the original qualifier does not.
    assert_eq!(filtered.find_field_name(&Variable::qualified(alias, "name")), Some(0));
    assert_eq!(filtered.find_field_name(&Variable::bare("id")), None);

    // Row domain is shared with the parent, so the parent's index serves.
    let expr: &dyn TableExpr = &filtered;
    let ordered = expr.select_all(0).unwrap();
    let names: Vec<TypedValue> = ordered.iter().map(|&r| expr.cell(0, r).unwrap()).collect();
    assert_eq!(
        names,
        vec![TypedValue::string("bob"), TypedValue::string("ines"), TypedValue::string("walter")]
    );

    tx.rollback();
    db.close().unwrap();
}

#[test]
fn self_join_through_a_reference_table() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "exprdb").unwrap();
    let (name, rows) = seed(&db);

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let people = base(&tx, t);
    let other = ReferenceTable::new(&people, TableName::new("APP", "people2"));

    let joined = JoinedTable::cartesian(TableName::new("APP", "j"), &people, &other);
    assert_eq!(joined.column_count(), 4);
    assert_eq!(joined.row_count(), 9);

    // Every joined row resolves to one row per parent.
    let first = RowId(0);
    let left = joined.resolve_row_for_table_at(0, first);
    let right = joined.resolve_row_for_table_at(1, first);
    assert!(rows.contains(&left));
    assert!(rows.contains(&right));

    // Joined row 4 pairs the second left row with the second right row.
    assert_eq!(joined.cell(1, RowId(4)).unwrap(), TypedValue::string("ines"));
    assert_eq!(joined.cell(3, RowId(4)).unwrap(), TypedValue::string("ines"));

    // Joined rows translate back to the base row domain.
    let based = joined.rows_to_base_domain(0, vec![RowId(0), RowId(3)]).unwrap();
    assert!(based.iter().all(|r| rows.contains(r)));

    // The raw resolution carries one root per parent occurrence.
    let raw = joined.raw_tuples(&joined.row_enumeration()).unwrap().unwrap();
    assert_eq!(raw.roots.len(), 2);
    assert_eq!(raw.tuples.len(), 9);

    tx.rollback();
    db.close().unwrap();
}

#[test]
fn composite_union_discards_duplicates_and_union_all_keeps_them() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "exprdb").unwrap();
    let (name, _) = seed(&db);

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let people = base(&tx, t);

    let distinct = CompositeTable::new(vec![&people, &people], CompositeFunction::Union, false).unwrap();
    assert_eq!(distinct.row_count(), 3);

    let all = CompositeTable::new(vec![&people, &people], CompositeFunction::Union, true).unwrap();
    assert_eq!(all.row_count(), 6);

    let nothing = CompositeTable::new(vec![&people, &people], CompositeFunction::Except, false).unwrap();
    assert_eq!(nothing.row_count(), 0);

    let same = CompositeTable::new(vec![&people, &people], CompositeFunction::Intersect, false).unwrap();
    assert_eq!(same.row_count(), 3);

    tx.rollback();
    db.close().unwrap();
}

#[test]
fn outer_table_pads_with_typed_nulls() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "exprdb").unwrap();
    let (name, _) = seed(&db);

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let people = base(&tx, t);

    let outer = OuterTable::new(&people, 2);
    assert_eq!(outer.row_count(), 5);
    assert_eq!(outer.cell(0, RowId(0)).unwrap(), TypedValue::typed_null(SqlType::Integer));
    assert_eq!(outer.cell(1, RowId(1)).unwrap(), TypedValue::typed_null(SqlType::Varchar));
    // Rows above the pad dispatch to the parent.
    assert!(matches!(outer.cell(1, RowId(2)).unwrap(), TypedValue::String(_)));

    tx.rollback();
    db.close().unwrap();
}

#[test]
fn temporary_tables_hold_literal_rows() {
    let mut temp = TemporaryTable::new({
        let mut def = TableDef::new(TableName::new("APP", "lit"));
        def.add_column(ColumnDef::new("x", SqlType::Integer)).unwrap();
        def
    });
    temp.add_row(vec![TypedValue::from_i64(30)]);
    temp.add_row(vec![TypedValue::from_i64(10)]);
    temp.add_row(vec![TypedValue::from_i64(20)]);

    let expr: &dyn TableExpr = &temp;
    assert_eq!(expr.row_count(), 3);
    let ordered = expr.order_rows_by(0, expr.row_enumeration()).unwrap();
    let values: Vec<TypedValue> = ordered.iter().map(|&r| expr.cell(0, r).unwrap()).collect();
    assert_eq!(
        values,
        vec![TypedValue::from_i64(10), TypedValue::from_i64(20), TypedValue::from_i64(30)]
    );
}

#[test]
fn raw_union_of_a_table_with_itself_dedups() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "exprdb").unwrap();
    let (name, _) = seed(&db);

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let people = base(&tx, t);

    let rows = people.row_enumeration();
    let a = people.raw_tuples(&rows).unwrap().unwrap();
    let b = people.raw_tuples(&rows).unwrap().unwrap();
    let merged = a.clone().union(b).unwrap();
    assert_eq!(merged.tuples.len(), a.tuples.len());

    tx.rollback();
    db.close().unwrap();
}

#[test]
fn root_locks_propagate_to_the_base_table() {
    let tmp = TempDir::new().unwrap();
    let (db, _) = Conglomerate::open(tmp.path(), "exprdb").unwrap();
    let (name, _) = seed(&db);

    let mut tx = db.begin_transaction();
    let t = tx.open_table(&name).unwrap();
    let people = base(&tx, t);
    let filtered = FilterTable::rename(&people, TableName::new("APP", "p"));

    assert!(!filtered.has_roots_locked());
    filtered.lock_root(1);
    assert!(filtered.has_roots_locked());
    assert!(db.table_source(&name).unwrap().has_roots_locked());
    filtered.unlock_root(1);
    assert!(!filtered.has_roots_locked());

    tx.rollback();
    db.close().unwrap();
}
