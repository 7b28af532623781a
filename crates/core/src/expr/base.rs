use std::sync::Arc;

use granite_index::SelectableScheme;
use granite_primitives::{RowId, TableId};
use granite_value::TypedValue;

use crate::error::Result;
use crate::expr::{RawTableInfo, TableExpr, Variable};
use crate::schema::TableDef;
use crate::transaction::Transaction;

/// A transaction's view of one master table: the leaf of every expression
/// tree. Its row domain is the master row domain, restricted to the rows
/// visible in the transaction's snapshot (plus the transaction's own
/// writes).
pub struct TransactionTable<'a> {
    tx: &'a Transaction,
    table: TableId,
    def: Arc<TableDef>,
    visible: Vec<RowId>,
}

impl<'a> TransactionTable<'a> {
    pub fn new(tx: &'a Transaction, table: TableId) -> Result<TransactionTable<'a>> {
        let def = tx.table_def(table)?;
        let visible = tx.visible_rows(table)?;
        Ok(TransactionTable {
            tx,
            table,
            def,
            visible,
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table
    }
}

impl TableExpr for TransactionTable<'_> {
    fn column_count(&self) -> usize {
        self.def.column_count()
    }

    fn row_count(&self) -> usize {
        self.visible.len()
    }

    fn table_def(&self) -> &TableDef {
        &self.def
    }

    fn resolved_variable(&self, col: usize) -> Variable {
        Variable::qualified(self.def.table_name().clone(), self.def.column(col).name.clone())
    }

    fn cell(&self, col: usize, row: RowId) -> Result<TypedValue> {
        self.tx.cell(self.table, col, row)
    }

    fn row_enumeration(&self) -> Vec<RowId> {
        self.visible.clone()
    }

    fn scheme_for(&self, col: usize) -> SelectableScheme {
        match self.tx.scheme_and_source(self.table, col) {
            // Published as an immutable copy: safe to share, never mutated.
            Ok((scheme, _)) => scheme.copy(true),
            Err(_) => SelectableScheme::BlindScan(granite_index::BlindScan::new()),
        }
    }

    fn rows_to_base_domain(&self, _col: usize, rows: Vec<RowId>) -> Result<Vec<RowId>> {
        Ok(rows)
    }

    fn raw_tuples(&self, rows: &[RowId]) -> Result<Option<RawTableInfo>> {
        Ok(Some(RawTableInfo {
            roots: vec![self.table],
            tuples: rows.iter().map(|&r| vec![r]).collect(),
        }))
    }

    fn lock_root(&self, _key: i32) {
        if let Ok(master) = self.tx.master(self.table) {
            master.lock_root();
        }
    }

    fn unlock_root(&self, _key: i32) {
        if let Ok(master) = self.tx.master(self.table) {
            master.unlock_root();
        }
    }

    fn has_roots_locked(&self) -> bool {
        self.tx.master(self.table).map(|m| m.has_roots_locked()).unwrap_or(false)
    }
}
