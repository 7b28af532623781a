use granite_index::{BlindScan, SelectableScheme};
use granite_primitives::RowId;
use granite_value::TypedValue;

use crate::error::Result;
use crate::expr::{RawTableInfo, TableExpr, Variable};
use crate::schema::TableDef;

/// An in-memory row vector with a fixed column shape. Used for literal row
/// sets and small intermediate results; never backed by storage.
pub struct TemporaryTable {
    def: TableDef,
    rows: Vec<Vec<TypedValue>>,
}

impl TemporaryTable {
    pub fn new(mut def: TableDef) -> TemporaryTable {
        def.set_immutable();
        TemporaryTable { def, rows: Vec::new() }
    }

    /// Append a row; the cell count must match the column count.
    pub fn add_row(&mut self, cells: Vec<TypedValue>) {
        assert_eq!(
            cells.len(),
            self.def.column_count(),
            "temporary row width must match the definition"
        );
        self.rows.push(cells);
    }
}

impl TableExpr for TemporaryTable {
    fn column_count(&self) -> usize {
        self.def.column_count()
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn table_def(&self) -> &TableDef {
        &self.def
    }

    fn resolved_variable(&self, col: usize) -> Variable {
        Variable::qualified(self.def.table_name().clone(), self.def.column(col).name.clone())
    }

    fn cell(&self, col: usize, row: RowId) -> Result<TypedValue> {
        Ok(self.rows[row.idx()][col].clone())
    }

    fn row_enumeration(&self) -> Vec<RowId> {
        (0..self.rows.len()).map(RowId::from).collect()
    }

    fn scheme_for(&self, _col: usize) -> SelectableScheme {
        SelectableScheme::BlindScan(BlindScan::new())
    }

    fn rows_to_base_domain(&self, _col: usize, _rows: Vec<RowId>) -> Result<Vec<RowId>> {
        Err(crate::error::TableError::NotFound("temporary table has no base domain".into()).into())
    }

    fn raw_tuples(&self, _rows: &[RowId]) -> Result<Option<RawTableInfo>> {
        Ok(None)
    }

    fn lock_root(&self, _key: i32) {}

    fn unlock_root(&self, _key: i32) {}

    fn has_roots_locked(&self) -> bool {
        false
    }
}
