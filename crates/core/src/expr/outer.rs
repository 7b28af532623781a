use granite_index::{BlindScan, SelectableScheme};
use granite_primitives::RowId;
use granite_value::TypedValue;

use crate::error::Result;
use crate::expr::{RawTableInfo, TableExpr, Variable};
use crate::schema::TableDef;

/// A parent table padded with `null_rows` leading all-null rows, as
/// produced by the unmatched side of an outer join.
///
/// Rows below the pad count return nulls typed by their column; rows at or
/// above it dispatch to the parent.
pub struct OuterTable<'a> {
    parent: &'a dyn TableExpr,
    parent_rows: Vec<RowId>,
    null_rows: usize,
}

impl<'a> OuterTable<'a> {
    pub fn new(parent: &'a dyn TableExpr, null_rows: usize) -> OuterTable<'a> {
        OuterTable {
            parent,
            parent_rows: parent.row_enumeration(),
            null_rows,
        }
    }
}

impl TableExpr for OuterTable<'_> {
    fn column_count(&self) -> usize {
        self.parent.column_count()
    }

    fn row_count(&self) -> usize {
        self.null_rows + self.parent_rows.len()
    }

    fn table_def(&self) -> &TableDef {
        self.parent.table_def()
    }

    fn resolved_variable(&self, col: usize) -> Variable {
        self.parent.resolved_variable(col)
    }

    fn cell(&self, col: usize, row: RowId) -> Result<TypedValue> {
        if row.idx() < self.null_rows {
            let ty = self.table_def().column(col).sql_type;
            return Ok(TypedValue::typed_null(ty));
        }
        let parent_row = self.parent_rows[row.idx() - self.null_rows];
        self.parent.cell(col, parent_row)
    }

    fn row_enumeration(&self) -> Vec<RowId> {
        (0..self.row_count()).map(RowId::from).collect()
    }

    fn scheme_for(&self, _col: usize) -> SelectableScheme {
        SelectableScheme::BlindScan(BlindScan::new())
    }

    fn rows_to_base_domain(&self, col: usize, rows: Vec<RowId>) -> Result<Vec<RowId>> {
        // Pad rows have no base rows; only rows above the pad translate.
        let mapped: Vec<RowId> = rows
            .iter()
            .filter(|r| r.idx() >= self.null_rows)
            .map(|r| self.parent_rows[r.idx() - self.null_rows])
            .collect();
        self.parent.rows_to_base_domain(col, mapped)
    }

    fn raw_tuples(&self, _rows: &[RowId]) -> Result<Option<RawTableInfo>> {
        Ok(None)
    }

    fn lock_root(&self, key: i32) {
        self.parent.lock_root(key);
    }

    fn unlock_root(&self, key: i32) {
        self.parent.unlock_root(key);
    }

    fn has_roots_locked(&self) -> bool {
        self.parent.has_roots_locked()
    }
}
