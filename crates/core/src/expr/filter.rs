use granite_index::SelectableScheme;
use granite_primitives::RowId;
use granite_value::TypedValue;

use crate::error::Result;
use crate::expr::{RawTableInfo, TableExpr, Variable};
use crate::schema::{TableDef, TableName};

/// A 1:1 passthrough over a parent expression that renames the table
/// and/or masks columns. Row domains are identical, so the parent's
/// schemes serve unchanged.
pub struct FilterTable<'a> {
    parent: &'a dyn TableExpr,
    /// Filter column -> parent column.
    columns: Vec<usize>,
    def: TableDef,
}

impl<'a> FilterTable<'a> {
    /// A filter exposing every parent column under `name`.
    pub fn rename(parent: &'a dyn TableExpr, name: TableName) -> FilterTable<'a> {
        let columns = (0..parent.column_count()).collect();
        Self::with_columns(parent, name, columns)
    }

    /// A filter exposing only `columns` of the parent, in the given order.
    pub fn with_columns(parent: &'a dyn TableExpr, name: TableName, columns: Vec<usize>) -> FilterTable<'a> {
        let mut def = TableDef::new(name);
        for &parent_col in &columns {
            def.add_column(parent.table_def().column(parent_col).clone())
                .expect("parent definition has unique column names");
        }
        def.set_immutable();
        FilterTable { parent, columns, def }
    }

    fn parent_col(&self, col: usize) -> usize {
        self.columns[col]
    }
}

impl TableExpr for FilterTable<'_> {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn row_count(&self) -> usize {
        self.parent.row_count()
    }

    fn table_def(&self) -> &TableDef {
        &self.def
    }

    fn resolved_variable(&self, col: usize) -> Variable {
        Variable::qualified(self.def.table_name().clone(), self.def.column(col).name.clone())
    }

    fn cell(&self, col: usize, row: RowId) -> Result<TypedValue> {
        self.parent.cell(self.parent_col(col), row)
    }

    fn row_enumeration(&self) -> Vec<RowId> {
        self.parent.row_enumeration()
    }

    fn scheme_for(&self, col: usize) -> SelectableScheme {
        self.parent.scheme_for(self.parent_col(col))
    }

    fn rows_to_base_domain(&self, col: usize, rows: Vec<RowId>) -> Result<Vec<RowId>> {
        self.parent.rows_to_base_domain(self.parent_col(col), rows)
    }

    fn raw_tuples(&self, rows: &[RowId]) -> Result<Option<RawTableInfo>> {
        self.parent.raw_tuples(rows)
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

/// Like [`FilterTable`] but standing for a second, distinct occurrence of
/// the parent, so a table can be joined with itself.
pub struct ReferenceTable<'a> {
    inner: FilterTable<'a>,
}

impl<'a> ReferenceTable<'a> {
    pub fn new(parent: &'a dyn TableExpr, name: TableName) -> ReferenceTable<'a> {
        ReferenceTable {
            inner: FilterTable::rename(parent, name),
        }
    }
}

impl TableExpr for ReferenceTable<'_> {
    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn row_count(&self) -> usize {
        self.inner.row_count()
    }

    fn table_def(&self) -> &TableDef {
        self.inner.table_def()
    }

    fn resolved_variable(&self, col: usize) -> Variable {
        self.inner.resolved_variable(col)
    }

    fn cell(&self, col: usize, row: RowId) -> Result<TypedValue> {
        self.inner.cell(col, row)
    }

    fn row_enumeration(&self) -> Vec<RowId> {
        self.inner.row_enumeration()
    }

    fn scheme_for(&self, col: usize) -> SelectableScheme {
        self.inner.scheme_for(col)
    }

    fn rows_to_base_domain(&self, col: usize, rows: Vec<RowId>) -> Result<Vec<RowId>> {
        self.inner.rows_to_base_domain(col, rows)
    }

    fn raw_tuples(&self, rows: &[RowId]) -> Result<Option<RawTableInfo>> {
        self.inner.raw_tuples(rows)
    }

    fn lock_root(&self, key: i32) {
        self.inner.lock_root(key);
    }

    fn unlock_root(&self, key: i32) {
        self.inner.unlock_root(key);
    }

    fn has_roots_locked(&self) -> bool {
        self.inner.has_roots_locked()
    }
}
