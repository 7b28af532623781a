use granite_index::{BlindScan, SelectableScheme};
use granite_primitives::RowId;
use granite_value::TypedValue;

use crate::error::Result;
use crate::expr::{RawTableInfo, TableExpr, Variable};
use crate::schema::{TableDef, TableName};

/// N parent tables composed column-wise. Every joined row is a tuple of
/// one row per parent; `column_table[c]` names the parent a column comes
/// from and `column_filter[c]` the column within that parent.
///
/// The joined row domain is `0..row_count` positions; the per-parent row
/// maps translate a position to each parent's domain.
pub struct JoinedTable<'a> {
    parents: Vec<&'a dyn TableExpr>,
    column_table: Vec<usize>,
    column_filter: Vec<usize>,
    /// `row_maps[p][joined_row]` is the row of parent `p`.
    row_maps: Vec<Vec<RowId>>,
    def: TableDef,
}

impl<'a> JoinedTable<'a> {
    /// Compose `parents` with explicit row maps, one per parent, all of
    /// equal length.
    pub fn new(name: TableName, parents: Vec<&'a dyn TableExpr>, row_maps: Vec<Vec<RowId>>) -> JoinedTable<'a> {
        assert_eq!(parents.len(), row_maps.len(), "one row map per parent");
        let rows = row_maps.first().map(|m| m.len()).unwrap_or(0);
        assert!(
            row_maps.iter().all(|m| m.len() == rows),
            "row maps must align position-wise"
        );

        let mut column_table = Vec::new();
        let mut column_filter = Vec::new();
        let mut def = TableDef::new(name);
        for (p, parent) in parents.iter().enumerate() {
            for c in 0..parent.column_count() {
                column_table.push(p);
                column_filter.push(c);
                let mut column = parent.table_def().column(c).clone();
                if def.find_column(&column.name).is_some() {
                    column.name = format!("{}.{}", parent.table_def().table_name().name, column.name);
                }
                def.add_column(column).expect("joined column names made unique");
            }
        }
        def.set_immutable();

        JoinedTable {
            parents,
            column_table,
            column_filter,
            row_maps,
            def,
        }
    }

    /// The cartesian product of two parents.
    pub fn cartesian(name: TableName, left: &'a dyn TableExpr, right: &'a dyn TableExpr) -> JoinedTable<'a> {
        let left_rows = left.row_enumeration();
        let right_rows = right.row_enumeration();
        let mut left_map = Vec::with_capacity(left_rows.len() * right_rows.len());
        let mut right_map = Vec::with_capacity(left_rows.len() * right_rows.len());
        for &l in &left_rows {
            for &r in &right_rows {
                left_map.push(l);
                right_map.push(r);
            }
        }
        JoinedTable::new(name, vec![left, right], vec![left_map, right_map])
    }

    /// The parent row a joined row maps to, for parent `parent_index`.
    pub fn resolve_row_for_table_at(&self, parent_index: usize, row: RowId) -> RowId {
        self.row_maps[parent_index][row.idx()]
    }

    /// Map a whole joined row set into parent `parent_index`'s domain.
    pub fn resolve_all_rows_for_table_at(&self, parent_index: usize, rows: &[RowId]) -> Vec<RowId> {
        rows.iter().map(|&r| self.resolve_row_for_table_at(parent_index, r)).collect()
    }
}

impl TableExpr for JoinedTable<'_> {
    fn column_count(&self) -> usize {
        self.column_table.len()
    }

    fn row_count(&self) -> usize {
        self.row_maps.first().map(|m| m.len()).unwrap_or(0)
    }

    fn table_def(&self) -> &TableDef {
        &self.def
    }

    fn resolved_variable(&self, col: usize) -> Variable {
        self.parents[self.column_table[col]].resolved_variable(self.column_filter[col])
    }

    fn cell(&self, col: usize, row: RowId) -> Result<TypedValue> {
        let parent = self.column_table[col];
        let parent_row = self.resolve_row_for_table_at(parent, row);
        self.parents[parent].cell(self.column_filter[col], parent_row)
    }

    fn row_enumeration(&self) -> Vec<RowId> {
        (0..self.row_count()).map(RowId::from).collect()
    }

    fn scheme_for(&self, _col: usize) -> SelectableScheme {
        SelectableScheme::BlindScan(BlindScan::new())
    }

    fn rows_to_base_domain(&self, col: usize, rows: Vec<RowId>) -> Result<Vec<RowId>> {
        let parent = self.column_table[col];
        let mapped = self.resolve_all_rows_for_table_at(parent, &rows);
        self.parents[parent].rows_to_base_domain(self.column_filter[col], mapped)
    }

    fn raw_tuples(&self, rows: &[RowId]) -> Result<Option<RawTableInfo>> {
        let mut roots = Vec::new();
        let mut tuples: Vec<Vec<RowId>> = vec![Vec::new(); rows.len()];
        for (p, parent) in self.parents.iter().enumerate() {
            let mapped = self.resolve_all_rows_for_table_at(p, rows);
            let Some(info) = parent.raw_tuples(&mapped)? else {
                return Ok(None);
            };
            roots.extend(info.roots);
            for (tuple, mut parent_tuple) in tuples.iter_mut().zip(info.tuples) {
                tuple.append(&mut parent_tuple);
            }
        }
        Ok(Some(RawTableInfo { roots, tuples }))
    }

    fn lock_root(&self, key: i32) {
        for parent in &self.parents {
            parent.lock_root(key);
        }
    }

    fn unlock_root(&self, key: i32) {
        for parent in &self.parents {
            parent.unlock_root(key);
        }
    }

    fn has_roots_locked(&self) -> bool {
        self.parents.iter().any(|p| p.has_roots_locked())
    }
}
