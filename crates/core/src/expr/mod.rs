//! The relational expression tree.
//!
//! Query execution composes tables out of other tables: a base table is a
//! transaction's view of a master table, and the other variants reshape
//! their parents without copying rows. Row references inside an expression
//! are indices in that expression's own row domain; the tree translates
//! them parent-ward on demand.
//!
//! Ownership is parent-outlives-child by construction: expressions are
//! transient within one query scope and borrow their parents.

mod base;
mod composite;
mod filter;
mod joined;
mod outer;
mod temporary;

pub use base::TransactionTable;
pub use composite::{CompositeFunction, CompositeTable};
pub use filter::{FilterTable, ReferenceTable};
pub use joined::JoinedTable;
pub use outer::OuterTable;
pub use temporary::TemporaryTable;

use std::fmt;

use granite_index::scheme::SchemeSource;
use granite_index::{SchemeError, SelectableRange, SelectableScheme};
use granite_primitives::{RowId, TableId};
use granite_value::TypedValue;

use crate::error::Result;
use crate::schema::{TableDef, TableName};

/// A column reference: an optional qualifying table name plus the column
/// name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub table_name: Option<TableName>,
    pub name: String,
}

impl Variable {
    pub fn bare(name: impl Into<String>) -> Variable {
        Variable {
            table_name: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: TableName, name: impl Into<String>) -> Variable {
        Variable {
            table_name: Some(table),
            name: name.into(),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table_name {
            Some(t) => write!(f, "{t}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The resolution of an expression tree down to its root tables: the list
/// of root table ids and, aligned with the resolved row set, one tuple of
/// root-domain row indices per expression row. Used by the set operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTableInfo {
    pub roots: Vec<TableId>,
    pub tuples: Vec<Vec<RowId>>,
}

impl RawTableInfo {
    /// Merge with another resolution over the same roots, eliminating
    /// duplicate tuples. Both sides are sorted and merged.
    pub fn union(mut self, other: RawTableInfo) -> Option<RawTableInfo> {
        if self.roots != other.roots {
            return None;
        }
        self.tuples.extend(other.tuples);
        self.remove_duplicates();
        Some(self)
    }

    /// Sort tuples lexicographically and drop adjacent duplicates.
    pub fn remove_duplicates(&mut self) {
        self.tuples.sort();
        self.tuples.dedup();
    }
}

/// The base contract every table expression implements.
pub trait TableExpr {
    fn column_count(&self) -> usize;

    fn row_count(&self) -> usize;

    /// The column shape of this expression (names may be aliases).
    fn table_def(&self) -> &TableDef;

    /// The fully qualified variable a column resolves to.
    fn resolved_variable(&self, col: usize) -> Variable;

    /// Find the column a variable refers to, honouring an optional
    /// qualifier.
    fn find_field_name(&self, var: &Variable) -> Option<usize> {
        (0..self.column_count()).find(|&col| {
            let resolved = self.resolved_variable(col);
            resolved.name == var.name
                && match (&var.table_name, &resolved.table_name) {
                    (None, _) => true,
                    (Some(want), Some(have)) => want == have,
                    (Some(_), None) => false,
                }
        })
    }

    /// The value of one cell; `row` is in this expression's domain.
    fn cell(&self, col: usize, row: RowId) -> Result<TypedValue>;

    /// Every row of this expression's domain, in its natural order.
    fn row_enumeration(&self) -> Vec<RowId>;

    /// The scheme answering ordered selects over `col`, rendered in this
    /// expression's row domain. Non-base expressions fall back to a blind
    /// scan.
    fn scheme_for(&self, col: usize) -> SelectableScheme;

    /// Translate `rows` of this domain into the domain of the base table
    /// that owns `col`.
    fn rows_to_base_domain(&self, col: usize, rows: Vec<RowId>) -> Result<Vec<RowId>>;

    /// Resolve `rows` down to root tables, or `None` when the tree holds a
    /// node with no raw backing (a composite, a temporary table, outer
    /// padding).
    fn raw_tuples(&self, rows: &[RowId]) -> Result<Option<RawTableInfo>>;

    // Root locks pin underlying rows for readers that outlive the
    // producing transaction's commit. They propagate through every branch
    // to the base tables.

    fn lock_root(&self, key: i32);

    fn unlock_root(&self, key: i32);

    fn has_roots_locked(&self) -> bool;
}

/// One column of an expression, presented as a scheme source.
pub struct ExprColumnSource<'a> {
    pub table: &'a dyn TableExpr,
    pub col: usize,
}

impl SchemeSource for ExprColumnSource<'_> {
    fn scheme_cell(&self, row: RowId) -> std::result::Result<TypedValue, SchemeError> {
        self.table
            .cell(self.col, row)
            .map_err(|e| SchemeError::Cell(row, e.to_string()))
    }

    fn scheme_rows(&self) -> std::result::Result<Vec<RowId>, SchemeError> {
        Ok(self.table.row_enumeration())
    }
}

impl<'x> dyn TableExpr + 'x {
    /// Ordered range select over one column of this expression.
    pub fn select_ranges(&self, col: usize, ranges: &[SelectableRange]) -> Result<Vec<RowId>> {
        let scheme = self.scheme_for(col);
        let source = ExprColumnSource { table: self, col };
        Ok(scheme.select_ranges(&source, ranges)?)
    }

    pub fn select_all(&self, col: usize) -> Result<Vec<RowId>> {
        let scheme = self.scheme_for(col);
        let source = ExprColumnSource { table: self, col };
        Ok(scheme.select_all(&source)?)
    }

    pub fn select_equal(&self, col: usize, value: &TypedValue) -> Result<Vec<RowId>> {
        let scheme = self.scheme_for(col);
        let source = ExprColumnSource { table: self, col };
        Ok(scheme.select_equal(&source, value)?)
    }

    pub fn select_greater(&self, col: usize, value: &TypedValue) -> Result<Vec<RowId>> {
        let scheme = self.scheme_for(col);
        let source = ExprColumnSource { table: self, col };
        Ok(scheme.select_greater(&source, value)?)
    }

    pub fn select_less(&self, col: usize, value: &TypedValue) -> Result<Vec<RowId>> {
        let scheme = self.scheme_for(col);
        let source = ExprColumnSource { table: self, col };
        Ok(scheme.select_less(&source, value)?)
    }

    /// Reorder `rows` by the collation of `col`, stable over ties.
    pub fn order_rows_by(&self, col: usize, rows: Vec<RowId>) -> Result<Vec<RowId>> {
        let scheme = self.scheme_for(col);
        let source = ExprColumnSource { table: self, col };
        Ok(scheme.internal_order_index_set(&source, rows)?)
    }
}
