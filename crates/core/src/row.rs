use std::sync::Arc;

use granite_value::{SqlType, TypedValue};

use crate::error::{ConstraintError, Result};
use crate::schema::TableDef;

/// A column-ordered vector of values bound to a table definition, built by
/// a writer and handed to the master table for serialization.
#[derive(Debug, Clone)]
pub struct RowData {
    def: Arc<TableDef>,
    cells: Vec<TypedValue>,
}

impl RowData {
    /// A fresh row with every cell a typed null of its column.
    pub fn new(def: Arc<TableDef>) -> RowData {
        let cells = def
            .columns()
            .iter()
            .map(|c| TypedValue::typed_null(c.sql_type))
            .collect();
        RowData { def, cells }
    }

    pub fn table_def(&self) -> &TableDef {
        &self.def
    }

    pub fn column_count(&self) -> usize {
        self.cells.len()
    }

    /// Set one cell, checking the value against the column's declared type.
    /// Nullability is checked when the row is written, not here, so columns
    /// can be filled in any order.
    pub fn set_cell(&mut self, col: usize, value: TypedValue) -> Result<()> {
        let column = self.def.column(col);
        if !value.is_null() && !type_accepts(column.sql_type, &value) {
            return Err(ConstraintError::TypeMismatch {
                column: column.name.clone(),
                declared: column.sql_type,
                found: value.sql_type(),
            }
            .into());
        }
        self.cells[col] = value.with_collation(&column.collation);
        Ok(())
    }

    pub fn set_cell_by_name(&mut self, name: &str, value: TypedValue) -> Result<()> {
        let col = self.def.column_index(name)?;
        self.set_cell(col, value)
    }

    pub fn cell(&self, col: usize) -> &TypedValue {
        &self.cells[col]
    }

    pub fn cells(&self) -> &[TypedValue] {
        &self.cells
    }

    /// The `INITIALLY IMMEDIATE` per-row checks: not-null columns must hold
    /// a value.
    pub fn check_constraints(&self) -> Result<()> {
        for (cell, column) in self.cells.iter().zip(self.def.columns()) {
            if column.not_null && cell.is_null() {
                return Err(ConstraintError::NotNull {
                    table: self.def.table_name().to_string(),
                    column: column.name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn type_accepts(declared: SqlType, value: &TypedValue) -> bool {
    match value {
        TypedValue::Null(_) => true,
        TypedValue::Boolean(_) => matches!(declared, SqlType::Boolean | SqlType::Bit),
        TypedValue::Numeric(_) => declared.is_numeric(),
        TypedValue::String(_) => declared.is_string(),
        TypedValue::Date(d) => declared == d.kind.sql_type(),
        TypedValue::Binary(_) => declared == SqlType::Binary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, TableName};

    fn def() -> Arc<TableDef> {
        let mut def = TableDef::new(TableName::new("APP", "t"));
        def.add_column(ColumnDef::new("a", SqlType::Integer).not_null()).unwrap();
        def.add_column(ColumnDef::new("b", SqlType::Varchar)).unwrap();
        def.set_immutable();
        Arc::new(def)
    }

    #[test]
    fn type_checked_cells() {
        let mut row = RowData::new(def());
        row.set_cell(0, TypedValue::from_i64(1)).unwrap();
        assert!(row.set_cell(0, TypedValue::string("nope")).is_err());
        row.set_cell_by_name("b", TypedValue::string("fine")).unwrap();
    }

    #[test]
    fn not_null_enforced_at_check_time() {
        let mut row = RowData::new(def());
        row.set_cell(1, TypedValue::string("only b")).unwrap();
        assert!(row.check_constraints().is_err());
        row.set_cell(0, TypedValue::from_i64(0)).unwrap();
        row.check_constraints().unwrap();
    }
}
