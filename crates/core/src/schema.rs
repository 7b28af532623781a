use std::fmt;
use std::io::{self, Read};

use granite_store::StoreError;
use granite_value::{Collation, CollationStrength, SqlType};

use crate::error::{DBError, Result, TableError};

/// Magic prefix of a serialized table definition, stored at record 0 of the
/// table's record store.
pub const TABLE_DEF_MAGIC: u32 = 0x000B_EBB;

/// Which scheme indexes a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemeKind {
    /// No maintained index; selects scan the table.
    #[default]
    BlindScan,
    /// A maintained insertion-sorted index.
    InsertSort,
}

impl SchemeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemeKind::BlindScan => "BlindSearch",
            SchemeKind::InsertSort => "InsertSearch",
        }
    }

    pub fn parse(name: &str) -> Option<SchemeKind> {
        match name {
            "BlindSearch" => Some(SchemeKind::BlindScan),
            "InsertSearch" => Some(SchemeKind::InsertSort),
            _ => None,
        }
    }
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        TableName {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// One column of a table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub not_null: bool,
    /// No two visible rows may share a non-null value in this column.
    pub unique: bool,
    /// Source text of the DEFAULT expression, if any. The core stores the
    /// text; evaluation belongs to the statement layer.
    pub default_expression: Option<String>,
    pub scheme: SchemeKind,
    pub collation: Collation,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            sql_type,
            not_null: false,
            unique: false,
            default_expression: None,
            scheme: SchemeKind::default(),
            collation: Collation::default(),
        }
    }

    pub fn not_null(mut self) -> ColumnDef {
        self.not_null = true;
        self
    }

    /// Mark the column unique; implies an insert-sort index so the
    /// duplicate probe is a binary search, not a scan.
    pub fn unique(mut self) -> ColumnDef {
        self.unique = true;
        self.scheme = SchemeKind::InsertSort;
        self
    }

    pub fn indexed(mut self) -> ColumnDef {
        self.scheme = SchemeKind::InsertSort;
        self
    }

    pub fn with_default(mut self, expression: impl Into<String>) -> ColumnDef {
        self.default_expression = Some(expression.into());
        self
    }

    pub fn with_collation(mut self, collation: Collation) -> ColumnDef {
        self.collation = collation;
        self
    }
}

/// A table definition: schema-qualified name plus its ordered columns.
///
/// A definition is mutable while it is being assembled and is sealed with
/// [`TableDef::set_immutable`] before it is published to a master table.
/// Mutating a sealed definition is a programming error and panics.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    table_name: TableName,
    columns: Vec<ColumnDef>,
    immutable: bool,
}

impl TableDef {
    pub fn new(table_name: TableName) -> TableDef {
        TableDef {
            table_name,
            columns: Vec::new(),
            immutable: false,
        }
    }

    pub fn table_name(&self) -> &TableName {
        &self.table_name
    }

    pub fn add_column(&mut self, column: ColumnDef) -> Result<()> {
        assert!(!self.immutable, "add_column on an immutable table definition");
        if self.columns.iter().any(|c| c.name == column.name) {
            return Err(TableError::DuplicateColumnName(column.name).into());
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn set_immutable(&mut self) {
        self.immutable = true;
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, i: usize) -> &ColumnDef {
        &self.columns[i]
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.find_column(name)
            .ok_or_else(|| TableError::ColumnNotFound(name.to_owned(), self.table_name.to_string()).into())
    }

    /// A copy of this definition under another name, with every column kept.
    /// The copy is mutable until sealed.
    pub fn with_name(&self, table_name: TableName) -> TableDef {
        TableDef {
            table_name,
            columns: self.columns.clone(),
            immutable: false,
        }
    }

    // Serialized form, stored at record 0 of the table's record store:
    // {magic:u32_be, version:u8, schema, name, column_count:u32_be,
    //  columns...}; strings are u16_be length-prefixed UTF-8.

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&TABLE_DEF_MAGIC.to_be_bytes());
        out.push(1); // version
        write_string(&mut out, &self.table_name.schema);
        write_string(&mut out, &self.table_name.name);
        out.extend_from_slice(&(self.columns.len() as u32).to_be_bytes());
        for col in &self.columns {
            write_string(&mut out, &col.name);
            out.push(col.sql_type.code());
            out.push(col.not_null as u8);
            out.push(col.unique as u8);
            match &col.default_expression {
                Some(expr) => {
                    out.push(1);
                    write_string(&mut out, expr);
                }
                None => out.push(0),
            }
            write_string(&mut out, col.scheme.as_str());
            match &col.collation.locale {
                Some(locale) => {
                    out.push(1);
                    write_string(&mut out, locale);
                    out.push(match col.collation.strength {
                        CollationStrength::Primary => 0,
                        CollationStrength::Secondary => 1,
                        CollationStrength::Tertiary => 2,
                        CollationStrength::Identical => 3,
                    });
                    out.push(col.collation.decomposition as u8);
                }
                None => out.push(0),
            }
        }
        out
    }

    /// Deserialize a definition blob. The result is sealed.
    pub fn deserialize(bytes: &[u8]) -> Result<TableDef> {
        let mut r = io::Cursor::new(bytes);
        let magic = read_u32(&mut r)?;
        if magic != TABLE_DEF_MAGIC {
            return Err(corrupt(format!("table definition carries bad magic {magic:#010x}")));
        }
        let version = read_u8(&mut r)?;
        if version != 1 {
            return Err(corrupt(format!("unknown table definition version {version}")));
        }
        let schema = read_string(&mut r)?;
        let name = read_string(&mut r)?;
        let column_count = read_u32(&mut r)? as usize;
        let mut def = TableDef::new(TableName::new(schema, name));
        for _ in 0..column_count {
            let col_name = read_string(&mut r)?;
            let type_code = read_u8(&mut r)?;
            let sql_type = SqlType::from_code(type_code)
                .ok_or_else(|| corrupt(format!("unknown column type code {type_code}")))?;
            let not_null = read_u8(&mut r)? != 0;
            let unique = read_u8(&mut r)? != 0;
            let default_expression = if read_u8(&mut r)? != 0 {
                Some(read_string(&mut r)?)
            } else {
                None
            };
            let scheme_name = read_string(&mut r)?;
            let scheme = SchemeKind::parse(&scheme_name)
                .ok_or_else(|| corrupt(format!("unknown scheme `{scheme_name}`")))?;
            let collation = if read_u8(&mut r)? != 0 {
                let locale = read_string(&mut r)?;
                let strength = match read_u8(&mut r)? {
                    0 => CollationStrength::Primary,
                    1 => CollationStrength::Secondary,
                    2 => CollationStrength::Tertiary,
                    _ => CollationStrength::Identical,
                };
                let decomposition = read_u8(&mut r)? != 0;
                Collation {
                    locale: Some(locale),
                    strength,
                    decomposition,
                }
            } else {
                Collation::default()
            };
            def.add_column(ColumnDef {
                name: col_name,
                sql_type,
                not_null,
                unique,
                default_expression,
                scheme,
                collation,
            })?;
        }
        def.set_immutable();
        Ok(def)
    }
}

fn corrupt(message: String) -> DBError {
    DBError::Store(StoreError::Corrupt(message))
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(io_corrupt)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(io_corrupt)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len).map_err(io_corrupt)?;
    let mut buf = vec![0u8; u16::from_be_bytes(len) as usize];
    r.read_exact(&mut buf).map_err(io_corrupt)?;
    String::from_utf8(buf).map_err(|e| corrupt(format!("non-UTF-8 string in table definition: {e}")))
}

fn io_corrupt(e: io::Error) -> DBError {
    corrupt(format!("truncated table definition: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn people_def() -> TableDef {
        let mut def = TableDef::new(TableName::new("APP", "people"));
        def.add_column(ColumnDef::new("id", SqlType::Integer).not_null().indexed()).unwrap();
        def.add_column(
            ColumnDef::new("name", SqlType::Varchar)
                .unique()
                .with_default("'unknown'"),
        )
        .unwrap();
        def.add_column(ColumnDef::new("joined", SqlType::Timestamp)).unwrap();
        def.set_immutable();
        def
    }

    #[test]
    fn serialization_round_trips() {
        let def = people_def();
        let back = TableDef::deserialize(&def.serialize()).unwrap();
        assert_eq!(back, def);
        assert!(back.is_immutable());
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let mut def = TableDef::new(TableName::new("APP", "t"));
        def.add_column(ColumnDef::new("a", SqlType::Integer)).unwrap();
        assert!(def.add_column(ColumnDef::new("a", SqlType::Varchar)).is_err());
    }

    #[test]
    #[should_panic(expected = "immutable")]
    fn mutating_a_sealed_definition_panics() {
        let mut def = people_def();
        let _ = def.add_column(ColumnDef::new("x", SqlType::Integer));
    }

    #[test]
    fn column_lookup() {
        let def = people_def();
        assert_eq!(def.find_column("name"), Some(1));
        assert!(def.column_index("missing").is_err());
    }
}
