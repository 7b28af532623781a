use std::io::{Cursor, Read};
use std::sync::Arc;

use granite_store::StoreError;

use crate::catalog::{cell_binary, cell_string, SystemTableReader, TableBackedCache};
use crate::error::{DBError, Result, TableError};
use crate::events::CommitEventBus;
use crate::schema::{ColumnDef, TableDef, TableName};

/// An opaque query plan node. Plan construction and execution live in the
/// statement layer; the core only stores and revives serialized plans.
pub trait QueryPlanNode: Send {}

/// Decodes the plan bytes a view row carries. Installed by the statement
/// layer.
pub trait QueryPlanCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn QueryPlanNode>>;
}

/// The deserialized definition a view row carries: the column shape plus
/// the serialized plan tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDef {
    pub columns: Vec<ColumnDef>,
    pub plan: Vec<u8>,
}

impl ViewDef {
    /// Framing: the column shape reuses the table-definition blob under a
    /// synthetic name, followed by the raw plan bytes.
    pub fn serialize(&self, name: &TableName) -> Vec<u8> {
        let mut def = TableDef::new(name.clone());
        for column in &self.columns {
            def.add_column(column.clone()).expect("view columns are unique");
        }
        let shape = def.serialize();
        let mut out = Vec::with_capacity(8 + shape.len() + self.plan.len());
        out.extend_from_slice(&(shape.len() as u32).to_be_bytes());
        out.extend_from_slice(&shape);
        out.extend_from_slice(&self.plan);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<ViewDef> {
        let mut cursor = Cursor::new(bytes);
        let mut len_buf = [0u8; 4];
        cursor
            .read_exact(&mut len_buf)
            .map_err(|e| DBError::Store(StoreError::Corrupt(format!("view definition header: {e}"))))?;
        let shape_len = u32::from_be_bytes(len_buf) as usize;
        let mut shape = vec![0u8; shape_len];
        cursor
            .read_exact(&mut shape)
            .map_err(|e| DBError::Store(StoreError::Corrupt(format!("view definition shape: {e}"))))?;
        let def = TableDef::deserialize(&shape)?;
        let mut plan = Vec::new();
        cursor
            .read_to_end(&mut plan)
            .map_err(|e| DBError::Store(StoreError::Corrupt(format!("view definition plan: {e}"))))?;
        Ok(ViewDef {
            columns: def.columns().to_vec(),
            plan,
        })
    }
}

/// One row of `SYS_VIEW`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRow {
    pub schema: String,
    pub name: String,
    pub query: Vec<u8>,
    pub view_def: Vec<u8>,
    pub owner: String,
}

/// Serves view definitions from `SYS_VIEW`, deserializing a fresh plan on
/// every request so callers never share plan state.
pub struct ViewManager {
    cache: TableBackedCache<Vec<ViewRow>>,
    reader: Arc<dyn SystemTableReader>,
    codec: Option<Arc<dyn QueryPlanCodec>>,
}

impl ViewManager {
    pub fn attach(
        bus: &CommitEventBus,
        connection: u64,
        reader: Arc<dyn SystemTableReader>,
        codec: Option<Arc<dyn QueryPlanCodec>>,
    ) -> ViewManager {
        ViewManager {
            cache: TableBackedCache::attach(bus, crate::catalog::view_table(), connection),
            reader,
            codec,
        }
    }

    fn view_rows(&self) -> Result<Vec<ViewRow>> {
        let reader = &self.reader;
        let (rows, _) = self.cache.get_or_build(|| {
            let raw = reader.read_rows(&crate::catalog::view_table())?;
            Ok(raw
                .iter()
                .map(|cells| ViewRow {
                    schema: cell_string(cells, 0),
                    name: cell_string(cells, 1),
                    query: cell_binary(cells, 2),
                    view_def: cell_binary(cells, 3),
                    owner: cell_string(cells, 4),
                })
                .collect())
        })?;
        Ok(rows)
    }

    pub fn view_exists(&self, name: &TableName) -> Result<bool> {
        Ok(self
            .view_rows()?
            .iter()
            .any(|v| v.schema == name.schema && v.name == name.name))
    }

    /// The view's definition, freshly deserialized.
    pub fn view_definition(&self, name: &TableName) -> Result<ViewDef> {
        let rows = self.view_rows()?;
        let row = rows
            .iter()
            .find(|v| v.schema == name.schema && v.name == name.name)
            .ok_or_else(|| TableError::NotFound(name.to_string()))?;
        ViewDef::deserialize(&row.view_def)
    }

    /// A fresh plan tree for the view, decoded through the installed
    /// codec.
    pub fn create_view_query_plan(&self, name: &TableName) -> Result<Box<dyn QueryPlanNode>> {
        let def = self.view_definition(name)?;
        let codec = self
            .codec
            .as_ref()
            .ok_or_else(|| DBError::Other(anyhow::anyhow!("no query plan codec installed")))?;
        codec.decode(&def.plan)
    }

    pub fn flush_count(&self) -> u64 {
        self.cache.flush_count()
    }

    pub fn detach(&self, bus: &CommitEventBus) {
        self.cache.detach(bus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granite_value::SqlType;
    use pretty_assertions::assert_eq;

    #[test]
    fn view_def_round_trips() {
        let def = ViewDef {
            columns: vec![
                ColumnDef::new("id", SqlType::Integer).not_null(),
                ColumnDef::new("name", SqlType::Varchar),
            ],
            plan: vec![9, 8, 7, 6],
        };
        let name = TableName::new("APP", "people_view");
        let back = ViewDef::deserialize(&def.serialize(&name)).unwrap();
        assert_eq!(back, def);
    }
}
