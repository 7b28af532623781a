//! Catalog managers: triggers, grants and views.
//!
//! Each manager keeps an in-memory list rebuilt from a system catalog
//! table, held in a [`TableBackedCache`] whose invalidation is driven by
//! the conglomerate's commit event stream. The managers never hold a
//! reference back into the connection; they read catalog rows through the
//! [`SystemTableReader`] they were attached with.

mod cache;
mod grants;
mod triggers;
mod views;

pub use cache::TableBackedCache;
pub use grants::{GrantManager, GrantObject, GrantRow, Privileges, PUBLIC_USER};
pub use triggers::{OldNewState, ProcedureInvoker, TriggerEventMask, TriggerInfo, TriggerManager};
pub use views::{QueryPlanCodec, QueryPlanNode, ViewDef, ViewManager, ViewRow};

use std::sync::Arc;

use granite_value::{SqlType, TypedValue};

use crate::conglomerate::Conglomerate;
use crate::error::Result;
use crate::schema::{ColumnDef, TableDef, TableName};

pub const SYSTEM_SCHEMA: &str = "SYS_INFO";

pub fn trigger_table() -> TableName {
    TableName::new(SYSTEM_SCHEMA, "SYS_DATA_TRIGGER")
}

pub fn grants_table() -> TableName {
    TableName::new(SYSTEM_SCHEMA, "SYS_GRANTS")
}

pub fn view_table() -> TableName {
    TableName::new(SYSTEM_SCHEMA, "SYS_VIEW")
}

/// Reads whole rows out of a system catalog table. Implemented over the
/// conglomerate for normal operation; tests may substitute fixtures.
pub trait SystemTableReader: Send + Sync {
    fn read_rows(&self, table: &TableName) -> Result<Vec<Vec<TypedValue>>>;
}

/// The standard reader: one fresh transaction per catalog read.
pub struct ConglomerateReader {
    conglomerate: Conglomerate,
}

impl ConglomerateReader {
    pub fn new(conglomerate: Conglomerate) -> Arc<ConglomerateReader> {
        Arc::new(ConglomerateReader { conglomerate })
    }
}

impl SystemTableReader for ConglomerateReader {
    fn read_rows(&self, table: &TableName) -> Result<Vec<Vec<TypedValue>>> {
        let mut tx = self.conglomerate.begin_transaction();
        let id = tx.open_table(table)?;
        let def = tx.table_def(id)?;
        let mut out = Vec::new();
        for row in tx.visible_rows(id)? {
            let mut cells = Vec::with_capacity(def.column_count());
            for col in 0..def.column_count() {
                cells.push(tx.cell(id, col, row)?);
            }
            out.push(cells);
        }
        tx.rollback();
        Ok(out)
    }
}

/// Create the three system catalog tables if they do not exist yet.
pub fn ensure_system_tables(conglomerate: &Conglomerate) -> Result<()> {
    if !conglomerate.table_exists(&trigger_table()) {
        let mut def = TableDef::new(trigger_table());
        def.add_column(ColumnDef::new("schema", SqlType::Varchar).not_null())?;
        def.add_column(ColumnDef::new("name", SqlType::Varchar).not_null().indexed())?;
        def.add_column(ColumnDef::new("type", SqlType::Integer).not_null())?;
        def.add_column(ColumnDef::new("on_object", SqlType::Varchar).not_null().indexed())?;
        def.add_column(ColumnDef::new("action", SqlType::Varchar).not_null())?;
        def.add_column(ColumnDef::new("misc", SqlType::Varchar))?;
        def.add_column(ColumnDef::new("username", SqlType::Varchar).not_null())?;
        conglomerate.create_table(def)?;
    }
    if !conglomerate.table_exists(&grants_table()) {
        let mut def = TableDef::new(grants_table());
        def.add_column(ColumnDef::new("priv_bit", SqlType::Integer).not_null())?;
        def.add_column(ColumnDef::new("object", SqlType::Integer).not_null())?;
        def.add_column(ColumnDef::new("param", SqlType::Varchar).not_null().indexed())?;
        def.add_column(ColumnDef::new("grantee", SqlType::Varchar).not_null().indexed())?;
        def.add_column(ColumnDef::new("grant_option", SqlType::Boolean).not_null())?;
        def.add_column(ColumnDef::new("granter", SqlType::Varchar).not_null())?;
        conglomerate.create_table(def)?;
    }
    if !conglomerate.table_exists(&view_table()) {
        let mut def = TableDef::new(view_table());
        def.add_column(ColumnDef::new("schema", SqlType::Varchar).not_null())?;
        def.add_column(ColumnDef::new("name", SqlType::Varchar).not_null().indexed())?;
        def.add_column(ColumnDef::new("query", SqlType::Binary).not_null())?;
        def.add_column(ColumnDef::new("data", SqlType::Binary).not_null())?;
        def.add_column(ColumnDef::new("username", SqlType::Varchar).not_null())?;
        conglomerate.create_table(def)?;
    }
    Ok(())
}

pub(crate) fn cell_string(cells: &[TypedValue], col: usize) -> String {
    match cells.get(col) {
        Some(TypedValue::String(s)) => s.text.clone(),
        _ => String::new(),
    }
}

pub(crate) fn cell_i64(cells: &[TypedValue], col: usize) -> i64 {
    match cells.get(col) {
        Some(TypedValue::Numeric(n)) => n.to_i64().unwrap_or(0),
        _ => 0,
    }
}

pub(crate) fn cell_bool(cells: &[TypedValue], col: usize) -> bool {
    matches!(cells.get(col), Some(TypedValue::Boolean(true)))
}

pub(crate) fn cell_binary(cells: &[TypedValue], col: usize) -> Vec<u8> {
    match cells.get(col) {
        Some(TypedValue::Binary(b)) => b.clone(),
        _ => Vec::new(),
    }
}
