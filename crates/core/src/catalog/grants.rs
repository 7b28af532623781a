use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::catalog::{cell_bool, cell_i64, cell_string, SystemTableReader, TableBackedCache};
use crate::error::Result;
use crate::events::CommitEventBus;

/// The grantee standing for every user.
pub const PUBLIC_USER: &str = "@PUBLIC";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Privileges: u32 {
        const SELECT     = 0x001;
        const INSERT     = 0x002;
        const UPDATE     = 0x004;
        const DELETE     = 0x008;
        const REFERENCES = 0x010;
        const USAGE      = 0x020;
        const ALTER      = 0x040;
        const DROP       = 0x080;
        const LIST       = 0x100;
    }
}

/// What kind of object a grant addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantObject {
    Table,
    Schema,
}

impl GrantObject {
    pub fn code(self) -> i64 {
        match self {
            GrantObject::Table => 1,
            GrantObject::Schema => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<GrantObject> {
        match code {
            1 => Some(GrantObject::Table),
            2 => Some(GrantObject::Schema),
            _ => None,
        }
    }
}

/// One row of `SYS_GRANTS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRow {
    pub privileges: Privileges,
    pub object: GrantObject,
    /// The object's name, e.g. `APP.people` for a table grant.
    pub param: String,
    pub grantee: String,
    pub grant_option: bool,
    pub granter: String,
}

/// Answers privilege lookups from `SYS_GRANTS`, with a per-key privilege
/// cache on top of the table-backed row list.
pub struct GrantManager {
    cache: TableBackedCache<Vec<GrantRow>>,
    reader: Arc<dyn SystemTableReader>,
    privilege_cache: Mutex<HashMap<(GrantObject, String, String), Privileges>>,
}

impl GrantManager {
    pub fn attach(bus: &CommitEventBus, connection: u64, reader: Arc<dyn SystemTableReader>) -> GrantManager {
        GrantManager {
            cache: TableBackedCache::attach(bus, crate::catalog::grants_table(), connection),
            reader,
            privilege_cache: Mutex::new(HashMap::new()),
        }
    }

    fn grant_rows(&self) -> Result<Vec<GrantRow>> {
        let reader = &self.reader;
        let (rows, rebuilt) = self.cache.get_or_build(|| {
            let raw = reader.read_rows(&crate::catalog::grants_table())?;
            Ok(raw
                .iter()
                .filter_map(|cells| {
                    Some(GrantRow {
                        privileges: Privileges::from_bits_truncate(cell_i64(cells, 0) as u32),
                        object: GrantObject::from_code(cell_i64(cells, 1))?,
                        param: cell_string(cells, 2),
                        grantee: cell_string(cells, 3),
                        grant_option: cell_bool(cells, 4),
                        granter: cell_string(cells, 5),
                    })
                })
                .collect())
        })?;
        if rebuilt {
            self.privilege_cache.lock().clear();
        }
        Ok(rows)
    }

    /// The privileges `user` holds on `(object, param)`: grants addressed
    /// to the user merged with grants addressed to `@PUBLIC`.
    pub fn user_grants(&self, object: GrantObject, param: &str, user: &str) -> Result<Privileges> {
        let key = (object, param.to_owned(), user.to_owned());
        if let Some(&hit) = self.privilege_cache.lock().get(&key) {
            return Ok(hit);
        }
        let rows = self.grant_rows()?;
        let mut privileges = Privileges::empty();
        for row in rows.iter().filter(|r| r.object == object && r.param == param) {
            if row.grantee == user || row.grantee == PUBLIC_USER {
                privileges |= row.privileges;
            }
        }
        self.privilege_cache.lock().insert(key, privileges);
        Ok(privileges)
    }

    /// Like [`GrantManager::user_grants`] but restricted to grants the
    /// user may pass on.
    pub fn user_grant_options(&self, object: GrantObject, param: &str, user: &str) -> Result<Privileges> {
        let rows = self.grant_rows()?;
        let mut privileges = Privileges::empty();
        for row in rows.iter().filter(|r| r.object == object && r.param == param && r.grant_option) {
            if row.grantee == user || row.grantee == PUBLIC_USER {
                privileges |= row.privileges;
            }
        }
        Ok(privileges)
    }

    pub fn flush_count(&self) -> u64 {
        self.cache.flush_count()
    }

    pub fn detach(&self, bus: &CommitEventBus) {
        self.cache.detach(bus);
    }
}
