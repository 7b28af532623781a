use std::sync::Arc;

use bitflags::bitflags;
use granite_primitives::RowId;
use log::debug;
use parking_lot::Mutex;

use crate::catalog::{cell_i64, cell_string, SystemTableReader, TableBackedCache};
use crate::error::Result;
use crate::events::CommitEventBus;
use crate::schema::TableName;

bitflags! {
    /// Which events a trigger fires on: a timing bit combined with one or
    /// more operation bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TriggerEventMask: u32 {
        const INSERT = 0x001;
        const DELETE = 0x002;
        const UPDATE = 0x004;
        const BEFORE = 0x010;
        const AFTER  = 0x020;
    }
}

/// One row of `SYS_DATA_TRIGGER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerInfo {
    pub schema: String,
    pub name: String,
    pub event_mask: TriggerEventMask,
    /// The object the trigger watches, e.g. `T:APP.people` for a table.
    pub on_object: String,
    pub procedure_name: String,
    pub params: Vec<String>,
    pub owner: String,
}

/// The OLD/NEW row state visible to a firing trigger procedure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OldNewState {
    pub table: Option<TableName>,
    pub old_row: Option<RowId>,
    pub new_row: Option<RowId>,
}

/// Invokes a stored procedure on behalf of a trigger. Procedure resolution
/// and execution live outside the storage core.
pub trait ProcedureInvoker: Send + Sync {
    fn invoke(&self, procedure: &str, params: &[String], state: &OldNewState) -> Result<()>;
}

/// Selects and fires the triggers watching a table, with the trigger list
/// cached against `SYS_DATA_TRIGGER`.
pub struct TriggerManager {
    cache: TableBackedCache<Vec<TriggerInfo>>,
    reader: Arc<dyn SystemTableReader>,
    invoker: Arc<dyn ProcedureInvoker>,
    old_new: Mutex<OldNewState>,
}

impl TriggerManager {
    pub fn attach(
        bus: &CommitEventBus,
        connection: u64,
        reader: Arc<dyn SystemTableReader>,
        invoker: Arc<dyn ProcedureInvoker>,
    ) -> TriggerManager {
        TriggerManager {
            cache: TableBackedCache::attach(bus, crate::catalog::trigger_table(), connection),
            reader,
            invoker,
            old_new: Mutex::new(OldNewState::default()),
        }
    }

    fn trigger_list(&self) -> Result<Vec<TriggerInfo>> {
        let reader = &self.reader;
        let (list, rebuilt) = self.cache.get_or_build(|| {
            let rows = reader.read_rows(&crate::catalog::trigger_table())?;
            Ok(rows
                .iter()
                .map(|cells| TriggerInfo {
                    schema: cell_string(cells, 0),
                    name: cell_string(cells, 1),
                    event_mask: TriggerEventMask::from_bits_truncate(cell_i64(cells, 2) as u32),
                    on_object: cell_string(cells, 3),
                    procedure_name: cell_string(cells, 4),
                    params: split_params(&cell_string(cells, 5)),
                    owner: cell_string(cells, 6),
                })
                .collect())
        })?;
        if rebuilt {
            debug!("trigger list rebuilt: {} triggers", list.len());
        }
        Ok(list)
    }

    pub fn flush_count(&self) -> u64 {
        self.cache.flush_count()
    }

    /// Fire every trigger watching `table` whose mask matches `event`.
    ///
    /// The OLD/NEW state is set for the duration of each invocation and
    /// restored on every exit path, including a failing procedure.
    pub fn perform_trigger_action(
        &self,
        table: &TableName,
        event: TriggerEventMask,
        old_row: Option<RowId>,
        new_row: Option<RowId>,
    ) -> Result<()> {
        let key = format!("T:{table}");
        let matched: Vec<TriggerInfo> = self
            .trigger_list()?
            .into_iter()
            .filter(|t| t.on_object == key && mask_matches(t.event_mask, event))
            .collect();

        for trigger in matched {
            let saved = {
                let mut state = self.old_new.lock();
                let saved = state.clone();
                *state = OldNewState {
                    table: Some(table.clone()),
                    old_row,
                    new_row,
                };
                saved
            };
            let state_now = self.old_new.lock().clone();
            let outcome = self.invoker.invoke(&trigger.procedure_name, &trigger.params, &state_now);
            *self.old_new.lock() = saved;
            outcome?;
        }
        Ok(())
    }

    /// The OLD/NEW state of the trigger currently firing, if any.
    pub fn old_new_state(&self) -> OldNewState {
        self.old_new.lock().clone()
    }

    pub fn detach(&self, bus: &CommitEventBus) {
        self.cache.detach(bus);
    }
}

/// A trigger fires when its timing bit and at least one operation bit of
/// the actual event are both present in its mask.
fn mask_matches(mask: TriggerEventMask, event: TriggerEventMask) -> bool {
    let timing = TriggerEventMask::BEFORE | TriggerEventMask::AFTER;
    let ops = TriggerEventMask::INSERT | TriggerEventMask::DELETE | TriggerEventMask::UPDATE;
    mask.intersection(timing).intersects(event) && mask.intersection(ops).intersects(event)
}

fn split_params(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        Vec::new()
    } else {
        raw.split(',').map(|p| p.trim().to_owned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_matching() {
        let after_insert = TriggerEventMask::AFTER | TriggerEventMask::INSERT;
        assert!(mask_matches(after_insert, TriggerEventMask::AFTER | TriggerEventMask::INSERT));
        assert!(!mask_matches(after_insert, TriggerEventMask::BEFORE | TriggerEventMask::INSERT));
        assert!(!mask_matches(after_insert, TriggerEventMask::AFTER | TriggerEventMask::DELETE));

        let any_after = TriggerEventMask::AFTER
            | TriggerEventMask::INSERT
            | TriggerEventMask::DELETE
            | TriggerEventMask::UPDATE;
        assert!(mask_matches(any_after, TriggerEventMask::AFTER | TriggerEventMask::UPDATE));
    }

    #[test]
    fn params_split() {
        assert_eq!(split_params(""), Vec::<String>::new());
        assert_eq!(split_params("a, b,c"), vec!["a", "b", "c"]);
    }
}
