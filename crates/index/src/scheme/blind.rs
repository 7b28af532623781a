use granite_primitives::RowId;
use granite_value::TypedValue;

use crate::error::Result;
use crate::range::SelectableRange;
use crate::scheme::SchemeSource;

/// The stateless scheme: no memory, no maintenance cost, every select is a
/// full scan. Intended for small tables and columns that are rarely
/// searched.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlindScan;

impl BlindScan {
    pub fn new() -> BlindScan {
        BlindScan
    }

    /// Stream the table once, keeping rows whose cell satisfies any range.
    /// Matches are binary-inserted into the running result so it stays in
    /// collation order with insertion-order ties.
    pub(crate) fn select_ranges(
        &self,
        source: &dyn SchemeSource,
        ranges: &[SelectableRange],
    ) -> Result<Vec<RowId>> {
        let mut ordered: Vec<(TypedValue, RowId)> = Vec::new();
        for row in source.scheme_rows()? {
            let cell = source.scheme_cell(row)?;
            if ranges.iter().any(|r| r.contains(&cell)) {
                let pos = ordered.partition_point(|(v, _)| v.total_compare(&cell) != std::cmp::Ordering::Greater);
                ordered.insert(pos, (cell, row));
            }
        }
        Ok(ordered.into_iter().map(|(_, row)| row).collect())
    }

    /// The smallest (or largest) value currently in the column.
    pub(crate) fn boundary_value(&self, source: &dyn SchemeSource, first: bool) -> Result<Option<TypedValue>> {
        let mut best: Option<TypedValue> = None;
        for row in source.scheme_rows()? {
            let cell = source.scheme_cell(row)?;
            let replace = match &best {
                None => true,
                Some(current) => {
                    let ord = cell.total_compare(current);
                    if first {
                        ord == std::cmp::Ordering::Less
                    } else {
                        ord == std::cmp::Ordering::Greater
                    }
                }
            };
            if replace {
                best = Some(cell);
            }
        }
        Ok(best)
    }
}
