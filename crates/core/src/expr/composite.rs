use granite_index::{BlindScan, SelectableScheme};
use granite_primitives::RowId;
use granite_value::TypedValue;

use crate::error::Result;
use crate::expr::{RawTableInfo, TableExpr, Variable};
use crate::schema::TableDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeFunction {
    Union,
    Intersect,
    Except,
}

/// UNION / INTERSECT / EXCEPT over sources of identical column shape.
///
/// The composite keeps the first source's definition as its column shape
/// and one row-index list per source; a cell access walks the lists to
/// find the owning source. Distinct variants eliminate duplicates by
/// sorting and uniquing the resolved row tuples, or value tuples when a
/// source has no raw backing.
pub struct CompositeTable<'a> {
    sources: Vec<&'a dyn TableExpr>,
    /// Per source, the rows (in that source's domain) this composite keeps.
    row_lists: Vec<Vec<RowId>>,
    def: TableDef,
}

impl<'a> CompositeTable<'a> {
    pub fn new(
        sources: Vec<&'a dyn TableExpr>,
        function: CompositeFunction,
        all: bool,
    ) -> Result<CompositeTable<'a>> {
        assert!(!sources.is_empty(), "composite over no sources");
        let def = sources[0].table_def().clone();
        for source in &sources[1..] {
            assert_eq!(
                source.column_count(),
                def.column_count(),
                "composite sources must share a column shape"
            );
        }

        let keyed: Vec<Vec<(Vec<u8>, RowId)>> = sources
            .iter()
            .map(|source| keyed_rows(*source))
            .collect::<Result<_>>()?;

        let mut row_lists: Vec<Vec<RowId>> = vec![Vec::new(); sources.len()];
        match (function, all) {
            (CompositeFunction::Union, true) => {
                for (i, rows) in keyed.iter().enumerate() {
                    row_lists[i] = rows.iter().map(|(_, r)| *r).collect();
                }
            }
            (CompositeFunction::Union, false) => {
                let mut seen: Vec<Vec<u8>> = Vec::new();
                for (i, rows) in keyed.iter().enumerate() {
                    for (key, row) in rows {
                        if sorted_insert_if_absent(&mut seen, key) {
                            row_lists[i].push(*row);
                        }
                    }
                }
            }
            (CompositeFunction::Intersect, _) => {
                let mut rest: Vec<Vec<&Vec<u8>>> = keyed[1..]
                    .iter()
                    .map(|rows| {
                        let mut keys: Vec<&Vec<u8>> = rows.iter().map(|(k, _)| k).collect();
                        keys.sort();
                        keys
                    })
                    .collect();
                rest.iter_mut().for_each(|k| k.dedup());
                let mut seen: Vec<Vec<u8>> = Vec::new();
                for (key, row) in &keyed[0] {
                    let everywhere = rest.iter().all(|keys| keys.binary_search(&key).is_ok());
                    if everywhere && (all || sorted_insert_if_absent(&mut seen, key)) {
                        row_lists[0].push(*row);
                    }
                }
            }
            (CompositeFunction::Except, _) => {
                let mut removed: Vec<&Vec<u8>> = keyed[1..].iter().flatten().map(|(k, _)| k).collect();
                removed.sort();
                let mut seen: Vec<Vec<u8>> = Vec::new();
                for (key, row) in &keyed[0] {
                    if removed.binary_search(&key).is_err() && (all || sorted_insert_if_absent(&mut seen, key)) {
                        row_lists[0].push(*row);
                    }
                }
            }
        }

        Ok(CompositeTable {
            sources,
            row_lists,
            def,
        })
    }

    /// The source and source-domain row behind a composite row.
    fn locate(&self, row: RowId) -> (usize, RowId) {
        let mut pos = row.idx();
        for (i, list) in self.row_lists.iter().enumerate() {
            if pos < list.len() {
                return (i, list[pos]);
            }
            pos -= list.len();
        }
        panic!("composite row {row} out of bounds");
    }
}

/// Serialize every row of `source` to a comparable key, pairing it with
/// its row index.
fn keyed_rows(source: &dyn TableExpr) -> Result<Vec<(Vec<u8>, RowId)>> {
    let mut out = Vec::new();
    for row in source.row_enumeration() {
        let mut key = Vec::new();
        for col in 0..source.column_count() {
            source.cell(col, row)?.encode_cell(&mut key)?;
        }
        out.push((key, row));
    }
    Ok(out)
}

fn sorted_insert_if_absent(seen: &mut Vec<Vec<u8>>, key: &Vec<u8>) -> bool {
    match seen.binary_search(key) {
        Ok(_) => false,
        Err(pos) => {
            seen.insert(pos, key.clone());
            true
        }
    }
}

impl TableExpr for CompositeTable<'_> {
    fn column_count(&self) -> usize {
        self.def.column_count()
    }

    fn row_count(&self) -> usize {
        self.row_lists.iter().map(|l| l.len()).sum()
    }

    fn table_def(&self) -> &TableDef {
        &self.def
    }

    fn resolved_variable(&self, col: usize) -> Variable {
        Variable::qualified(self.def.table_name().clone(), self.def.column(col).name.clone())
    }

    fn cell(&self, col: usize, row: RowId) -> Result<TypedValue> {
        let (source, source_row) = self.locate(row);
        self.sources[source].cell(col, source_row)
    }

    fn row_enumeration(&self) -> Vec<RowId> {
        (0..self.row_count()).map(RowId::from).collect()
    }

    fn scheme_for(&self, _col: usize) -> SelectableScheme {
        SelectableScheme::BlindScan(BlindScan::new())
    }

    fn rows_to_base_domain(&self, _col: usize, _rows: Vec<RowId>) -> Result<Vec<RowId>> {
        // A composite row has no single base table behind a column.
        Err(crate::error::TableError::NotFound("composite has no base domain".into()).into())
    }

    fn raw_tuples(&self, _rows: &[RowId]) -> Result<Option<RawTableInfo>> {
        Ok(None)
    }

    fn lock_root(&self, key: i32) {
        for source in &self.sources {
            source.lock_root(key);
        }
    }

    fn unlock_root(&self, key: i32) {
        for source in &self.sources {
            source.unlock_root(key);
        }
    }

    fn has_roots_locked(&self) -> bool {
        self.sources.iter().any(|s| s.has_roots_locked())
    }
}
