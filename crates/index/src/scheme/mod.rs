//! Column index schemes.
//!
//! A scheme answers ordered selects over one column of a backing table. The
//! three variants share one contract and differ in cost model:
//!
//! * [`BlindScan`]: no state; every select streams the table.
//! * [`InsertSort`]: a block integer list kept in collation order,
//!   maintained on every insert and remove.
//! * [`Collated`]: a persisted, already-ordered list; binary search only,
//!   never mutated.
//!
//! Every select returns row indices in collation order; rows holding equal
//! values keep their insertion order, which makes multi-column sorts
//! deterministic. Nulls collate before every non-null value.

mod blind;
mod collated;
mod insert_sort;

pub use blind::BlindScan;
pub use collated::Collated;
pub use insert_sort::InsertSort;

use std::cmp::Ordering;

use granite_primitives::RowId;
use granite_store::BlockIntList;
use granite_value::TypedValue;

use crate::error::{Result, SchemeError};
use crate::range::{EndFlag, RangePoint, SelectableRange, StartFlag};

/// Row sets up to this size are materialized (row, value) for ordering;
/// larger sets compare through the source callback on every probe.
pub const ORDER_MATERIALIZE_THRESHOLD: usize = 250_000;

/// The callbacks by which a scheme reads the column it indexes.
pub trait SchemeSource {
    /// Value of the indexed column at `row`.
    fn scheme_cell(&self, row: RowId) -> Result<TypedValue>;

    /// Every row of the backing table, in insertion order.
    fn scheme_rows(&self) -> Result<Vec<RowId>>;
}

/// A column index: one of the three scheme variants behind the shared
/// select contract.
#[derive(Debug, Clone)]
pub enum SelectableScheme {
    BlindScan(BlindScan),
    InsertSort(InsertSort),
    Collated(Collated),
}

impl SelectableScheme {
    /// A copy of this scheme. An immutable copy of an [`InsertSort`] shares
    /// its blocks with the source by reference; that sharing is read-only.
    pub fn copy(&self, immutable: bool) -> SelectableScheme {
        match self {
            SelectableScheme::BlindScan(b) => SelectableScheme::BlindScan(*b),
            SelectableScheme::InsertSort(s) => SelectableScheme::InsertSort(s.copy(immutable)),
            SelectableScheme::Collated(c) => SelectableScheme::Collated(c.clone()),
        }
    }

    pub fn is_immutable(&self) -> bool {
        match self {
            SelectableScheme::BlindScan(_) => false,
            SelectableScheme::InsertSort(s) => s.is_immutable(),
            SelectableScheme::Collated(_) => true,
        }
    }

    /// The ordered row list backing this scheme, if it keeps one.
    pub fn ordered_list(&self) -> Option<&BlockIntList> {
        match self {
            SelectableScheme::BlindScan(_) => None,
            SelectableScheme::InsertSort(s) => Some(s.list()),
            SelectableScheme::Collated(c) => Some(c.list()),
        }
    }

    /// Register `row` with the scheme.
    ///
    /// # Panics
    ///
    /// Panics when the scheme is immutable; that is a programming error.
    pub fn insert(&mut self, source: &dyn SchemeSource, row: RowId) -> Result<()> {
        match self {
            SelectableScheme::BlindScan(_) => Ok(()),
            SelectableScheme::InsertSort(s) => s.insert(source, row),
            SelectableScheme::Collated(_) => panic!("insert into an immutable collated scheme"),
        }
    }

    /// Remove `row` from the scheme.
    ///
    /// # Panics
    ///
    /// Panics when the scheme is immutable, or when `row` was never
    /// inserted; both are programming errors.
    pub fn remove(&mut self, source: &dyn SchemeSource, row: RowId) -> Result<()> {
        match self {
            SelectableScheme::BlindScan(_) => Ok(()),
            SelectableScheme::InsertSort(s) => s.remove(source, row),
            SelectableScheme::Collated(_) => panic!("remove from an immutable collated scheme"),
        }
    }

    /// Rows selected by a set of disjoint, sorted ranges.
    pub fn select_ranges(&self, source: &dyn SchemeSource, ranges: &[SelectableRange]) -> Result<Vec<RowId>> {
        match self {
            SelectableScheme::BlindScan(b) => b.select_ranges(source, ranges),
            SelectableScheme::InsertSort(s) => select_ranges_ordered(s.list(), source, ranges),
            SelectableScheme::Collated(c) => select_ranges_ordered(c.list(), source, ranges),
        }
    }

    pub fn select_range(&self, source: &dyn SchemeSource, range: &SelectableRange) -> Result<Vec<RowId>> {
        self.select_ranges(source, std::slice::from_ref(range))
    }

    pub fn select_all(&self, source: &dyn SchemeSource) -> Result<Vec<RowId>> {
        self.select_range(source, &SelectableRange::full())
    }

    pub fn select_all_non_null(&self, source: &dyn SchemeSource) -> Result<Vec<RowId>> {
        self.select_range(
            source,
            &SelectableRange::new(
                StartFlag::AfterLastValue,
                RangePoint::Value(TypedValue::null()),
                EndFlag::LastValue,
                RangePoint::LastInSet,
            ),
        )
    }

    pub fn select_equal(&self, source: &dyn SchemeSource, value: &TypedValue) -> Result<Vec<RowId>> {
        self.select_range(
            source,
            &SelectableRange::new(
                StartFlag::FirstValue,
                RangePoint::Value(value.clone()),
                EndFlag::LastValue,
                RangePoint::Value(value.clone()),
            ),
        )
    }

    pub fn select_not_equal(&self, source: &dyn SchemeSource, value: &TypedValue) -> Result<Vec<RowId>> {
        self.select_ranges(
            source,
            &[
                SelectableRange::new(
                    StartFlag::AfterLastValue,
                    RangePoint::Value(TypedValue::null()),
                    EndFlag::BeforeFirstValue,
                    RangePoint::Value(value.clone()),
                ),
                SelectableRange::new(
                    StartFlag::AfterLastValue,
                    RangePoint::Value(value.clone()),
                    EndFlag::LastValue,
                    RangePoint::LastInSet,
                ),
            ],
        )
    }

    pub fn select_greater(&self, source: &dyn SchemeSource, value: &TypedValue) -> Result<Vec<RowId>> {
        self.select_range(
            source,
            &SelectableRange::new(
                StartFlag::AfterLastValue,
                RangePoint::Value(value.clone()),
                EndFlag::LastValue,
                RangePoint::LastInSet,
            ),
        )
    }

    pub fn select_greater_or_equal(&self, source: &dyn SchemeSource, value: &TypedValue) -> Result<Vec<RowId>> {
        self.select_range(
            source,
            &SelectableRange::new(
                StartFlag::FirstValue,
                RangePoint::Value(value.clone()),
                EndFlag::LastValue,
                RangePoint::LastInSet,
            ),
        )
    }

    pub fn select_less(&self, source: &dyn SchemeSource, value: &TypedValue) -> Result<Vec<RowId>> {
        self.select_range(
            source,
            &SelectableRange::new(
                StartFlag::AfterLastValue,
                RangePoint::Value(TypedValue::null()),
                EndFlag::BeforeFirstValue,
                RangePoint::Value(value.clone()),
            ),
        )
    }

    pub fn select_less_or_equal(&self, source: &dyn SchemeSource, value: &TypedValue) -> Result<Vec<RowId>> {
        self.select_range(
            source,
            &SelectableRange::new(
                StartFlag::AfterLastValue,
                RangePoint::Value(TypedValue::null()),
                EndFlag::LastValue,
                RangePoint::Value(value.clone()),
            ),
        )
    }

    /// Rows in `[first, second)`. Note the exclusive end; this is not the
    /// SQL BETWEEN, callers translate.
    pub fn select_between(&self, source: &dyn SchemeSource, first: &TypedValue, second: &TypedValue) -> Result<Vec<RowId>> {
        self.select_range(
            source,
            &SelectableRange::new(
                StartFlag::FirstValue,
                RangePoint::Value(first.clone()),
                EndFlag::BeforeFirstValue,
                RangePoint::Value(second.clone()),
            ),
        )
    }

    /// Rows holding the smallest value in the set.
    pub fn select_first(&self, source: &dyn SchemeSource) -> Result<Vec<RowId>> {
        match self.boundary_value(source, true)? {
            Some(v) => self.select_equal(source, &v),
            None => Ok(Vec::new()),
        }
    }

    pub fn select_not_first(&self, source: &dyn SchemeSource) -> Result<Vec<RowId>> {
        match self.boundary_value(source, true)? {
            Some(v) => self.select_range(
                source,
                &SelectableRange::new(
                    StartFlag::AfterLastValue,
                    RangePoint::Value(v),
                    EndFlag::LastValue,
                    RangePoint::LastInSet,
                ),
            ),
            None => Ok(Vec::new()),
        }
    }

    /// Rows holding the largest value in the set.
    pub fn select_last(&self, source: &dyn SchemeSource) -> Result<Vec<RowId>> {
        match self.boundary_value(source, false)? {
            Some(v) => self.select_equal(source, &v),
            None => Ok(Vec::new()),
        }
    }

    pub fn select_not_last(&self, source: &dyn SchemeSource) -> Result<Vec<RowId>> {
        match self.boundary_value(source, false)? {
            Some(v) => self.select_range(
                source,
                &SelectableRange::new(
                    StartFlag::FirstValue,
                    RangePoint::FirstInSet,
                    EndFlag::BeforeFirstValue,
                    RangePoint::Value(v),
                ),
            ),
            None => Ok(Vec::new()),
        }
    }

    fn boundary_value(&self, source: &dyn SchemeSource, first: bool) -> Result<Option<TypedValue>> {
        match self {
            SelectableScheme::BlindScan(b) => b.boundary_value(source, first),
            SelectableScheme::InsertSort(s) => ordered_boundary(s.list(), source, first),
            SelectableScheme::Collated(c) => ordered_boundary(c.list(), source, first),
        }
    }

    /// Reorder `rows` by this scheme's collation, keeping the given order
    /// for equal values.
    pub fn internal_order_index_set(&self, source: &dyn SchemeSource, rows: Vec<RowId>) -> Result<Vec<RowId>> {
        order_by_source(source, rows)
    }
}

fn ordered_boundary(list: &BlockIntList, source: &dyn SchemeSource, first: bool) -> Result<Option<TypedValue>> {
    if list.is_empty() {
        return Ok(None);
    }
    let pos = if first { 0 } else { list.len() - 1 };
    source.scheme_cell(RowId(list.get(pos))).map(Some)
}

/// Reorder a row set by its column values, stable over the incoming order.
pub(crate) fn order_by_source(source: &dyn SchemeSource, rows: Vec<RowId>) -> Result<Vec<RowId>> {
    if rows.len() <= ORDER_MATERIALIZE_THRESHOLD {
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            keyed.push((source.scheme_cell(row)?, row));
        }
        keyed.sort_by(|a, b| a.0.total_compare(&b.0));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    } else {
        let mut rows = rows;
        let mut first_err: Option<SchemeError> = None;
        rows.sort_by(|&a, &b| {
            let left = source.scheme_cell(a);
            let right = source.scheme_cell(b);
            match (left, right) {
                (Ok(l), Ok(r)) => l.total_compare(&r),
                (Err(e), _) | (_, Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                    Ordering::Equal
                }
            }
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(rows),
        }
    }
}

/// Binary-search position mapping over an ordered row list.
fn lower_bound_value(list: &BlockIntList, source: &dyn SchemeSource, value: &TypedValue) -> Result<usize> {
    let mut err = None;
    let pos = list.lower_bound_by(|row| match source.scheme_cell(RowId(row)) {
        Ok(cell) => cell.total_compare(value),
        Err(e) => {
            err.get_or_insert(e);
            Ordering::Equal
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(pos),
    }
}

fn upper_bound_value(list: &BlockIntList, source: &dyn SchemeSource, value: &TypedValue) -> Result<usize> {
    let mut err = None;
    let pos = list.upper_bound_by(|row| match source.scheme_cell(RowId(row)) {
        Ok(cell) => cell.total_compare(value),
        Err(e) => {
            err.get_or_insert(e);
            Ordering::Equal
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(pos),
    }
}

fn range_positions(
    list: &BlockIntList,
    source: &dyn SchemeSource,
    range: &SelectableRange,
) -> Result<(usize, usize)> {
    let start = match (&range.start, range.start_flag) {
        (RangePoint::FirstInSet, _) => 0,
        (RangePoint::LastInSet, _) => list.len(),
        (RangePoint::Value(v), StartFlag::FirstValue) => lower_bound_value(list, source, v)?,
        (RangePoint::Value(v), StartFlag::AfterLastValue) => upper_bound_value(list, source, v)?,
    };
    let end = match (&range.end, range.end_flag) {
        (RangePoint::LastInSet, _) => list.len(),
        (RangePoint::FirstInSet, _) => 0,
        (RangePoint::Value(v), EndFlag::LastValue) => upper_bound_value(list, source, v)?,
        (RangePoint::Value(v), EndFlag::BeforeFirstValue) => lower_bound_value(list, source, v)?,
    };
    Ok((start, end.max(start)))
}

fn select_ranges_ordered(
    list: &BlockIntList,
    source: &dyn SchemeSource,
    ranges: &[SelectableRange],
) -> Result<Vec<RowId>> {
    let mut out = Vec::new();
    for range in ranges {
        let (start, end) = range_positions(list, source, range)?;
        for pos in start..end {
            out.push(RowId(list.get(pos)));
        }
    }
    Ok(out)
}

/// In-memory sources for scheme tests; also used by neighbouring modules'
/// tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) struct VecSource {
        pub cells: Vec<TypedValue>,
    }

    impl VecSource {
        pub fn ints(values: impl IntoIterator<Item = i64>) -> VecSource {
            VecSource {
                cells: values.into_iter().map(TypedValue::from_i64).collect(),
            }
        }

        pub fn strings<'a>(values: impl IntoIterator<Item = &'a str>) -> VecSource {
            VecSource {
                cells: values.into_iter().map(TypedValue::string).collect(),
            }
        }

        pub fn with_null(mut self, at: usize) -> VecSource {
            self.cells[at] = TypedValue::null();
            self
        }
    }

    impl SchemeSource for VecSource {
        fn scheme_cell(&self, row: RowId) -> Result<TypedValue> {
            self.cells
                .get(row.idx())
                .cloned()
                .ok_or_else(|| SchemeError::Cell(row, "row out of bounds".into()))
        }

        fn scheme_rows(&self) -> Result<Vec<RowId>> {
            Ok((0..self.cells.len()).map(RowId::from).collect())
        }
    }

    /// Build an [`InsertSort`] scheme over every row of `src`.
    pub(crate) fn insert_sort_over(src: &VecSource) -> SelectableScheme {
        let mut scheme = InsertSort::new();
        for row in src.scheme_rows().unwrap() {
            scheme.insert(src, row).unwrap();
        }
        SelectableScheme::InsertSort(scheme)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{insert_sort_over, VecSource};
    use super::*;
    use pretty_assertions::assert_eq;

    fn rows(ids: impl IntoIterator<Item = u32>) -> Vec<RowId> {
        ids.into_iter().map(RowId).collect()
    }

    fn schemes_under_test(src: &VecSource) -> Vec<SelectableScheme> {
        let sorted = insert_sort_over(src);
        let collated = SelectableScheme::Collated(Collated::from_list(sorted.ordered_list().unwrap().clone()));
        vec![SelectableScheme::BlindScan(BlindScan::new()), sorted, collated]
    }

    #[test]
    fn select_greater_orders_by_value() {
        // Scenario: t(a INT) with rows {1},{2},{3}; a > 1 selects 2 and 3.
        let src = VecSource::ints([1, 2, 3]);
        for scheme in schemes_under_test(&src) {
            assert_eq!(scheme.select_greater(&src, &TypedValue::from_i64(1)).unwrap(), rows([1, 2]));
        }
    }

    #[test]
    fn results_come_back_in_collation_order() {
        let src = VecSource::ints([30, 10, 20, 10]);
        for scheme in schemes_under_test(&src) {
            assert_eq!(scheme.select_all(&src).unwrap(), rows([1, 3, 2, 0]));
            // Ties (the two 10s) keep insertion order.
            assert_eq!(scheme.select_equal(&src, &TypedValue::from_i64(10)).unwrap(), rows([1, 3]));
        }
    }

    #[test]
    fn equal_not_equal_and_nulls_partition_the_table() {
        let src = VecSource::ints([5, 7, 5, 9]).with_null(1);
        let v = TypedValue::from_i64(5);
        for scheme in schemes_under_test(&src) {
            let eq = scheme.select_equal(&src, &v).unwrap();
            let ne = scheme.select_not_equal(&src, &v).unwrap();
            let all = scheme.select_all(&src).unwrap();
            let non_null = scheme.select_all_non_null(&src).unwrap();

            assert_eq!(eq, rows([0, 2]));
            assert_eq!(ne, rows([3]));
            assert_eq!(non_null.len() + 1, all.len());
            let mut merged: Vec<RowId> = eq.iter().chain(&ne).copied().collect();
            merged.push(RowId(1));
            merged.sort_unstable();
            let mut sorted_all = all.clone();
            sorted_all.sort_unstable();
            assert_eq!(merged, sorted_all);
        }
    }

    #[test]
    fn nulls_sort_first() {
        let src = VecSource::ints([3, 1, 2]).with_null(2);
        for scheme in schemes_under_test(&src) {
            assert_eq!(scheme.select_all(&src).unwrap(), rows([2, 1, 0]));
            assert_eq!(scheme.select_all_non_null(&src).unwrap(), rows([1, 0]));
            assert_eq!(scheme.select_less(&src, &TypedValue::from_i64(3)).unwrap(), rows([1]));
        }
    }

    #[test]
    fn between_is_half_open() {
        let src = VecSource::ints([1, 2, 3, 4]);
        for scheme in schemes_under_test(&src) {
            let picked = scheme
                .select_between(&src, &TypedValue::from_i64(2), &TypedValue::from_i64(4))
                .unwrap();
            assert_eq!(picked, rows([1, 2]));
        }
    }

    #[test]
    fn first_and_last_groups() {
        let src = VecSource::ints([2, 1, 3, 1]);
        for scheme in schemes_under_test(&src) {
            assert_eq!(scheme.select_first(&src).unwrap(), rows([1, 3]));
            assert_eq!(scheme.select_not_first(&src).unwrap(), rows([0, 2]));
            assert_eq!(scheme.select_last(&src).unwrap(), rows([2]));
            assert_eq!(scheme.select_not_last(&src).unwrap(), rows([1, 3, 0]));
        }
    }

    #[test]
    fn select_range_is_ascending_and_duplicate_free() {
        let src = VecSource::ints([4, 4, 2, 8, 6, 2]);
        for scheme in schemes_under_test(&src) {
            let got = scheme
                .select_ranges(
                    &src,
                    &[
                        SelectableRange::new(
                            StartFlag::FirstValue,
                            RangePoint::Value(TypedValue::from_i64(2)),
                            EndFlag::LastValue,
                            RangePoint::Value(TypedValue::from_i64(4)),
                        ),
                        SelectableRange::new(
                            StartFlag::FirstValue,
                            RangePoint::Value(TypedValue::from_i64(8)),
                            EndFlag::LastValue,
                            RangePoint::LastInSet,
                        ),
                    ],
                )
                .unwrap();
            assert_eq!(got, rows([2, 5, 0, 1, 3]));
            let mut dedup = got.clone();
            dedup.dedup();
            assert_eq!(dedup, got);
        }
    }

    #[test]
    fn internal_order_respects_collation() {
        let src = VecSource::ints([50, 20, 40, 10]);
        for scheme in schemes_under_test(&src) {
            let ordered = scheme
                .internal_order_index_set(&src, rows([0, 1, 2, 3]))
                .unwrap();
            assert_eq!(ordered, rows([3, 1, 2, 0]));
        }
    }

    #[test]
    fn remove_keeps_order() {
        let src = VecSource::ints([5, 3, 9, 3]);
        let mut scheme = insert_sort_over(&src);
        scheme.remove(&src, RowId(1)).unwrap();
        assert_eq!(scheme.select_all(&src).unwrap(), rows([3, 0, 2]));
    }

    #[test]
    #[should_panic(expected = "immutable")]
    fn mutating_an_immutable_scheme_panics() {
        let src = VecSource::ints([1, 2]);
        let scheme = insert_sort_over(&src);
        let mut frozen = scheme.copy(true);
        let _ = frozen.insert(&src, RowId(0));
    }
}
