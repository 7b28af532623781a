use std::cmp::Ordering;

use granite_value::TypedValue;

/// One end point of a [`SelectableRange`].
#[derive(Debug, Clone, PartialEq)]
pub enum RangePoint {
    /// The smallest position in the set (before any value, nulls included).
    FirstInSet,
    /// The largest position in the set.
    LastInSet,
    Value(TypedValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFlag {
    /// Start at the first row holding the value (inclusive).
    FirstValue,
    /// Start just after the last row holding the value (exclusive).
    AfterLastValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFlag {
    /// End at the last row holding the value (inclusive).
    LastValue,
    /// End just before the first row holding the value (exclusive).
    BeforeFirstValue,
}

/// A contiguous run of values selected from one column's collation order.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectableRange {
    pub start_flag: StartFlag,
    pub start: RangePoint,
    pub end_flag: EndFlag,
    pub end: RangePoint,
}

impl SelectableRange {
    /// The whole set, nulls included.
    pub fn full() -> SelectableRange {
        SelectableRange {
            start_flag: StartFlag::FirstValue,
            start: RangePoint::FirstInSet,
            end_flag: EndFlag::LastValue,
            end: RangePoint::LastInSet,
        }
    }

    pub fn new(start_flag: StartFlag, start: RangePoint, end_flag: EndFlag, end: RangePoint) -> SelectableRange {
        SelectableRange {
            start_flag,
            start,
            end_flag,
            end,
        }
    }

    /// Whether `value` falls inside this range under the total value order.
    pub fn contains(&self, value: &TypedValue) -> bool {
        let after_start = match (&self.start, self.start_flag) {
            (RangePoint::FirstInSet, _) => true,
            (RangePoint::LastInSet, _) => false,
            (RangePoint::Value(v), StartFlag::FirstValue) => value.total_compare(v) != Ordering::Less,
            (RangePoint::Value(v), StartFlag::AfterLastValue) => value.total_compare(v) == Ordering::Greater,
        };
        let before_end = match (&self.end, self.end_flag) {
            (RangePoint::LastInSet, _) => true,
            (RangePoint::FirstInSet, _) => false,
            (RangePoint::Value(v), EndFlag::LastValue) => value.total_compare(v) != Ordering::Greater,
            (RangePoint::Value(v), EndFlag::BeforeFirstValue) => value.total_compare(v) == Ordering::Less,
        };
        after_start && before_end
    }
}

/// Predicate operators a range set can be narrowed or widened by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOperator {
    Is,
    IsNot,
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

// Internally ranges are handled as half-open intervals in "edge space":
// every value `v` owns the segment between its left edge (before the first
// row holding `v`) and its right edge (after the last row holding `v`).
// Interval arithmetic on edges is exact, which keeps `intersect` and
// `union` free of the fiddly inclusive/exclusive case analysis.

#[derive(Debug, Clone, PartialEq)]
enum Edge {
    NegInf,
    Left(TypedValue),
    Right(TypedValue),
    PosInf,
}

impl Edge {
    fn cmp_edge(&self, other: &Edge) -> Ordering {
        use Edge::*;
        match (self, other) {
            (NegInf, NegInf) | (PosInf, PosInf) => Ordering::Equal,
            (NegInf, _) => Ordering::Less,
            (_, NegInf) => Ordering::Greater,
            (PosInf, _) => Ordering::Greater,
            (_, PosInf) => Ordering::Less,
            (Left(a), Left(b)) | (Right(a), Right(b)) => a.total_compare(b),
            (Left(a), Right(b)) => match a.total_compare(b) {
                Ordering::Equal => Ordering::Less,
                other => other,
            },
            (Right(a), Left(b)) => match a.total_compare(b) {
                Ordering::Equal => Ordering::Greater,
                other => other,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Interval {
    start: Edge,
    end: Edge,
}

impl Interval {
    fn is_empty(&self) -> bool {
        self.start.cmp_edge(&self.end) != Ordering::Less
    }

    fn from_range(range: &SelectableRange) -> Interval {
        let start = match (&range.start, range.start_flag) {
            (RangePoint::FirstInSet, _) => Edge::NegInf,
            (RangePoint::LastInSet, _) => Edge::PosInf,
            (RangePoint::Value(v), StartFlag::FirstValue) => Edge::Left(v.clone()),
            (RangePoint::Value(v), StartFlag::AfterLastValue) => Edge::Right(v.clone()),
        };
        let end = match (&range.end, range.end_flag) {
            (RangePoint::LastInSet, _) => Edge::PosInf,
            (RangePoint::FirstInSet, _) => Edge::NegInf,
            (RangePoint::Value(v), EndFlag::LastValue) => Edge::Right(v.clone()),
            (RangePoint::Value(v), EndFlag::BeforeFirstValue) => Edge::Left(v.clone()),
        };
        Interval { start, end }
    }

    fn into_range(self) -> SelectableRange {
        let (start_flag, start) = match self.start {
            Edge::NegInf => (StartFlag::FirstValue, RangePoint::FirstInSet),
            Edge::PosInf => (StartFlag::AfterLastValue, RangePoint::LastInSet),
            Edge::Left(v) => (StartFlag::FirstValue, RangePoint::Value(v)),
            Edge::Right(v) => (StartFlag::AfterLastValue, RangePoint::Value(v)),
        };
        let (end_flag, end) = match self.end {
            Edge::NegInf => (EndFlag::BeforeFirstValue, RangePoint::FirstInSet),
            Edge::PosInf => (EndFlag::LastValue, RangePoint::LastInSet),
            Edge::Left(v) => (EndFlag::BeforeFirstValue, RangePoint::Value(v)),
            Edge::Right(v) => (EndFlag::LastValue, RangePoint::Value(v)),
        };
        SelectableRange {
            start_flag,
            start,
            end_flag,
            end,
        }
    }

    fn intersect(&self, other: &Interval) -> Interval {
        let start = if self.start.cmp_edge(&other.start) == Ordering::Less {
            other.start.clone()
        } else {
            self.start.clone()
        };
        let end = if self.end.cmp_edge(&other.end) == Ordering::Greater {
            other.end.clone()
        } else {
            self.end.clone()
        };
        Interval { start, end }
    }
}

/// The intervals a single `op value` predicate selects.
///
/// Comparison against a null value selects nothing (the predicate is
/// unknown for every row) except under `IS` / `IS NOT`, which test nullness
/// itself. The ordering operators exclude nulls by starting after the null
/// run at the bottom of the collation order.
fn operator_intervals(op: RangeOperator, value: &TypedValue) -> Vec<Interval> {
    use RangeOperator::*;
    let after_nulls = || Edge::Right(TypedValue::null());

    if value.is_null() {
        return match op {
            Is => vec![Interval {
                start: Edge::Left(TypedValue::null()),
                end: Edge::Right(TypedValue::null()),
            }],
            IsNot => vec![Interval {
                start: after_nulls(),
                end: Edge::PosInf,
            }],
            // Any comparison with null is unknown for every row.
            _ => Vec::new(),
        };
    }

    match op {
        Is | Equal => vec![Interval {
            start: Edge::Left(value.clone()),
            end: Edge::Right(value.clone()),
        }],
        // `IS NOT v` holds for null rows (`null IS v` is false); `<> v` is
        // unknown for them.
        IsNot => vec![
            Interval {
                start: Edge::NegInf,
                end: Edge::Left(value.clone()),
            },
            Interval {
                start: Edge::Right(value.clone()),
                end: Edge::PosInf,
            },
        ],
        NotEqual => vec![
            Interval {
                start: after_nulls(),
                end: Edge::Left(value.clone()),
            },
            Interval {
                start: Edge::Right(value.clone()),
                end: Edge::PosInf,
            },
        ],
        Greater => vec![Interval {
            start: Edge::Right(value.clone()),
            end: Edge::PosInf,
        }],
        GreaterOrEqual => vec![Interval {
            start: Edge::Left(value.clone()),
            end: Edge::PosInf,
        }],
        Less => vec![Interval {
            start: after_nulls(),
            end: Edge::Left(value.clone()),
        }],
        LessOrEqual => vec![Interval {
            start: after_nulls(),
            end: Edge::Right(value.clone()),
        }],
    }
}

/// A sorted list of disjoint [`SelectableRange`]s over one column,
/// initialized to the full range and narrowed or widened one predicate at a
/// time.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectableRangeSet {
    intervals: Vec<Interval>,
}

impl Default for SelectableRangeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectableRangeSet {
    /// The full range.
    pub fn new() -> SelectableRangeSet {
        SelectableRangeSet {
            intervals: vec![Interval::from_range(&SelectableRange::full())],
        }
    }

    /// The empty set.
    pub fn empty() -> SelectableRangeSet {
        SelectableRangeSet { intervals: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn ranges(&self) -> Vec<SelectableRange> {
        self.intervals.iter().cloned().map(Interval::into_range).collect()
    }

    pub fn from_range(range: SelectableRange) -> SelectableRangeSet {
        let iv = Interval::from_range(&range);
        SelectableRangeSet {
            intervals: if iv.is_empty() { Vec::new() } else { vec![iv] },
        }
    }

    /// Narrow every range by `op value`. Only `NotEqual` and `IsNot` can
    /// split a range in two.
    pub fn intersect(&mut self, op: RangeOperator, value: &TypedValue) {
        let by = operator_intervals(op, value);
        let mut out = Vec::new();
        for current in &self.intervals {
            for piece in &by {
                let cut = current.intersect(piece);
                if !cut.is_empty() {
                    out.push(cut);
                }
            }
        }
        out.sort_by(|a, b| a.start.cmp_edge(&b.start));
        self.intervals = out;
    }

    /// Widen the set by `op value`.
    pub fn union_op(&mut self, op: RangeOperator, value: &TypedValue) {
        let by = operator_intervals(op, value);
        self.merge_in(by);
    }

    /// Merge another set into this one, coalescing overlapping and adjacent
    /// ranges.
    pub fn union(&mut self, other: &SelectableRangeSet) {
        self.merge_in(other.intervals.clone());
    }

    fn merge_in(&mut self, extra: Vec<Interval>) {
        let mut all: Vec<Interval> = self.intervals.drain(..).chain(extra).filter(|iv| !iv.is_empty()).collect();
        all.sort_by(|a, b| a.start.cmp_edge(&b.start));

        let mut merged: Vec<Interval> = Vec::with_capacity(all.len());
        for iv in all {
            match merged.last_mut() {
                Some(last) if iv.start.cmp_edge(&last.end) != Ordering::Greater => {
                    if iv.end.cmp_edge(&last.end) == Ordering::Greater {
                        last.end = iv.end;
                    }
                }
                _ => merged.push(iv),
            }
        }
        self.intervals = merged;
    }

    /// Whether `value` is selected by any range in the set.
    pub fn contains(&self, value: &TypedValue) -> bool {
        self.ranges().iter().any(|r| r.contains(value))
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    struct Step {
        op: RangeOperator,
        value: Option<i64>,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        let ops = prop_oneof![
            Just(RangeOperator::Is),
            Just(RangeOperator::IsNot),
            Just(RangeOperator::Equal),
            Just(RangeOperator::NotEqual),
            Just(RangeOperator::Greater),
            Just(RangeOperator::GreaterOrEqual),
            Just(RangeOperator::Less),
            Just(RangeOperator::LessOrEqual),
        ];
        (ops, proptest::option::of(-8i64..8)).prop_map(|(op, value)| Step { op, value })
    }

    fn model_holds(step: Step, x: Option<i64>) -> bool {
        use RangeOperator::*;
        match (x, step.value) {
            (None, None) => matches!(step.op, Is),
            (None, Some(_)) => matches!(step.op, IsNot),
            (Some(_), None) => matches!(step.op, IsNot),
            (Some(x), Some(v)) => match step.op {
                Is | Equal => x == v,
                IsNot | NotEqual => x != v,
                Greater => x > v,
                GreaterOrEqual => x >= v,
                Less => x < v,
                LessOrEqual => x <= v,
            },
        }
    }

    fn as_value(x: Option<i64>) -> TypedValue {
        match x {
            Some(v) => TypedValue::from_i64(v),
            None => TypedValue::null(),
        }
    }

    proptest! {
        #[test]
        fn intersect_agrees_with_predicate_conjunction(steps in proptest::collection::vec(step_strategy(), 1..6)) {
            let mut set = SelectableRangeSet::new();
            for step in &steps {
                set.intersect(step.op, &as_value(step.value));
            }
            let probes = (-10i64..10).map(Some).chain([None]);
            for x in probes {
                let expect = steps.iter().all(|&s| model_holds(s, x));
                prop_assert_eq!(set.contains(&as_value(x)), expect, "probe {:?} after {:?}", x, steps);
            }
        }

        #[test]
        fn union_agrees_with_predicate_disjunction(steps in proptest::collection::vec(step_strategy(), 1..6)) {
            let mut set = SelectableRangeSet::empty();
            for step in &steps {
                set.union_op(step.op, &as_value(step.value));
            }
            for x in (-10i64..10).map(Some).chain([None]) {
                let expect = steps.iter().any(|&s| model_holds(s, x));
                prop_assert_eq!(set.contains(&as_value(x)), expect, "probe {:?} after {:?}", x, steps);
            }
        }

        #[test]
        fn ranges_stay_sorted_and_disjoint(steps in proptest::collection::vec(step_strategy(), 1..6)) {
            let mut set = SelectableRangeSet::new();
            for (i, step) in steps.iter().enumerate() {
                if i % 2 == 0 {
                    set.intersect(step.op, &as_value(step.value));
                } else {
                    set.union_op(step.op, &as_value(step.value));
                }
            }
            let intervals = &set.intervals;
            for pair in intervals.windows(2) {
                // Strictly separated: the next range starts after the
                // previous one ends (equal edges would have been merged).
                prop_assert_eq!(pair[0].end.cmp_edge(&pair[1].start), Ordering::Less);
            }
            for iv in intervals {
                prop_assert!(!iv.is_empty());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granite_value::TypedValue;
    use pretty_assertions::assert_eq;

    fn int(v: i64) -> TypedValue {
        TypedValue::from_i64(v)
    }

    #[test]
    fn full_range_contains_everything() {
        let set = SelectableRangeSet::new();
        assert!(set.contains(&int(0)));
        assert!(set.contains(&TypedValue::null()));
    }

    #[test]
    fn intersect_narrows() {
        let mut set = SelectableRangeSet::new();
        set.intersect(RangeOperator::Greater, &int(1));
        set.intersect(RangeOperator::LessOrEqual, &int(5));
        assert!(!set.contains(&int(1)));
        assert!(set.contains(&int(2)));
        assert!(set.contains(&int(5)));
        assert!(!set.contains(&int(6)));
        assert!(!set.contains(&TypedValue::null()));
        assert_eq!(set.ranges().len(), 1);
    }

    #[test]
    fn only_not_equal_splits() {
        let mut set = SelectableRangeSet::new();
        set.intersect(RangeOperator::GreaterOrEqual, &int(0));
        assert_eq!(set.ranges().len(), 1);

        set.intersect(RangeOperator::NotEqual, &int(3));
        let ranges = set.ranges();
        assert_eq!(ranges.len(), 2);
        assert!(set.contains(&int(2)));
        assert!(!set.contains(&int(3)));
        assert!(set.contains(&int(4)));
    }

    #[test]
    fn ordering_operators_exclude_nulls() {
        let mut set = SelectableRangeSet::new();
        set.intersect(RangeOperator::Less, &int(10));
        assert!(set.contains(&int(-100)));
        assert!(!set.contains(&TypedValue::null()));
    }

    #[test]
    fn comparisons_with_null_select_nothing() {
        for op in [
            RangeOperator::Equal,
            RangeOperator::Greater,
            RangeOperator::Less,
            RangeOperator::NotEqual,
        ] {
            let mut set = SelectableRangeSet::new();
            set.intersect(op, &TypedValue::null());
            assert!(set.is_empty(), "{op:?} with null must select nothing");
        }
    }

    #[test]
    fn is_null_and_is_not_null() {
        let mut nulls = SelectableRangeSet::new();
        nulls.intersect(RangeOperator::Is, &TypedValue::null());
        assert!(nulls.contains(&TypedValue::null()));
        assert!(!nulls.contains(&int(0)));

        let mut non_nulls = SelectableRangeSet::new();
        non_nulls.intersect(RangeOperator::IsNot, &TypedValue::null());
        assert!(!non_nulls.contains(&TypedValue::null()));
        assert!(non_nulls.contains(&int(0)));
    }

    #[test]
    fn union_coalesces_adjacent_ranges() {
        let mut set = SelectableRangeSet::empty();
        set.union_op(RangeOperator::Equal, &int(3));
        set.union_op(RangeOperator::Greater, &int(3));
        // = 3 and > 3 fuse into >= 3.
        assert_eq!(set.ranges().len(), 1);
        assert!(set.contains(&int(3)));
        assert!(set.contains(&int(100)));
        assert!(!set.contains(&int(2)));
    }

    #[test]
    fn union_of_sets() {
        let mut a = SelectableRangeSet::new();
        a.intersect(RangeOperator::Less, &int(0));
        let mut b = SelectableRangeSet::new();
        b.intersect(RangeOperator::Greater, &int(10));
        a.union(&b);
        assert_eq!(a.ranges().len(), 2);
        assert!(a.contains(&int(-1)));
        assert!(!a.contains(&int(5)));
        assert!(a.contains(&int(11)));
    }

    #[test]
    fn is_not_keeps_null_rows() {
        let mut set = SelectableRangeSet::new();
        set.intersect(RangeOperator::IsNot, &int(4));
        assert!(set.contains(&TypedValue::null()));
        assert!(!set.contains(&int(4)));
        assert!(set.contains(&int(5)));

        let mut ne = SelectableRangeSet::new();
        ne.intersect(RangeOperator::NotEqual, &int(4));
        assert!(!ne.contains(&TypedValue::null()));
    }

    #[test]
    fn intersect_then_complement_is_disjoint() {
        // x in (1, 7] intersected with x <> 4 still rejects 4 and keeps
        // both sides.
        let mut set = SelectableRangeSet::new();
        set.intersect(RangeOperator::Greater, &int(1));
        set.intersect(RangeOperator::LessOrEqual, &int(7));
        set.intersect(RangeOperator::NotEqual, &int(4));
        assert!(set.contains(&int(2)));
        assert!(!set.contains(&int(4)));
        assert!(set.contains(&int(7)));
        assert!(!set.contains(&int(8)));
    }
}
