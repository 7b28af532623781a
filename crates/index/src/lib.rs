//! Column indexing for granite: selectable schemes, range sets derived from
//! predicates, LIKE pattern search with pre-pattern range bounds, and the
//! regular-expression bridge.

pub mod error;
pub mod pattern;
pub mod range;
pub mod regex_bridge;
pub mod scheme;

pub use error::{Result, SchemeError};
pub use range::{EndFlag, RangeOperator, RangePoint, SelectableRange, SelectableRangeSet, StartFlag};
pub use regex_bridge::{DefaultRegexBridge, RegexBridge};
pub use scheme::{BlindScan, Collated, InsertSort, SchemeSource, SelectableScheme};
