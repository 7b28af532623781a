//! The granite value model.
//!
//! A [`TypedValue`] is the unit of data everywhere above the record stores:
//! cells handed to the master table source, index keys in the selectable
//! schemes, operands of predicate operators. The model is a closed tagged
//! sum; there is no user-extensible type surface.
//!
//! Comparison rules, used consistently by the schemes and the range sets:
//!
//! * equality is value equality, never identity;
//! * `Null` compares less than any non-null value;
//! * comparing values of incomparable types (say a string with a date) is
//!   not an error; the partial comparison reports "incomparable" and the
//!   SQL operators translate that into a null boolean.

mod numeric;
mod ty;
mod value;

pub use numeric::Numeric;
pub use ty::{widen_numeric, DateKind, SqlType};
pub use value::{Collation, CollationStrength, DateValue, SqlString, TypedValue, ValueError};
