use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Read, Write};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

use crate::numeric::Numeric;
use crate::ty::{DateKind, SqlType};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValueError {
    #[error("operator `{op}` cannot be applied to {left:?} and {right:?}")]
    IncompatibleOperands {
        op: &'static str,
        left: SqlType,
        right: SqlType,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("malformed cell encoding: {0}")]
    MalformedCell(String),
}

/// How string values of a column collate.
///
/// The default (no locale) collation is plain lexicographic character order,
/// which is the only collation the LIKE pre-search may derive range bounds
/// from. A locale-tagged collation compares case-insensitively at primary
/// and secondary strength and exactly at tertiary and identical strength.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collation {
    pub locale: Option<String>,
    pub strength: CollationStrength,
    pub decomposition: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollationStrength {
    Primary,
    Secondary,
    Tertiary,
    Identical,
}

impl Default for Collation {
    fn default() -> Self {
        Collation {
            locale: None,
            strength: CollationStrength::Tertiary,
            decomposition: false,
        }
    }
}

impl Collation {
    /// True when the collation orders strings in plain character order, so
    /// that `[prefix, successor(prefix))` bounds a LIKE prefix scan.
    pub fn is_lexicographic(&self) -> bool {
        self.locale.is_none()
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        if self.locale.is_none() {
            return a.cmp(b);
        }
        match self.strength {
            CollationStrength::Primary | CollationStrength::Secondary => {
                let folded = a
                    .chars()
                    .flat_map(char::to_lowercase)
                    .cmp(b.chars().flat_map(char::to_lowercase));
                if folded == Ordering::Equal && self.strength == CollationStrength::Secondary {
                    a.cmp(b)
                } else {
                    folded
                }
            }
            CollationStrength::Tertiary | CollationStrength::Identical => a.cmp(b),
        }
    }
}

/// A string value bound to its column collation.
#[derive(Debug, Clone)]
pub struct SqlString {
    pub text: String,
    pub collation: Collation,
}

impl SqlString {
    pub fn plain(text: impl Into<String>) -> SqlString {
        SqlString {
            text: text.into(),
            collation: Collation::default(),
        }
    }
}

impl PartialEq for SqlString {
    fn eq(&self, other: &Self) -> bool {
        self.collation.compare(&self.text, &other.text) == Ordering::Equal
    }
}

impl Eq for SqlString {}

/// A DATE, TIME or TIMESTAMP value.
///
/// All three variants are carried as a [`NaiveDateTime`]; DATE values sit at
/// midnight, TIME values on the epoch date. The variants compare with one
/// another through that common representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateValue {
    pub kind: DateKind,
    pub at: NaiveDateTime,
}

impl DateValue {
    pub fn date(date: NaiveDate) -> DateValue {
        DateValue {
            kind: DateKind::Date,
            at: date.and_time(NaiveTime::MIN),
        }
    }

    pub fn time(time: NaiveTime) -> DateValue {
        DateValue {
            kind: DateKind::Time,
            at: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_time(time),
        }
    }

    pub fn timestamp(at: NaiveDateTime) -> DateValue {
        DateValue {
            kind: DateKind::Timestamp,
            at,
        }
    }
}

/// A tagged SQL value.
///
/// `Null` carries the SQL type it is a null *of*, so that a null produced by
/// an outer join or an operator keeps the column's type. An untyped null
/// literal carries [`SqlType::Null`].
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null(SqlType),
    Boolean(bool),
    Numeric(Numeric),
    String(SqlString),
    Date(DateValue),
    Binary(Vec<u8>),
}

impl TypedValue {
    pub fn null() -> TypedValue {
        TypedValue::Null(SqlType::Null)
    }

    pub fn typed_null(ty: SqlType) -> TypedValue {
        TypedValue::Null(ty)
    }

    pub fn from_i64(value: i64) -> TypedValue {
        TypedValue::Numeric(Numeric::from_i64(value))
    }

    pub fn string(text: impl Into<String>) -> TypedValue {
        TypedValue::String(SqlString::plain(text))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null(_))
    }

    pub fn sql_type(&self) -> SqlType {
        match self {
            TypedValue::Null(ty) => *ty,
            TypedValue::Boolean(_) => SqlType::Boolean,
            TypedValue::Numeric(_) => SqlType::Numeric,
            TypedValue::String(_) => SqlType::Varchar,
            TypedValue::Date(d) => d.kind.sql_type(),
            TypedValue::Binary(_) => SqlType::Binary,
        }
    }

    /// Rebind a string value to the collation of the column it was read
    /// from. Non-string values pass through unchanged.
    pub fn with_collation(self, collation: &Collation) -> TypedValue {
        match self {
            TypedValue::String(s) => TypedValue::String(SqlString {
                text: s.text,
                collation: collation.clone(),
            }),
            other => other,
        }
    }

    /// Partial value comparison.
    ///
    /// `None` means the operands are of incomparable types; the SQL
    /// comparison operators map that onto a null boolean.
    pub fn partial_compare(&self, other: &TypedValue) -> Option<Ordering> {
        use TypedValue::*;
        match (self, other) {
            (Null(_), Null(_)) => Some(Ordering::Equal),
            (Null(_), _) => Some(Ordering::Less),
            (_, Null(_)) => Some(Ordering::Greater),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Numeric(a), Numeric(b)) => Some(a.cmp(b)),
            (String(a), String(b)) => Some(a.collation.compare(&a.text, &b.text)),
            (Date(a), Date(b)) => Some(a.at.cmp(&b.at)),
            (Binary(a), Binary(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order for index collation: nulls first, then the partial order,
    /// with incomparable types falling back to their type-tag rank. Schemes
    /// rely on this being a total, consistent order over any value mix.
    pub fn total_compare(&self, other: &TypedValue) -> Ordering {
        self.partial_compare(other)
            .unwrap_or_else(|| self.type_rank().cmp(&other.type_rank()))
    }

    fn type_rank(&self) -> u8 {
        match self {
            TypedValue::Null(_) => 0,
            TypedValue::Boolean(_) => 1,
            TypedValue::Numeric(_) => 2,
            TypedValue::String(_) => 3,
            TypedValue::Date(_) => 4,
            TypedValue::Binary(_) => 5,
        }
    }

    fn null_boolean() -> TypedValue {
        TypedValue::Null(SqlType::Boolean)
    }

    // Comparison operators. A null operand or an incomparable pair yields a
    // null boolean, never an error.

    pub fn op_eq(&self, other: &TypedValue) -> TypedValue {
        self.compare_op(other, |ord| ord == Ordering::Equal)
    }

    pub fn op_ne(&self, other: &TypedValue) -> TypedValue {
        self.compare_op(other, |ord| ord != Ordering::Equal)
    }

    pub fn op_lt(&self, other: &TypedValue) -> TypedValue {
        self.compare_op(other, |ord| ord == Ordering::Less)
    }

    pub fn op_le(&self, other: &TypedValue) -> TypedValue {
        self.compare_op(other, |ord| ord != Ordering::Greater)
    }

    pub fn op_gt(&self, other: &TypedValue) -> TypedValue {
        self.compare_op(other, |ord| ord == Ordering::Greater)
    }

    pub fn op_ge(&self, other: &TypedValue) -> TypedValue {
        self.compare_op(other, |ord| ord != Ordering::Less)
    }

    fn compare_op(&self, other: &TypedValue, f: impl FnOnce(Ordering) -> bool) -> TypedValue {
        if self.is_null() || other.is_null() {
            return Self::null_boolean();
        }
        match self.partial_compare(other) {
            Some(ord) => TypedValue::Boolean(f(ord)),
            None => Self::null_boolean(),
        }
    }

    /// The SQL `IS` operator: boolean true only when both operands are null;
    /// a single null operand is false (not a null boolean); two non-null
    /// operands compare by value.
    pub fn op_is(&self, other: &TypedValue) -> TypedValue {
        match (self.is_null(), other.is_null()) {
            (true, true) => TypedValue::Boolean(true),
            (true, false) | (false, true) => TypedValue::Boolean(false),
            (false, false) => TypedValue::Boolean(self.partial_compare(other) == Some(Ordering::Equal)),
        }
    }

    // Three-valued logic.

    fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn op_and(&self, other: &TypedValue) -> TypedValue {
        match (self.as_bool(), other.as_bool()) {
            (Some(false), _) | (_, Some(false)) => TypedValue::Boolean(false),
            (Some(true), Some(true)) => TypedValue::Boolean(true),
            _ => Self::null_boolean(),
        }
    }

    pub fn op_or(&self, other: &TypedValue) -> TypedValue {
        match (self.as_bool(), other.as_bool()) {
            (Some(true), _) | (_, Some(true)) => TypedValue::Boolean(true),
            (Some(false), Some(false)) => TypedValue::Boolean(false),
            _ => Self::null_boolean(),
        }
    }

    pub fn op_not(&self) -> TypedValue {
        match self.as_bool() {
            Some(b) => TypedValue::Boolean(!b),
            None => Self::null_boolean(),
        }
    }

    // Arithmetic and concatenation. Null operands propagate as typed nulls;
    // a type mismatch is an error the statement layer reports.

    pub fn op_add(&self, other: &TypedValue) -> Result<TypedValue, ValueError> {
        self.arith("+", other, |a, b| Ok(a.add(b)))
    }

    pub fn op_sub(&self, other: &TypedValue) -> Result<TypedValue, ValueError> {
        self.arith("-", other, |a, b| Ok(a.sub(b)))
    }

    pub fn op_mul(&self, other: &TypedValue) -> Result<TypedValue, ValueError> {
        self.arith("*", other, |a, b| Ok(a.mul(b)))
    }

    pub fn op_div(&self, other: &TypedValue) -> Result<TypedValue, ValueError> {
        self.arith("/", other, |a, b| a.div(b).ok_or(ValueError::DivisionByZero))
    }

    fn arith(
        &self,
        op: &'static str,
        other: &TypedValue,
        f: impl FnOnce(&Numeric, &Numeric) -> Result<Numeric, ValueError>,
    ) -> Result<TypedValue, ValueError> {
        match (self, other) {
            (TypedValue::Null(_), _) | (_, TypedValue::Null(_)) => Ok(TypedValue::Null(SqlType::Numeric)),
            (TypedValue::Numeric(a), TypedValue::Numeric(b)) => f(a, b).map(TypedValue::Numeric),
            (left, right) => Err(ValueError::IncompatibleOperands {
                op,
                left: left.sql_type(),
                right: right.sql_type(),
            }),
        }
    }

    pub fn op_concat(&self, other: &TypedValue) -> Result<TypedValue, ValueError> {
        match (self, other) {
            (TypedValue::Null(_), _) | (_, TypedValue::Null(_)) => Ok(TypedValue::Null(SqlType::Varchar)),
            (TypedValue::String(a), TypedValue::String(b)) => {
                let mut text = a.text.clone();
                text.push_str(&b.text);
                Ok(TypedValue::String(SqlString {
                    text,
                    collation: a.collation.clone(),
                }))
            }
            (left, right) => Err(ValueError::IncompatibleOperands {
                op: "||",
                left: left.sql_type(),
                right: right.sql_type(),
            }),
        }
    }
}

// Cell wire format: one tag byte, a big-endian u32 payload length, then the
// payload. The length prefix lets a reader skip over cells it does not need
// without decoding them.

const TAG_NULL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMERIC: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_DATE: u8 = 4;
const TAG_BINARY: u8 = 5;

impl TypedValue {
    pub fn encode_cell<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let (tag, payload): (u8, Vec<u8>) = match self {
            TypedValue::Null(ty) => (TAG_NULL, vec![ty.code()]),
            TypedValue::Boolean(b) => (TAG_BOOLEAN, vec![*b as u8]),
            TypedValue::Numeric(n) => (TAG_NUMERIC, n.canonical_string().into_bytes()),
            TypedValue::String(s) => (TAG_STRING, s.text.as_bytes().to_vec()),
            TypedValue::Date(d) => {
                let mut buf = Vec::with_capacity(13);
                buf.push(match d.kind {
                    DateKind::Date => 0,
                    DateKind::Time => 1,
                    DateKind::Timestamp => 2,
                });
                buf.extend_from_slice(&d.at.and_utc().timestamp().to_be_bytes());
                buf.extend_from_slice(&d.at.and_utc().timestamp_subsec_nanos().to_be_bytes());
                (TAG_DATE, buf)
            }
            TypedValue::Binary(b) => (TAG_BINARY, b.clone()),
        };
        out.write_all(&[tag])?;
        out.write_all(&(payload.len() as u32).to_be_bytes())?;
        out.write_all(&payload)
    }

    pub fn decode_cell<R: Read>(input: &mut R) -> Result<TypedValue, ValueError> {
        let mut head = [0u8; 5];
        input
            .read_exact(&mut head)
            .map_err(|e| ValueError::MalformedCell(e.to_string()))?;
        let tag = head[0];
        let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
        let mut payload = vec![0u8; len];
        input
            .read_exact(&mut payload)
            .map_err(|e| ValueError::MalformedCell(e.to_string()))?;

        match tag {
            TAG_NULL => {
                let code = *payload
                    .first()
                    .ok_or_else(|| ValueError::MalformedCell("empty null payload".into()))?;
                let ty = SqlType::from_code(code)
                    .ok_or_else(|| ValueError::MalformedCell(format!("unknown type code {code}")))?;
                Ok(TypedValue::Null(ty))
            }
            TAG_BOOLEAN => Ok(TypedValue::Boolean(payload.first().copied() == Some(1))),
            TAG_NUMERIC => {
                let text = String::from_utf8(payload).map_err(|e| ValueError::MalformedCell(e.to_string()))?;
                Numeric::parse(&text)
                    .map(TypedValue::Numeric)
                    .ok_or_else(|| ValueError::MalformedCell(format!("bad numeric literal `{text}`")))
            }
            TAG_STRING => {
                let text = String::from_utf8(payload).map_err(|e| ValueError::MalformedCell(e.to_string()))?;
                Ok(TypedValue::String(SqlString::plain(text)))
            }
            TAG_DATE => {
                if payload.len() != 13 {
                    return Err(ValueError::MalformedCell("date payload must be 13 bytes".into()));
                }
                let kind = match payload[0] {
                    0 => DateKind::Date,
                    1 => DateKind::Time,
                    2 => DateKind::Timestamp,
                    other => return Err(ValueError::MalformedCell(format!("unknown date kind {other}"))),
                };
                let secs = i64::from_be_bytes(payload[1..9].try_into().unwrap());
                let nanos = u32::from_be_bytes(payload[9..13].try_into().unwrap());
                let at = chrono::DateTime::from_timestamp(secs, nanos)
                    .ok_or_else(|| ValueError::MalformedCell("date out of range".into()))?
                    .naive_utc();
                Ok(TypedValue::Date(DateValue { kind, at }))
            }
            TAG_BINARY => Ok(TypedValue::Binary(payload)),
            other => Err(ValueError::MalformedCell(format!("unknown cell tag {other}"))),
        }
    }

    /// Advance `input` past one encoded cell without decoding it. Returns
    /// the number of bytes skipped.
    pub fn skip_cell<R: Read>(input: &mut R) -> Result<usize, ValueError> {
        let mut head = [0u8; 5];
        input
            .read_exact(&mut head)
            .map_err(|e| ValueError::MalformedCell(e.to_string()))?;
        let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
        io::copy(&mut input.take(len as u64), &mut io::sink()).map_err(|e| ValueError::MalformedCell(e.to_string()))?;
        Ok(5 + len)
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null(_) => write!(f, "NULL"),
            TypedValue::Boolean(b) => write!(f, "{b}"),
            TypedValue::Numeric(n) => write!(f, "{n}"),
            TypedValue::String(s) => write!(f, "'{}'", s.text),
            TypedValue::Date(d) => write!(f, "{}", d.at),
            TypedValue::Binary(b) => write!(f, "X'{}'", b.iter().map(|x| format!("{x:02x}")).collect::<String>()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn null_sorts_below_everything() {
        let null = TypedValue::null();
        for v in [
            TypedValue::Boolean(false),
            TypedValue::from_i64(i64::MIN),
            TypedValue::string(""),
        ] {
            assert_eq!(null.partial_compare(&v), Some(Ordering::Less));
            assert_eq!(v.partial_compare(&null), Some(Ordering::Greater));
        }
        assert_eq!(null.partial_compare(&TypedValue::typed_null(SqlType::Integer)), Some(Ordering::Equal));
    }

    #[test]
    fn incomparable_types_yield_null_boolean() {
        let s = TypedValue::string("abc");
        let n = TypedValue::from_i64(1);
        assert_eq!(s.partial_compare(&n), None);
        assert_eq!(s.op_eq(&n), TypedValue::Null(SqlType::Boolean));
        // The total order still separates them deterministically.
        assert_ne!(s.total_compare(&n), Ordering::Equal);
    }

    #[test]
    fn is_operator() {
        let null = TypedValue::null();
        assert_eq!(null.op_is(&TypedValue::typed_null(SqlType::Varchar)), TypedValue::Boolean(true));
        assert_eq!(null.op_is(&TypedValue::from_i64(0)), TypedValue::Boolean(false));
        assert_eq!(
            TypedValue::from_i64(3).op_is(&TypedValue::from_i64(3)),
            TypedValue::Boolean(true)
        );
    }

    #[test]
    fn three_valued_logic() {
        let t = TypedValue::Boolean(true);
        let f = TypedValue::Boolean(false);
        let u = TypedValue::typed_null(SqlType::Boolean);
        assert_eq!(f.op_and(&u), TypedValue::Boolean(false));
        assert_eq!(t.op_and(&u), u);
        assert_eq!(t.op_or(&u), TypedValue::Boolean(true));
        assert_eq!(f.op_or(&u), u);
        assert_eq!(u.op_not(), u);
    }

    #[test]
    fn arithmetic_null_propagation() {
        let one = TypedValue::from_i64(1);
        let null = TypedValue::null();
        assert_eq!(one.op_add(&null).unwrap(), TypedValue::Null(SqlType::Numeric));
        assert_eq!(
            one.op_div(&TypedValue::from_i64(0)),
            Err(ValueError::DivisionByZero)
        );
        assert!(one.op_add(&TypedValue::string("x")).is_err());
    }

    #[test]
    fn cell_round_trip() {
        let values = [
            TypedValue::null(),
            TypedValue::typed_null(SqlType::Varchar),
            TypedValue::Boolean(true),
            TypedValue::from_i64(-42),
            TypedValue::Numeric(Numeric::parse("3.14159").unwrap()),
            TypedValue::string("Toby Downer"),
            TypedValue::Date(DateValue::date(NaiveDate::from_ymd_opt(2004, 2, 29).unwrap())),
            TypedValue::Binary(vec![0, 1, 2, 255]),
        ];
        let mut buf = Vec::new();
        for v in &values {
            v.encode_cell(&mut buf).unwrap();
        }
        let mut cursor = io::Cursor::new(&buf);
        for v in &values {
            assert_eq!(&TypedValue::decode_cell(&mut cursor).unwrap(), v);
        }
    }

    #[test]
    fn skip_matches_encoded_len() {
        let v = TypedValue::string("skip me");
        let mut buf = Vec::new();
        v.encode_cell(&mut buf).unwrap();
        let mut cursor = io::Cursor::new(&buf);
        assert_eq!(TypedValue::skip_cell(&mut cursor).unwrap(), buf.len());
    }

    #[test]
    fn locale_collation_folds_case() {
        let coll = Collation {
            locale: Some("en".into()),
            strength: CollationStrength::Primary,
            decomposition: false,
        };
        assert_eq!(coll.compare("Alice", "ALICE"), Ordering::Equal);
        assert!(!coll.is_lexicographic());
        assert!(Collation::default().is_lexicographic());
    }
}
