use crate::numeric::Numeric;

/// The declared SQL type of a column or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    Decimal,
    Boolean,
    Char,
    Varchar,
    Date,
    Time,
    Timestamp,
    Binary,
    /// The type of an untyped null literal.
    Null,
}

impl SqlType {
    /// Numeric code used in the serialized form of column definitions and
    /// cells. Stable across releases; append only.
    pub fn code(self) -> u8 {
        match self {
            SqlType::Bit => 0,
            SqlType::TinyInt => 1,
            SqlType::SmallInt => 2,
            SqlType::Integer => 3,
            SqlType::BigInt => 4,
            SqlType::Real => 5,
            SqlType::Double => 6,
            SqlType::Numeric => 7,
            SqlType::Decimal => 8,
            SqlType::Boolean => 9,
            SqlType::Char => 10,
            SqlType::Varchar => 11,
            SqlType::Date => 12,
            SqlType::Time => 13,
            SqlType::Timestamp => 14,
            SqlType::Binary => 15,
            SqlType::Null => 16,
        }
    }

    pub fn from_code(code: u8) -> Option<SqlType> {
        Some(match code {
            0 => SqlType::Bit,
            1 => SqlType::TinyInt,
            2 => SqlType::SmallInt,
            3 => SqlType::Integer,
            4 => SqlType::BigInt,
            5 => SqlType::Real,
            6 => SqlType::Double,
            7 => SqlType::Numeric,
            8 => SqlType::Decimal,
            9 => SqlType::Boolean,
            10 => SqlType::Char,
            11 => SqlType::Varchar,
            12 => SqlType::Date,
            13 => SqlType::Time,
            14 => SqlType::Timestamp,
            15 => SqlType::Binary,
            16 => SqlType::Null,
            _ => return None,
        })
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            SqlType::Bit
                | SqlType::TinyInt
                | SqlType::SmallInt
                | SqlType::Integer
                | SqlType::BigInt
                | SqlType::Real
                | SqlType::Double
                | SqlType::Numeric
                | SqlType::Decimal
        )
    }

    pub fn is_string(self) -> bool {
        matches!(self, SqlType::Char | SqlType::Varchar)
    }

    pub fn is_date(self) -> bool {
        matches!(self, SqlType::Date | SqlType::Time | SqlType::Timestamp)
    }
}

/// Which calendar variant a date value carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DateKind {
    Date,
    Time,
    Timestamp,
}

impl DateKind {
    pub fn sql_type(self) -> SqlType {
        match self {
            DateKind::Date => SqlType::Date,
            DateKind::Time => SqlType::Time,
            DateKind::Timestamp => SqlType::Timestamp,
        }
    }
}

/// Widen a numeric value's declared type to the narrowest runtime type that
/// can represent it.
///
/// | Declared        | Condition                     | Widens to |
/// |-----------------|-------------------------------|-----------|
/// | NUMERIC/DECIMAL | representable as int          | INTEGER   |
/// | NUMERIC/DECIMAL | scale = 0, fits in i64        | BIGINT    |
/// | NUMERIC/DECIMAL | scale > 0, fits in f64        | DOUBLE    |
/// | BIT             | value in {0, 1}               | BIT       |
/// | BIT             | outside                       | TINYINT, then wider until it fits |
/// | REAL            | fits in f32                   | REAL      |
/// | REAL            | outside                       | DOUBLE    |
pub fn widen_numeric(declared: SqlType, value: &Numeric) -> SqlType {
    match declared {
        SqlType::Numeric | SqlType::Decimal => {
            if value.fits_i32() {
                SqlType::Integer
            } else if value.scale() <= 0 && value.fits_i64() {
                SqlType::BigInt
            } else if value.scale() > 0 && value.fits_f64() {
                SqlType::Double
            } else {
                declared
            }
        }
        SqlType::Bit => {
            if value.is_zero_or_one() {
                SqlType::Bit
            } else if value.fits_i8() {
                SqlType::TinyInt
            } else if value.fits_i16() {
                SqlType::SmallInt
            } else if value.fits_i32() {
                SqlType::Integer
            } else {
                SqlType::BigInt
            }
        }
        SqlType::Real => {
            if value.fits_f32() {
                SqlType::Real
            } else {
                SqlType::Double
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 0..=16 {
            let ty = SqlType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert_eq!(SqlType::from_code(200), None);
    }

    #[test]
    fn widen_decimal() {
        assert_eq!(
            widen_numeric(SqlType::Decimal, &Numeric::from_i64(42)),
            SqlType::Integer
        );
        assert_eq!(
            widen_numeric(SqlType::Numeric, &Numeric::from_i64(i64::MAX / 2)),
            SqlType::BigInt
        );
        assert_eq!(
            widen_numeric(SqlType::Numeric, &Numeric::parse("1.5").unwrap()),
            SqlType::Double
        );
    }

    #[test]
    fn widen_bit() {
        assert_eq!(widen_numeric(SqlType::Bit, &Numeric::from_i64(1)), SqlType::Bit);
        assert_eq!(widen_numeric(SqlType::Bit, &Numeric::from_i64(100)), SqlType::TinyInt);
        assert_eq!(widen_numeric(SqlType::Bit, &Numeric::from_i64(1000)), SqlType::SmallInt);
        assert_eq!(
            widen_numeric(SqlType::Bit, &Numeric::from_i64(1 << 40)),
            SqlType::BigInt
        );
    }

    #[test]
    fn widen_real() {
        assert_eq!(widen_numeric(SqlType::Real, &Numeric::from_i64(2)), SqlType::Real);
        assert_eq!(
            widen_numeric(SqlType::Real, &Numeric::parse("1e100").unwrap()),
            SqlType::Double
        );
    }
}
