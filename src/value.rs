//! SQL value domain.
//!
//! [`Value`] is the runtime representation of a cell in the shadow model. The
//! ordering here is authoritative for the whole fuzzer: row keys, cursor
//! iteration, the three-way merge walk, and conflict sorting all compare
//! through it. `NULL` sorts before every non-NULL value, matching the
//! ascending `ORDER BY` placement of the database under test.
//!
//! Values round-trip through three textual forms: the SQL literal sent to the
//! database, the CSV text used by `internal_data/` exports, and the wire
//! values returned by the SQL connection.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{FuzzerError, Result};

/// CSV marker for SQL NULL. Generated strings never contain a backslash, so
/// the marker cannot collide with data.
pub const CSV_NULL: &str = "\\N";

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// One cell of a row.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Signed integer types (BIT is carried as an unsigned).
    Int(i64),
    /// Unsigned integer types and BIT(m).
    Uint(u64),
    /// FLOAT and DOUBLE. FLOAT values are f32-precision widened to f64.
    Float(f64),
    /// DECIMAL(p, s) as an unscaled integer plus scale.
    Decimal(Decimal),
    /// CHAR, VARCHAR and DATETIME (canonical `YYYY-MM-DD hh:mm:ss` text).
    Text(String),
}

impl Value {
    /// True for SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Render the value as a SQL literal.
    #[must_use]
    pub fn sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_owned(),
            Self::Int(v) => v.to_string(),
            Self::Uint(v) => v.to_string(),
            Self::Float(v) => format_float(*v),
            Self::Decimal(d) => d.to_string(),
            Self::Text(s) => quote_sql_string(s),
        }
    }

    /// Render the value as CSV field text (`\N` for NULL).
    #[must_use]
    pub fn csv_text(&self) -> String {
        match self {
            Self::Null => CSV_NULL.to_owned(),
            Self::Int(v) => v.to_string(),
            Self::Uint(v) => v.to_string(),
            Self::Float(v) => format_float(*v),
            Self::Decimal(d) => d.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    /// Total order over values. `NULL` first; numeric kinds compare
    /// numerically; text compares bytewise.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Uint(a), Self::Uint(b)) => a.cmp(b),
            (Self::Int(a), Self::Uint(b)) => cmp_int_uint(*a, *b),
            (Self::Uint(a), Self::Int(b)) => cmp_int_uint(*b, *a).reverse(),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Decimal(a), Self::Decimal(b)) => a.compare(b),
            (Self::Text(a), Self::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            // Mixed kinds never share a column; rank variants to keep the
            // order total anyway.
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Int(_) => 1,
            Self::Uint(_) => 2,
            Self::Float(_) => 3,
            Self::Decimal(_) => 4,
            Self::Text(_) => 5,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_literal())
    }
}

fn cmp_int_uint(a: i64, b: u64) -> Ordering {
    if a < 0 {
        Ordering::Less
    } else {
        (a as u64).cmp(&b)
    }
}

fn format_float(v: f64) -> String {
    // Display for f64 is the shortest round-tripping form, but integral
    // values print without a dot and the database would read them as ints.
    let s = v.to_string();
    if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
        s
    } else {
        format!("{s}.0")
    }
}

fn quote_sql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

// ---------------------------------------------------------------------------
// Decimal
// ---------------------------------------------------------------------------

/// Fixed-point decimal: `unscaled × 10^-scale`.
///
/// Precision is capped well below `i128` range by the type layer, so
/// rescaling during comparison cannot overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decimal {
    pub unscaled: i128,
    pub scale: u8,
}

impl Decimal {
    #[must_use]
    pub const fn new(unscaled: i128, scale: u8) -> Self {
        Self { unscaled, scale }
    }

    /// Numeric comparison across scales.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        let a = self.unscaled * 10_i128.pow(u32::from(scale - self.scale));
        let b = other.unscaled * 10_i128.pow(u32::from(scale - other.scale));
        a.cmp(&b)
    }

    /// Parse from canonical text (`-12.340`), given the column scale.
    pub fn parse(text: &str, scale: u8) -> Result<Self> {
        let (neg, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(FuzzerError::new(format!("invalid decimal {text:?}")));
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(FuzzerError::new(format!("invalid decimal {text:?}")));
        }
        let mut frac = frac_part.to_owned();
        while frac.len() < usize::from(scale) {
            frac.push('0');
        }
        if frac.len() > usize::from(scale) {
            frac.truncate(usize::from(scale));
        }
        let joined = format!("{int_part}{frac}");
        let mut unscaled: i128 = joined
            .parse()
            .map_err(|_| FuzzerError::new(format!("decimal out of range: {text:?}")))?;
        if neg {
            unscaled = -unscaled;
        }
        Ok(Self { unscaled, scale })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.unscaled);
        }
        let sign = if self.unscaled < 0 { "-" } else { "" };
        let mag = self.unscaled.unsigned_abs();
        let pow = 10_u128.pow(u32::from(self.scale));
        let int_part = mag / pow;
        let frac_part = mag % pow;
        write!(
            f,
            "{sign}{int_part}.{frac_part:0width$}",
            width = usize::from(self.scale)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_first() {
        assert_eq!(Value::Null.compare(&Value::Int(i64::MIN)), Ordering::Less);
        assert_eq!(Value::Int(0).compare(&Value::Null), Ordering::Greater);
        assert_eq!(Value::Null.compare(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn int_ordering_is_numeric() {
        assert_eq!(Value::Int(-3).compare(&Value::Int(2)), Ordering::Less);
        assert_eq!(Value::Uint(10).compare(&Value::Uint(2)), Ordering::Greater);
    }

    #[test]
    fn mixed_int_uint_compare_numerically() {
        assert_eq!(Value::Int(-1).compare(&Value::Uint(0)), Ordering::Less);
        assert_eq!(
            Value::Uint(u64::MAX).compare(&Value::Int(i64::MAX)),
            Ordering::Greater
        );
        assert_eq!(Value::Int(7).compare(&Value::Uint(7)), Ordering::Equal);
    }

    #[test]
    fn text_ordering_is_bytewise() {
        assert_eq!(
            Value::Text("abc".into()).compare(&Value::Text("abd".into())),
            Ordering::Less
        );
    }

    #[test]
    fn float_literal_keeps_a_dot() {
        assert_eq!(Value::Float(3.0).sql_literal(), "3.0");
        assert_eq!(Value::Float(0.5).sql_literal(), "0.5");
    }

    #[test]
    fn string_literal_is_quoted_and_escaped() {
        assert_eq!(Value::Text("ab".into()).sql_literal(), "'ab'");
        assert_eq!(Value::Text("a'b".into()).sql_literal(), "'a''b'");
    }

    #[test]
    fn csv_null_marker() {
        assert_eq!(Value::Null.csv_text(), "\\N");
        assert_eq!(Value::Text("x".into()).csv_text(), "x");
    }

    #[test]
    fn decimal_display_pads_fraction() {
        assert_eq!(Decimal::new(1205, 2).to_string(), "12.05");
        assert_eq!(Decimal::new(-5, 3).to_string(), "-0.005");
        assert_eq!(Decimal::new(7, 0).to_string(), "7");
    }

    #[test]
    fn decimal_parse_round_trip() {
        let d = Decimal::parse("12.05", 2).unwrap();
        assert_eq!(d, Decimal::new(1205, 2));
        assert_eq!(d.to_string(), "12.05");
        let neg = Decimal::parse("-0.005", 3).unwrap();
        assert_eq!(neg, Decimal::new(-5, 3));
    }

    #[test]
    fn decimal_parse_pads_short_fraction() {
        assert_eq!(Decimal::parse("3.1", 3).unwrap(), Decimal::new(3100, 3));
        assert_eq!(Decimal::parse("4", 2).unwrap(), Decimal::new(400, 2));
    }

    #[test]
    fn decimal_parse_rejects_garbage() {
        assert!(Decimal::parse("abc", 2).is_err());
        assert!(Decimal::parse("-", 2).is_err());
        assert!(Decimal::parse("1.2.3", 2).is_err());
    }

    #[test]
    fn decimal_compare_across_scales() {
        let a = Decimal::new(95, 1); // 9.5
        let b = Decimal::new(1050, 2); // 10.50
        assert_eq!(a.compare(&b), Ordering::Less);
        let c = Decimal::new(950, 2); // 9.50
        assert_eq!(a.compare(&c), Ordering::Equal);
    }

    #[test]
    fn ordering_is_total_across_kinds() {
        // Mixed kinds never share a column, but Ord must still be lawful.
        let vals = [
            Value::Null,
            Value::Int(1),
            Value::Uint(1),
            Value::Float(1.0),
            Value::Decimal(Decimal::new(1, 0)),
            Value::Text("1".into()),
        ];
        for a in &vals {
            assert_eq!(a.compare(a), Ordering::Equal);
            for b in &vals {
                let ab = a.compare(b);
                let ba = b.compare(a);
                assert_eq!(ab, ba.reverse());
            }
        }
    }
}
