//! SQL column types.
//!
//! [`TypeInstance`] is a concrete column type with its parameters pinned
//! (e.g. `VARCHAR(24)` with a collation). Instances are drawn from the
//! configured type distribution when a table is created, and own everything
//! the fuzzer needs from a type: the DDL fragment, random value generation,
//! and parsing from the three textual/wire forms values travel through.
//!
//! Generated strings stay within `[a-z0-9]` so every supported collation
//! agrees with the shadow model's bytewise ordering.

use crate::config::{IntRange, Types};
use crate::error::{FuzzerError, Result};
use crate::rng::RandomSource;
use crate::sample::{self, Distributable};
use crate::sqlparse::Literal;
use crate::value::{Decimal, Value, CSV_NULL};

/// Collations accepted in configuration. All are case-preserving for the
/// `[a-z0-9]` charset generated values use.
pub const KNOWN_COLLATIONS: &[&str] = &[
    "utf8mb4_0900_bin",
    "utf8mb4_0900_ai_ci",
    "utf8mb4_general_ci",
    "utf8mb4_unicode_ci",
    "latin1_swedish_ci",
];

/// Probability denominator for generating NULL in a nullable column.
const NULL_ONE_IN: u64 = 8;

/// Charset for generated string values.
const STRING_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

// ---------------------------------------------------------------------------
// TypeInstance
// ---------------------------------------------------------------------------

/// A concrete column type with parameters pinned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeInstance {
    Bit { width: u8 },
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    BigIntUnsigned,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Char { length: u16, collation: String },
    Varchar { length: u16, collation: String },
    Datetime,
}

impl TypeInstance {
    /// The DDL fragment for a column of this type.
    #[must_use]
    pub fn sql_name(&self) -> String {
        match self {
            Self::Bit { width } => format!("BIT({width})"),
            Self::TinyInt => "TINYINT".to_owned(),
            Self::SmallInt => "SMALLINT".to_owned(),
            Self::MediumInt => "MEDIUMINT".to_owned(),
            Self::Int => "INT".to_owned(),
            Self::BigInt => "BIGINT".to_owned(),
            Self::BigIntUnsigned => "BIGINT UNSIGNED".to_owned(),
            Self::Float => "FLOAT".to_owned(),
            Self::Double => "DOUBLE".to_owned(),
            Self::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
            Self::Char { length, collation } => {
                format!("CHAR({length}) COLLATE {collation}")
            }
            Self::Varchar { length, collation } => {
                format!("VARCHAR({length}) COLLATE {collation}")
            }
            Self::Datetime => "DATETIME".to_owned(),
        }
    }

    /// Generate a random value of this type. Nullable columns draw NULL with
    /// probability `1/8`.
    #[must_use]
    pub fn generate(&self, rng: &RandomSource, nullable: bool) -> Value {
        if nullable && rng.u64_below(NULL_ONE_IN) == 0 {
            return Value::Null;
        }
        match self {
            Self::Bit { width } => {
                let mask = if *width == 64 {
                    u64::MAX
                } else {
                    (1_u64 << width) - 1
                };
                Value::Uint(rng.u64() & mask)
            }
            Self::TinyInt => Value::Int(rng.i64_range(i64::from(i8::MIN), i64::from(i8::MAX))),
            Self::SmallInt => Value::Int(rng.i64_range(i64::from(i16::MIN), i64::from(i16::MAX))),
            Self::MediumInt => Value::Int(rng.i64_range(-8_388_608, 8_388_607)),
            Self::Int => Value::Int(rng.i64_range(i64::from(i32::MIN), i64::from(i32::MAX))),
            Self::BigInt => Value::Int(rng.i64()),
            Self::BigIntUnsigned => Value::Uint(rng.u64()),
            Self::Float => {
                // f32-precision, widened: what the database will hand back.
                let v = ((rng.f64_unit() - 0.5) * 2_000_000.0) as f32;
                Value::Float(f64::from(v))
            }
            Self::Double => Value::Float((rng.f64_unit() - 0.5) * 2.0e12),
            Self::Decimal { precision, scale } => {
                let bound = 10_i128.pow(u32::from(*precision));
                let mag = (rng.u64() as i128) % bound;
                let unscaled = if rng.bool() { mag } else { -mag };
                Value::Decimal(Decimal::new(unscaled, *scale))
            }
            Self::Char { length, .. } | Self::Varchar { length, .. } => {
                let len = rng.u64_below(u64::from(*length) + 1) as usize;
                let mut s = String::with_capacity(len);
                for _ in 0..len {
                    let i = rng.u64_below(STRING_CHARSET.len() as u64) as usize;
                    s.push(char::from(STRING_CHARSET[i]));
                }
                Value::Text(s)
            }
            Self::Datetime => {
                let year = rng.u64_range(1000, 9999);
                let month = rng.u64_range(1, 12);
                let day = rng.u64_range(1, 28);
                let hour = rng.u64_below(24);
                let minute = rng.u64_below(60);
                let second = rng.u64_below(60);
                Value::Text(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                ))
            }
        }
    }

    /// Parse a value from a SQL literal token.
    pub fn parse_literal(&self, lit: &Literal) -> Result<Value> {
        match lit {
            Literal::Null => Ok(Value::Null),
            Literal::Number(text) => self.parse_text(text),
            Literal::String(text) => match self {
                Self::Char { .. } | Self::Varchar { .. } | Self::Datetime => {
                    Ok(Value::Text(text.clone()))
                }
                _ => Err(FuzzerError::new(format!(
                    "string literal {text:?} for non-string column type {}",
                    self.sql_name()
                ))),
            },
        }
    }

    /// Parse a value from CSV field text.
    pub fn parse_csv(&self, text: &str) -> Result<Value> {
        if text == CSV_NULL {
            return Ok(Value::Null);
        }
        match self {
            Self::Char { .. } | Self::Varchar { .. } | Self::Datetime => {
                Ok(Value::Text(text.to_owned()))
            }
            _ => self.parse_text(text),
        }
    }

    fn parse_text(&self, text: &str) -> Result<Value> {
        let bad = || FuzzerError::new(format!("cannot parse {text:?} as {}", self.sql_name()));
        match self {
            Self::Bit { .. } | Self::BigIntUnsigned => {
                text.parse::<u64>().map(Value::Uint).map_err(|_| bad())
            }
            Self::TinyInt | Self::SmallInt | Self::MediumInt | Self::Int | Self::BigInt => {
                text.parse::<i64>().map(Value::Int).map_err(|_| bad())
            }
            Self::Float | Self::Double => text.parse::<f64>().map(Value::Float).map_err(|_| bad()),
            Self::Decimal { scale, .. } => Decimal::parse(text, *scale).map(Value::Decimal),
            Self::Char { .. } | Self::Varchar { .. } | Self::Datetime => {
                Ok(Value::Text(text.to_owned()))
            }
        }
    }

    /// Convert a wire value from the SQL connection into the shadow domain.
    pub fn from_wire(&self, wire: &mysql::Value) -> Result<Value> {
        use mysql::Value as W;
        if matches!(wire, W::NULL) {
            return Ok(Value::Null);
        }
        match self {
            Self::Bit { .. } => match wire {
                // BIT comes back as raw big-endian bytes.
                W::Bytes(b) => {
                    let mut v: u64 = 0;
                    for byte in b {
                        v = (v << 8) | u64::from(*byte);
                    }
                    Ok(Value::Uint(v))
                }
                W::Int(v) => Ok(Value::Uint(*v as u64)),
                W::UInt(v) => Ok(Value::Uint(*v)),
                _ => Err(wire_error(self, wire)),
            },
            Self::TinyInt | Self::SmallInt | Self::MediumInt | Self::Int | Self::BigInt => {
                match wire {
                    W::Int(v) => Ok(Value::Int(*v)),
                    W::UInt(v) => Ok(Value::Int(*v as i64)),
                    W::Bytes(b) => self.parse_text(&bytes_text(b)?),
                    _ => Err(wire_error(self, wire)),
                }
            }
            Self::BigIntUnsigned => match wire {
                W::UInt(v) => Ok(Value::Uint(*v)),
                W::Int(v) => Ok(Value::Uint(*v as u64)),
                W::Bytes(b) => self.parse_text(&bytes_text(b)?),
                _ => Err(wire_error(self, wire)),
            },
            Self::Float => match wire {
                W::Float(v) => Ok(Value::Float(f64::from(*v))),
                W::Double(v) => Ok(Value::Float(*v)),
                W::Bytes(b) => {
                    // Text protocol: parse as f32 first to keep f32 precision.
                    let text = bytes_text(b)?;
                    text.parse::<f32>()
                        .map(|v| Value::Float(f64::from(v)))
                        .map_err(|_| wire_error(self, wire))
                }
                _ => Err(wire_error(self, wire)),
            },
            Self::Double => match wire {
                W::Double(v) => Ok(Value::Float(*v)),
                W::Float(v) => Ok(Value::Float(f64::from(*v))),
                W::Bytes(b) => self.parse_text(&bytes_text(b)?),
                _ => Err(wire_error(self, wire)),
            },
            Self::Decimal { scale, .. } => match wire {
                W::Bytes(b) => Decimal::parse(&bytes_text(b)?, *scale).map(Value::Decimal),
                _ => Err(wire_error(self, wire)),
            },
            Self::Char { .. } | Self::Varchar { .. } => match wire {
                W::Bytes(b) => Ok(Value::Text(bytes_text(b)?)),
                _ => Err(wire_error(self, wire)),
            },
            Self::Datetime => match wire {
                W::Bytes(b) => Ok(Value::Text(bytes_text(b)?)),
                W::Date(y, mo, d, h, mi, s, _micro) => Ok(Value::Text(format!(
                    "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"
                ))),
                _ => Err(wire_error(self, wire)),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// Column-type kinds the registry can instantiate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TypeKind {
    Bit,
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    BigIntUnsigned,
    Float,
    Double,
    Decimal,
    Char,
    Varchar,
    Datetime,
}

struct WeightedType {
    kind: TypeKind,
    range: IntRange,
}

impl Distributable for WeightedType {
    fn occurrence_rate(&self, rng: &RandomSource) -> u64 {
        self.range.sample(rng)
    }
}

/// Draws concrete column types from the configured type distribution,
/// pinning parameters from the configured parameter ranges.
pub struct TypeRegistry {
    entries: Vec<WeightedType>,
    bit_width: IntRange,
    decimal_precision: IntRange,
    decimal_scale: IntRange,
    char_length: IntRange,
    varchar_length: IntRange,
    collations: Vec<String>,
}

impl TypeRegistry {
    #[must_use]
    pub fn from_config(types: &Types) -> Self {
        let d = &types.distribution;
        let entries = vec![
            WeightedType { kind: TypeKind::Bit, range: d.bit },
            WeightedType { kind: TypeKind::TinyInt, range: d.tinyint },
            WeightedType { kind: TypeKind::SmallInt, range: d.smallint },
            WeightedType { kind: TypeKind::MediumInt, range: d.mediumint },
            WeightedType { kind: TypeKind::Int, range: d.int },
            WeightedType { kind: TypeKind::BigInt, range: d.bigint },
            WeightedType { kind: TypeKind::BigIntUnsigned, range: d.bigint_unsigned },
            WeightedType { kind: TypeKind::Float, range: d.float },
            WeightedType { kind: TypeKind::Double, range: d.double },
            WeightedType { kind: TypeKind::Decimal, range: d.decimal },
            WeightedType { kind: TypeKind::Char, range: d.char_ },
            WeightedType { kind: TypeKind::Varchar, range: d.varchar },
            WeightedType { kind: TypeKind::Datetime, range: d.datetime },
        ];
        let p = &types.parameters;
        Self {
            entries,
            bit_width: p.bit_width,
            decimal_precision: p.decimal_precision,
            decimal_scale: p.decimal_scale,
            char_length: p.char_length,
            varchar_length: p.varchar_length,
            collations: p.collations.clone(),
        }
    }

    /// Draw a concrete type. Key columns never get floating-point types:
    /// their rounding makes key equality against the database unreliable.
    pub fn instantiate(&self, rng: &RandomSource, for_key: bool) -> Result<TypeInstance> {
        for _ in 0..64 {
            let refs: Vec<&WeightedType> = self.entries.iter().collect();
            let idx = sample::select(rng, 1, &refs)?;
            let kind = self.entries[idx].kind;
            if for_key && matches!(kind, TypeKind::Float | TypeKind::Double) {
                continue;
            }
            return Ok(self.pin(rng, kind));
        }
        Err(FuzzerError::new(
            "Types.Distribution enables only floating-point types; \
             key columns need at least one other type",
        ))
    }

    fn pin(&self, rng: &RandomSource, kind: TypeKind) -> TypeInstance {
        match kind {
            TypeKind::Bit => TypeInstance::Bit {
                width: self.bit_width.sample(rng) as u8,
            },
            TypeKind::TinyInt => TypeInstance::TinyInt,
            TypeKind::SmallInt => TypeInstance::SmallInt,
            TypeKind::MediumInt => TypeInstance::MediumInt,
            TypeKind::Int => TypeInstance::Int,
            TypeKind::BigInt => TypeInstance::BigInt,
            TypeKind::BigIntUnsigned => TypeInstance::BigIntUnsigned,
            TypeKind::Float => TypeInstance::Float,
            TypeKind::Double => TypeInstance::Double,
            TypeKind::Decimal => {
                let precision = self.decimal_precision.sample(rng) as u8;
                let scale = self
                    .decimal_scale
                    .sample(rng)
                    .min(u64::from(precision)) as u8;
                TypeInstance::Decimal { precision, scale }
            }
            TypeKind::Char => TypeInstance::Char {
                length: self.char_length.sample(rng) as u16,
                collation: self.pick_collation(rng),
            },
            TypeKind::Varchar => TypeInstance::Varchar {
                length: self.varchar_length.sample(rng) as u16,
                collation: self.pick_collation(rng),
            },
            TypeKind::Datetime => TypeInstance::Datetime,
        }
    }

    fn pick_collation(&self, rng: &RandomSource) -> String {
        let idx = rng.u64_below(self.collations.len() as u64) as usize;
        self.collations[idx].clone()
    }
}

fn bytes_text(b: &[u8]) -> Result<String> {
    String::from_utf8(b.to_vec())
        .map_err(|_| FuzzerError::new("non-UTF-8 bytes from SQL connection"))
}

fn wire_error(ty: &TypeInstance, wire: &mysql::Value) -> FuzzerError {
    FuzzerError::new(format!(
        "unexpected wire value {wire:?} for column type {}",
        ty.sql_name()
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
