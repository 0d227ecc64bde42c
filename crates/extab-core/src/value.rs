//! Typed scalar values shared by predicates, rows and option defaults.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default textual date layout used when a column declares no date format.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Declared storage type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Integer,
    Double,
    Decimal,
    Date,
    /// Opaque bytes (BLOB and friends). Never pushed to a backend.
    Binary,
}

impl ColumnType {
    /// Whether values of this type can be handed to a backend without loss.
    pub fn is_serializable(self) -> bool {
        !matches!(self, ColumnType::Binary)
    }
}

/// Fixed-point decimal stored as unscaled digits and a scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal {
    pub digits: i128,
    pub scale: u32,
}

impl Decimal {
    pub fn new(digits: i128, scale: u32) -> Self {
        Self { digits, scale }
    }

    pub fn to_f64(self) -> f64 {
        self.digits as f64 / 10f64.powi(self.scale as i32)
    }

    /// Parse `[-+]digits[.digits]`. Exponents are not accepted.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (negative, unsigned) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let joined = format!("{}{}", int_part, frac_part);
        let magnitude: i128 = joined.parse().ok()?;
        Some(Self {
            digits: if negative { -magnitude } else { magnitude },
            scale: frac_part.len() as u32,
        })
    }

    fn cmp_same_scale(self, other: Self) -> Option<Ordering> {
        if self.scale == other.scale {
            Some(self.digits.cmp(&other.digits))
        } else {
            self.to_f64().partial_cmp(&other.to_f64())
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.digits < 0 { "-" } else { "" };
        let raw = self.digits.unsigned_abs().to_string();
        if self.scale == 0 {
            return write!(f, "{}{}", sign, raw);
        }
        let scale = self.scale as usize;
        let padded = format!("{:0>width$}", raw, width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{}{}.{}", sign, int_part, frac_part)
    }
}

/// Coarse value families used to decide whether two literals are coercible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueClass {
    Text,
    Numeric,
    Temporal,
    Opaque,
}

/// A typed scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Double(f64),
    Decimal(Decimal),
    Date(NaiveDate),
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The coercion family, or `None` for NULL.
    pub fn class(&self) -> Option<ValueClass> {
        match self {
            Value::Null => None,
            Value::String(_) => Some(ValueClass::Text),
            Value::Integer(_) | Value::Double(_) | Value::Decimal(_) => Some(ValueClass::Numeric),
            Value::Date(_) => Some(ValueClass::Temporal),
            Value::Binary(_) => Some(ValueClass::Opaque),
        }
    }

    /// Whether a backend can receive this value without precision loss.
    /// Non-finite doubles have no SQL literal form.
    pub fn is_serializable(&self) -> bool {
        match self {
            Value::Binary(_) => false,
            Value::Double(d) => d.is_finite(),
            _ => true,
        }
    }

    /// Numeric view used for cross-type numeric comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Decimal(d) => Some(d.to_f64()),
            _ => None,
        }
    }

    /// SQL comparison. Returns `None` when either side is NULL or the two
    /// values are not comparable, which callers treat as UNKNOWN.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp_same_scale(*b),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::String(b)) => parse_date(b, None).map(|b| a.cmp(&b)),
            (Value::String(a), Value::Date(b)) => parse_date(a, None).map(|a| a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Parse the textual form of a field into a value of the given type.
    ///
    /// Returns `None` when the text does not parse. An empty field is NULL.
    pub fn parse_as(text: &str, ty: ColumnType, date_format: Option<&str>) -> Option<Value> {
        if text.is_empty() {
            return Some(Value::Null);
        }
        match ty {
            ColumnType::String => Some(Value::String(text.to_string())),
            ColumnType::Integer => text.trim().parse().ok().map(Value::Integer),
            ColumnType::Double => text.trim().parse().ok().map(Value::Double),
            ColumnType::Decimal => Decimal::parse(text).map(Value::Decimal),
            ColumnType::Date => parse_date(text, date_format).map(Value::Date),
            ColumnType::Binary => Some(Value::Binary(text.as_bytes().to_vec())),
        }
    }
}

fn parse_date(text: &str, format: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), format.unwrap_or(DEFAULT_DATE_FORMAT)).ok()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Date(d) => write!(f, "{}", d.format(DEFAULT_DATE_FORMAT)),
            Value::Binary(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}
