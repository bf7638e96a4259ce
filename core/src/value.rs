//! Typed values and datatype classification for index rows.
//!
//! Every indexable member is classified into a [`DataTypeCode`], which
//! selects the physical value column an index row is written to. Runtime
//! values travel through the pipeline as [`Value`], a closed tagged union
//! that renders stably for unique-key computation and for the flattened
//! enumerable token format.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opening token wrapped around each element of a flattened enumerable.
pub const ELEMENT_OPEN: &str = "<$";
/// Closing token wrapped around each element of a flattened enumerable.
pub const ELEMENT_CLOSE: &str = "$>";

/// Classification of an indexable member into a physical value family.
///
/// `String`, `Text`, and `Enum` share the string value column; the others
/// each map to a dedicated column. `Bytes` exists only so the expression
/// parser can reject byte-array members with a parse-time error — it never
/// maps to a value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataTypeCode {
    /// Whole numbers (i8 through i64, unsigned variants).
    IntegerNumber,
    /// Floating point and decimal numbers.
    FractalNumber,
    /// Booleans.
    Bool,
    /// Timestamps, stored as RFC 3339 UTC text.
    DateTime,
    /// Uuid identifiers.
    Guid,
    /// Short strings.
    String,
    /// Long text bodies.
    Text,
    /// Enum members, stored by their string rendering.
    Enum,
    /// Byte arrays; rejected at parse time, never indexed.
    Bytes,
}

impl DataTypeCode {
    /// The physical value column this code maps to, or `None` for `Bytes`.
    pub fn value_column(self) -> Option<&'static str> {
        match self {
            Self::IntegerNumber => Some("IntegerValue"),
            Self::FractalNumber => Some("FractalValue"),
            Self::Bool => Some("BoolValue"),
            Self::DateTime => Some("DateTimeValue"),
            Self::Guid => Some("GuidValue"),
            Self::String | Self::Text | Self::Enum => Some("StringValue"),
            Self::Bytes => None,
        }
    }
}

/// A runtime value flowing through the expression and indexing pipeline.
///
/// Values are immutable once constructed. [`Value::render`] produces the
/// stable text rendering used for unique keys and flattened enumerables.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value; stored as SQL NULL, matched only by IS/IS NOT.
    Null,
    /// Whole number.
    Int(i64),
    /// Floating point number.
    Fractal(f64),
    /// Boolean.
    Bool(bool),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// Uuid identifier.
    Guid(Uuid),
    /// String.
    String(String),
}

impl Value {
    /// The datatype family of this value, or `None` for null.
    pub fn type_code(&self) -> Option<DataTypeCode> {
        match self {
            Self::Null => None,
            Self::Int(_) => Some(DataTypeCode::IntegerNumber),
            Self::Fractal(_) => Some(DataTypeCode::FractalNumber),
            Self::Bool(_) => Some(DataTypeCode::Bool),
            Self::DateTime(_) => Some(DataTypeCode::DateTime),
            Self::Guid(_) => Some(DataTypeCode::Guid),
            Self::String(_) => Some(DataTypeCode::String),
        }
    }

    /// Whether this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Stable text rendering: integers and bools in decimal form, timestamps
    /// as RFC 3339 UTC, uuids hyphenated lowercase.
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Int(i) => i.to_string(),
            Self::Fractal(f) => f.to_string(),
            Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Self::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Self::Guid(g) => g.hyphenated().to_string(),
            Self::String(s) => s.clone(),
        }
    }

    /// Wraps this value in the element tokens used by flattened enumerables.
    pub fn wrap_element(&self) -> String {
        format!("{ELEMENT_OPEN}{}{ELEMENT_CLOSE}", self.render())
    }

    /// Concatenates many values into one denormalized element string.
    ///
    /// The token wrapping guarantees a containment probe for `<$v$>` cannot
    /// match across element boundaries or partial values.
    pub fn flatten_many(values: &[Value]) -> String {
        let mut out = String::new();
        for v in values {
            out.push_str(&v.wrap_element());
        }
        out
    }

    /// Converts a JSON leaf into a typed value according to the accessor's
    /// declared datatype. Shapes that do not match the declaration fall back
    /// to the natural JSON interpretation.
    pub fn from_json(json: &serde_json::Value, code: DataTypeCode) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match code {
                DataTypeCode::FractalNumber => {
                    Value::Fractal(n.as_f64().unwrap_or_default())
                }
                _ => n
                    .as_i64()
                    .map(Value::Int)
                    .unwrap_or_else(|| Value::Fractal(n.as_f64().unwrap_or_default())),
            },
            serde_json::Value::String(s) => match code {
                DataTypeCode::DateTime => DateTime::parse_from_rfc3339(s)
                    .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                    .unwrap_or_else(|_| Value::String(s.clone())),
                DataTypeCode::Guid => Uuid::parse_str(s)
                    .map(Value::Guid)
                    .unwrap_or_else(|_| Value::String(s.clone())),
                _ => Value::String(s.clone()),
            },
            // Arrays are fanned out by the accessor before reaching here;
            // objects have no scalar rendering and index as null.
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Value::Null,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Fractal(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}
