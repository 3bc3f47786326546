//! Typed cell values.
//!
//! Every cell of a [`TypedFrame`](crate::frame::TypedFrame) is a [`Cell`]:
//! either null or a [`Value`] whose variant matches the column's
//! [`DataType`]. Rendering, comparison and JSON conversion live here so that
//! the formula evaluator, the template renderer and the store agree on them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone as _};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::CoreError;
use crate::types::TimeZone;

/// A nullable typed value.
pub type Cell = Option<Value>;

/// Render format for datetimes: `YYYY-MM-DD HH:MM:SS±HH:MM`.
pub const DATETIME_RENDER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// Naive formats accepted on ingest, interpreted in the workflow timezone.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%z"];

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Double,
    Boolean,
    Datetime,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Double => "double",
            DataType::Boolean => "boolean",
            DataType::Datetime => "datetime",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Integer | DataType::Double)
    }

    /// PostgreSQL column type of the backing table.
    pub fn sql_type(self) -> &'static str {
        match self {
            DataType::String => "TEXT",
            DataType::Integer => "BIGINT",
            DataType::Double => "DOUBLE PRECISION",
            DataType::Boolean => "BOOLEAN",
            DataType::Datetime => "TIMESTAMPTZ",
        }
    }

    /// QueryBuilder widget used for operands of this type.
    pub fn input_widget(self) -> &'static str {
        match self {
            DataType::String | DataType::Datetime => "text",
            DataType::Integer | DataType::Double => "number",
            DataType::Boolean => "radio",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" => Ok(DataType::String),
            "integer" => Ok(DataType::Integer),
            "double" => Ok(DataType::Double),
            "boolean" => Ok(DataType::Boolean),
            "datetime" => Ok(DataType::Datetime),
            other => Err(CoreError::Validation(format!("Unknown data type '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A non-null typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Datetime(DateTime<FixedOffset>),
}

/// Hashable identity of a value, used to join frames on key columns.
///
/// Integral doubles hash like the equal integer so that a promoted key
/// column still joins against an integer one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyOf {
    Text(String),
    Int(i64),
    Float(u64),
    Bool(bool),
    Instant(i64, u32),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::String(_) => DataType::String,
            Value::Integer(_) => DataType::Integer,
            Value::Double(_) => DataType::Double,
            Value::Boolean(_) => DataType::Boolean,
            Value::Datetime(_) => DataType::Datetime,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Compare two values. Integers and doubles compare numerically, strings
    /// byte-wise, datetimes as instants. Values of unrelated types are
    /// incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Datetime(a), Value::Datetime(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    pub fn same_as(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    pub fn key_of(&self) -> KeyOf {
        match self {
            Value::String(s) => KeyOf::Text(s.clone()),
            Value::Integer(i) => KeyOf::Int(*i),
            Value::Double(d) if d.fract() == 0.0 && d.abs() < 9.0e15 => KeyOf::Int(*d as i64),
            Value::Double(d) => KeyOf::Float(d.to_bits()),
            Value::Boolean(b) => KeyOf::Bool(*b),
            Value::Datetime(dt) => KeyOf::Instant(dt.timestamp(), dt.timestamp_subsec_nanos()),
        }
    }

    /// Text shown in templates and exports.
    pub fn render(&self, tz: &TimeZone) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Double(d) => render_double(*d),
            Value::Boolean(true) => "True".to_string(),
            Value::Boolean(false) => "False".to_string(),
            Value::Datetime(dt) => dt
                .with_timezone(tz)
                .format(DATETIME_RENDER_FORMAT)
                .to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Datetime(dt) => serde_json::Value::String(dt.to_rfc3339()),
        }
    }

    /// Convert into `data_type` where the conversion is lossless.
    pub fn coerce_to(self, data_type: DataType) -> Option<Value> {
        match (self, data_type) {
            (v, t) if v.data_type() == t => Some(v),
            (Value::Integer(i), DataType::Double) => Some(Value::Double(i as f64)),
            (Value::Double(d), DataType::Integer) if d.fract() == 0.0 && d.abs() < 9.0e15 => {
                Some(Value::Integer(d as i64))
            }
            _ => None,
        }
    }

    /// Parse user-supplied text as a value of `data_type`.
    pub fn parse_as(text: &str, data_type: DataType, tz: &TimeZone) -> Result<Value, CoreError> {
        let trimmed = text.trim();
        let mismatch = || {
            CoreError::TypeMismatch(format!("'{text}' is not a valid {data_type} value"))
        };
        match data_type {
            DataType::String => Ok(Value::String(text.to_string())),
            DataType::Integer => trimmed
                .parse::<i64>()
                .map(Value::Integer)
                .or_else(|_| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .and_then(|d| Value::Double(d).coerce_to(DataType::Integer))
                        .ok_or_else(mismatch)
                }),
            DataType::Double => trimmed
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite())
                .map(Value::Double)
                .ok_or_else(mismatch),
            DataType::Boolean => parse_bool(trimmed).map(Value::Boolean).ok_or_else(mismatch),
            DataType::Datetime => parse_datetime(trimmed, tz)
                .map(Value::Datetime)
                .ok_or_else(mismatch),
        }
    }

    /// Convert an ingest JSON scalar into a cell of `data_type`. Empty strings
    /// and JSON null become null.
    pub fn from_json(
        json: &serde_json::Value,
        data_type: DataType,
        tz: &TimeZone,
    ) -> Result<Cell, CoreError> {
        match json {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(s) if s.is_empty() => Ok(None),
            other => Value::operand_from_json(other, data_type, tz).map(Some),
        }
    }

    /// Like [`Value::from_json`] but keeps empty strings, as formula operands
    /// may compare against `""`.
    pub fn operand_from_json(
        json: &serde_json::Value,
        data_type: DataType,
        tz: &TimeZone,
    ) -> Result<Value, CoreError> {
        let mismatch = || {
            CoreError::TypeMismatch(format!("{json} is not a valid {data_type} value"))
        };
        match (json, data_type) {
            (serde_json::Value::String(s), t) => Value::parse_as(s, t, tz),
            (serde_json::Value::Bool(b), DataType::Boolean) => Ok(Value::Boolean(*b)),
            (serde_json::Value::Bool(b), DataType::String) => {
                Ok(Value::String(if *b { "True" } else { "False" }.to_string()))
            }
            (serde_json::Value::Number(n), DataType::Integer) => n
                .as_i64()
                .map(Value::Integer)
                .or_else(|| n.as_f64().and_then(|d| Value::Double(d).coerce_to(DataType::Integer)))
                .ok_or_else(mismatch),
            (serde_json::Value::Number(n), DataType::Double) => {
                n.as_f64().map(Value::Double).ok_or_else(mismatch)
            }
            (serde_json::Value::Number(n), DataType::String) => Ok(Value::String(n.to_string())),
            (serde_json::Value::Number(n), DataType::Boolean) => match n.as_i64() {
                Some(0) => Ok(Value::Boolean(false)),
                Some(1) => Ok(Value::Boolean(true)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Render a nullable cell; null renders as the empty string.
pub fn render_cell(cell: &Cell, tz: &TimeZone) -> String {
    cell.as_ref().map(|v| v.render(tz)).unwrap_or_default()
}

pub fn cell_to_json(cell: &Cell) -> serde_json::Value {
    cell.as_ref()
        .map(Value::to_json)
        .unwrap_or(serde_json::Value::Null)
}

/// Doubles with a zero fraction keep one decimal (`65.0`).
fn render_double(d: f64) -> String {
    if d.is_finite() && d.fract() == 0.0 && d.abs() < 1.0e16 {
        format!("{d:.1}")
    } else {
        d.to_string()
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a datetime; naive forms are interpreted in `tz`.
pub fn parse_datetime(text: &str, tz: &TimeZone) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return tz.from_local_datetime(&naive).single();
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| tz.from_local_datetime(&naive).single())
}

// ---------------------------------------------------------------------------
// Type inference
// ---------------------------------------------------------------------------

/// Infer the column type of a sequence of ingest JSON scalars.
///
/// Detection order: boolean, integer, double, boolean literals, datetime,
/// string. Nulls and empty strings are ignored; an all-null column is a
/// string column.
pub fn infer_data_type<'a, I>(values: I, tz: &TimeZone) -> DataType
where
    I: IntoIterator<Item = &'a serde_json::Value>,
{
    let present: Vec<&serde_json::Value> = values
        .into_iter()
        .filter(|v| !v.is_null() && v.as_str() != Some(""))
        .collect();
    if present.is_empty() {
        return DataType::String;
    }
    if present.iter().all(|v| v.is_boolean()) {
        return DataType::Boolean;
    }

    let texts: Option<Vec<String>> = present
        .iter()
        .map(|v| match v {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            _ => None,
        })
        .collect();
    let Some(texts) = texts else {
        return DataType::String;
    };

    if texts.iter().all(|t| t.parse::<i64>().is_ok()) {
        DataType::Integer
    } else if texts
        .iter()
        .all(|t| t.parse::<f64>().map(|d| d.is_finite()).unwrap_or(false))
    {
        DataType::Double
    } else if texts
        .iter()
        .all(|t| matches!(t.to_ascii_lowercase().as_str(), "true" | "false"))
    {
        DataType::Boolean
    } else if texts.iter().all(|t| parse_datetime(t, tz).is_some()) {
        DataType::Datetime
    } else {
        DataType::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{parse_time_zone, utc};
    use serde_json::json;

    #[test]
    fn renders_scalars() {
        let tz = utc();
        assert_eq!(Value::Integer(65).render(&tz), "65");
        assert_eq!(Value::Double(65.0).render(&tz), "65.0");
        assert_eq!(Value::Double(2.5).render(&tz), "2.5");
        assert_eq!(Value::Boolean(true).render(&tz), "True");
        assert_eq!(render_cell(&None, &tz), "");
    }

    #[test]
    fn renders_datetime_in_workflow_zone() {
        let tz = parse_time_zone("+10:00").unwrap();
        let dt = parse_datetime("2024-03-01T00:00:00Z", &utc()).unwrap();
        assert_eq!(
            Value::Datetime(dt).render(&tz),
            "2024-03-01 10:00:00+10:00"
        );
    }

    #[test]
    fn naive_datetime_uses_workflow_zone() {
        let tz = parse_time_zone("-05:00").unwrap();
        let dt = parse_datetime("2024-03-01 12:00:00", &tz).unwrap();
        assert_eq!(dt.offset().local_minus_utc(), -18_000);
        assert_eq!(dt.to_rfc3339(), "2024-03-01T12:00:00-05:00");
    }

    #[test]
    fn numeric_compare_crosses_integer_and_double() {
        assert_eq!(
            Value::Integer(50).compare(&Value::Double(50.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::Integer(1).compare(&Value::String("1".into())), None);
        assert_eq!(Value::Double(3.0).key_of(), Value::Integer(3).key_of());
    }

    #[test]
    fn infers_types_in_detection_order() {
        let tz = utc();
        let ints = [json!(1), json!("2"), json!(null)];
        assert_eq!(infer_data_type(&ints, &tz), DataType::Integer);
        let doubles = [json!(1), json!(2.5)];
        assert_eq!(infer_data_type(&doubles, &tz), DataType::Double);
        let bools = [json!(true), json!(false)];
        assert_eq!(infer_data_type(&bools, &tz), DataType::Boolean);
        let literal_bools = [json!("True"), json!("false")];
        assert_eq!(infer_data_type(&literal_bools, &tz), DataType::Boolean);
        let dates = [json!("2024-01-01"), json!("2024-02-01 10:00:00")];
        assert_eq!(infer_data_type(&dates, &tz), DataType::Datetime);
        let strings = [json!("a"), json!(1)];
        assert_eq!(infer_data_type(&strings, &tz), DataType::String);
        let empty = [json!(null), json!("")];
        assert_eq!(infer_data_type(&empty, &tz), DataType::String);
    }

    #[test]
    fn empty_string_ingests_as_null() {
        let tz = utc();
        assert_eq!(Value::from_json(&json!(""), DataType::String, &tz).unwrap(), None);
        assert_eq!(
            Value::from_json(&json!("7"), DataType::Integer, &tz).unwrap(),
            Some(Value::Integer(7))
        );
        assert!(Value::from_json(&json!("x"), DataType::Integer, &tz).is_err());
    }

    #[test]
    fn coerce_never_loses_precision() {
        assert_eq!(
            Value::Integer(2).coerce_to(DataType::Double),
            Some(Value::Double(2.0))
        );
        assert_eq!(Value::Double(2.5).coerce_to(DataType::Integer), None);
        assert_eq!(Value::String("a".into()).coerce_to(DataType::Integer), None);
    }
}
