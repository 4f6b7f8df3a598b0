use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::{error::FieldFailure, schema::ColumnType};

pub const DEFAULT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%d/%m/%Y", "%m/%d/%Y"];
pub const CANONICAL_DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Null,
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.0}")
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format(CANONICAL_DATE_FORMAT).to_string(),
            Value::Null => String::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null and the empty string both count as "no data".
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::Null => "null",
        }
    }

    /// Numeric view of the value; strings are parsed.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Integer(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) => Some(*d),
            Value::Float(f) => Decimal::from_f64(*f),
            Value::String(s) => parse_decimal(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Decimal(_) | Value::Float(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

/// Ordered field-name to value mapping. A name that is not present is absent,
/// which is distinct from a present [`Value::Null`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_populated(&self, name: &str) -> bool {
        self.get(name).is_some_and(|value| !value.is_blank())
    }

    /// Sets a field, keeping its original position when it already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(field, _)| *field == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Renders the named fields in order, absent fields as empty strings.
    pub fn render_row(&self, headers: &[String]) -> Vec<String> {
        headers
            .iter()
            .map(|name| self.get(name).map(Value::as_display).unwrap_or_default())
            .collect()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

pub fn parse_decimal(value: &str) -> Option<Decimal> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

pub fn parse_naive_date<S: AsRef<str>>(value: &str, formats: &[S]) -> Option<NaiveDate> {
    let trimmed = value.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt.as_ref()).ok())
}

pub fn default_date_formats() -> Vec<String> {
    DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect()
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Converts a value to the declared column type. Null stays null; an empty
/// string becomes null for every non-string type.
pub fn coerce(value: &Value, ty: &ColumnType, date_formats: &[String]) -> Result<Value, FieldFailure> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if let Value::String(s) = value
        && s.trim().is_empty()
        && *ty != ColumnType::String
    {
        return Ok(Value::Null);
    }
    let mismatch = || FieldFailure::TypeCoercion {
        value: value.as_display(),
        target: ty.as_str().to_string(),
    };
    let coerced = match ty {
        ColumnType::String => match value {
            Value::String(_) => value.clone(),
            other => Value::String(other.as_display()),
        },
        ColumnType::Integer => match value {
            Value::Integer(_) => value.clone(),
            Value::Boolean(_) | Value::Date(_) => return Err(mismatch()),
            other => {
                let decimal = other.to_decimal().ok_or_else(mismatch)?;
                if !decimal.fract().is_zero() {
                    return Err(mismatch());
                }
                Value::Integer(decimal.to_i64().ok_or_else(mismatch)?)
            }
        },
        ColumnType::Decimal => match value {
            Value::Decimal(_) => value.clone(),
            Value::Boolean(_) | Value::Date(_) => return Err(mismatch()),
            other => Value::Decimal(other.to_decimal().ok_or_else(mismatch)?),
        },
        ColumnType::Float => match value {
            Value::Float(_) => value.clone(),
            Value::Integer(i) => Value::Float(*i as f64),
            Value::Decimal(d) => Value::Float(d.to_f64().ok_or_else(mismatch)?),
            Value::String(s) => Value::Float(s.trim().parse().map_err(|_| mismatch())?),
            _ => return Err(mismatch()),
        },
        ColumnType::Boolean => match value {
            Value::Boolean(_) => value.clone(),
            Value::Integer(0) => Value::Boolean(false),
            Value::Integer(1) => Value::Boolean(true),
            Value::String(s) => Value::Boolean(parse_boolean(s).ok_or_else(mismatch)?),
            _ => return Err(mismatch()),
        },
        ColumnType::Date => match value {
            Value::Date(_) => value.clone(),
            Value::String(_) | Value::Integer(_) => {
                let raw = value.as_display();
                let parsed =
                    parse_naive_date(&raw, date_formats).ok_or_else(|| FieldFailure::DateFormat {
                        value: raw.clone(),
                        accepted: date_formats.join(", "),
                    })?;
                Value::Date(parsed)
            }
            _ => return Err(mismatch()),
        },
    };
    Ok(coerced)
}

/// Types a raw text cell. Unparsable text is kept as a string so that schema
/// validation can report it instead of the reader failing.
pub fn type_raw_value(raw: &str, ty: &ColumnType, date_formats: &[String]) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    coerce(&Value::String(raw.to_string()), ty, date_formats)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Accepts any YAML scalar and keeps its textual form.
pub(crate) fn deserialize_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    scalar_to_string(&value).ok_or_else(|| de::Error::custom("expected a scalar value"))
}

pub(crate) fn deserialize_optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(other) => scalar_to_string(&other)
            .map(Some)
            .ok_or_else(|| de::Error::custom("expected a scalar value")),
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
