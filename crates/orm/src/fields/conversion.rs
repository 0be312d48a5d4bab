//! Value conversion between the application (JSON) and storage.
//!
//! `to_db` is the write direction (`sql_format`), `from_db` the read
//! direction. Dates travel as `YYYY-MM-DD`, datetimes as
//! `YYYY-MM-DD HH:MM:SS` truncated to whole seconds, binaries as base64.
//! JSON `false` stands for "no value" on every non-boolean field.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde_json::Value;

use super::{Field, FieldKind};
use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const TIME_FORMAT: &str = "%H:%M:%S";

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.get(..10).unwrap_or(value), DATE_FORMAT).ok()
}

/// Accepts a space or `T` separator and fractional seconds, drops the fraction
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let normalized = value.replace('T', " ");
    let parsed = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M"))
        .ok()
        .or_else(|| parse_date(value).and_then(|d| d.and_hms_opt(0, 0, 0)))?;
    parsed.with_nanosecond(0)
}

pub fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
        .and_then(|t| t.with_nanosecond(0))
}

/// Round to `scale` decimal places
pub fn round_digits(value: f64, scale: u32) -> f64 {
    let factor = 10f64.powi(scale as i32);
    (value * factor).round() / factor
}

/// Extract a record id from `7`, `[7, "name"]` or `"7"`
pub fn id_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Array(items) => items.first().and_then(id_from_value),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Whether a value means "no value"
pub fn is_empty_value(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Bool(false))
}

impl Field {
    fn type_error(&self, model: &str, value: &Value) -> ModelError {
        ModelError::validation(
            model,
            Some(&self.name),
            format!(
                "Invalid value {} for {} field '{}'",
                value,
                self.kind.value_kind().type_name(),
                self.name
            ),
        )
    }

    /// Application value to storage representation
    pub fn to_db(&self, model: &str, value: &Value) -> OrmResult<DatabaseValue> {
        let kind = self.kind.value_kind();
        if let FieldKind::Boolean = kind {
            return match value {
                Value::Null => Ok(DatabaseValue::Bool(false)),
                Value::Bool(b) => Ok(DatabaseValue::Bool(*b)),
                Value::Number(n) => Ok(DatabaseValue::Bool(n.as_i64().unwrap_or(0) != 0)),
                _ => Err(self.type_error(model, value)),
            };
        }
        if is_empty_value(value) {
            return Ok(DatabaseValue::Null);
        }

        let converted = match kind {
            FieldKind::Integer | FieldKind::BigInteger => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(DatabaseValue::Int64),
                _ => None,
            },
            FieldKind::Float | FieldKind::Numeric => match value {
                Value::Number(n) => n.as_f64().map(|f| {
                    DatabaseValue::Float64(match self.digits {
                        Some((_, scale)) => round_digits(f, scale),
                        None => f,
                    })
                }),
                _ => None,
            },
            FieldKind::Char
            | FieldKind::Text
            | FieldKind::Selection(_)
            | FieldKind::Reference(_) => value.as_str().map(|s| DatabaseValue::String(s.to_string())),
            FieldKind::Date => value.as_str().and_then(parse_date).map(DatabaseValue::Date),
            FieldKind::DateTime => value
                .as_str()
                .and_then(parse_datetime)
                .map(DatabaseValue::DateTime),
            FieldKind::Time => value.as_str().and_then(parse_time).map(DatabaseValue::Time),
            FieldKind::Binary => match value {
                Value::String(s) => BASE64.decode(s).ok().map(DatabaseValue::Bytes),
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .map(DatabaseValue::Bytes),
                _ => None,
            },
            FieldKind::Dict => match value {
                Value::Object(_) => Some(DatabaseValue::String(value.to_string())),
                _ => None,
            },
            FieldKind::Many2One(_) => id_from_value(value).map(DatabaseValue::Int64),
            FieldKind::Boolean
            | FieldKind::One2Many(_)
            | FieldKind::Many2Many(_)
            | FieldKind::Function(_)
            | FieldKind::Property(_) => None,
        };
        converted.ok_or_else(|| self.type_error(model, value))
    }

    /// Storage representation to application value
    pub fn from_db(&self, value: &DatabaseValue) -> Value {
        let kind = self.kind.value_kind();
        if let FieldKind::Boolean = kind {
            return Value::Bool(value.as_bool().unwrap_or(false));
        }
        if value.is_null() {
            return Value::Null;
        }

        match kind {
            FieldKind::Integer | FieldKind::BigInteger | FieldKind::Many2One(_) => {
                value.as_i64().map(Value::from).unwrap_or(Value::Null)
            }
            FieldKind::Float | FieldKind::Numeric => value
                .as_f64()
                .map(|f| match self.digits {
                    Some((_, scale)) => round_digits(f, scale),
                    None => f,
                })
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldKind::Date => match value {
                DatabaseValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
                DatabaseValue::DateTime(dt) => {
                    Value::String(dt.date().format(DATE_FORMAT).to_string())
                }
                DatabaseValue::String(s) => parse_date(s)
                    .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
                    .unwrap_or_else(|| Value::String(s.clone())),
                other => other.to_json(),
            },
            FieldKind::DateTime => match value {
                DatabaseValue::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
                DatabaseValue::String(s) => parse_datetime(s)
                    .map(|dt| Value::String(dt.format(DATETIME_FORMAT).to_string()))
                    .unwrap_or_else(|| Value::String(s.clone())),
                other => other.to_json(),
            },
            FieldKind::Time => match value {
                DatabaseValue::Time(t) => Value::String(t.format(TIME_FORMAT).to_string()),
                DatabaseValue::String(s) => parse_time(s)
                    .map(|t| Value::String(t.format(TIME_FORMAT).to_string()))
                    .unwrap_or_else(|| Value::String(s.clone())),
                other => other.to_json(),
            },
            FieldKind::Binary => match value {
                DatabaseValue::Bytes(b) => Value::String(BASE64.encode(b)),
                DatabaseValue::String(s) => Value::String(BASE64.encode(s.as_bytes())),
                other => other.to_json(),
            },
            FieldKind::Dict => match value {
                DatabaseValue::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
                other => other.to_json(),
            },
            _ => value.to_json(),
        }
    }

    /// JSON form of a stored value, as kept in `ir.property` and fixtures
    pub fn to_storage_json(&self, model: &str, value: &Value) -> OrmResult<Value> {
        let db = self.to_db(model, value)?;
        Ok(self.from_db(&db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_char_round_trip() {
        let mut field = Field::char("Char");
        field.name = "char".to_string();
        let db = field.to_db("test.char", &json!("hello")).unwrap();
        assert_eq!(db, DatabaseValue::String("hello".to_string()));
        assert_eq!(field.from_db(&db), json!("hello"));
        assert_eq!(field.to_db("test.char", &json!(false)).unwrap(), DatabaseValue::Null);
        assert!(field.to_db("test.char", &json!(12)).is_err());
    }

    #[test]
    fn test_datetime_is_truncated_to_seconds() {
        let field = Field::datetime("When");
        let db = field
            .to_db("test.datetime", &json!("2024-05-06T07:08:09.654321"))
            .unwrap();
        assert_eq!(field.from_db(&db), json!("2024-05-06 07:08:09"));
        // SQLite gives text back
        let text = DatabaseValue::String("2024-05-06 07:08:09".to_string());
        assert_eq!(field.from_db(&text), json!("2024-05-06 07:08:09"));
    }

    #[test]
    fn test_numeric_digits() {
        let field = Field::numeric("Amount").digits(16, 2);
        let db = field.to_db("test.numeric", &json!(1.23456)).unwrap();
        assert_eq!(db, DatabaseValue::Float64(1.23));
        assert_eq!(field.from_db(&DatabaseValue::Int64(3)), json!(3.0));
    }

    #[test]
    fn test_boolean_null_is_false() {
        let field = Field::boolean("Active");
        assert_eq!(field.from_db(&DatabaseValue::Null), json!(false));
        assert_eq!(field.from_db(&DatabaseValue::Int64(1)), json!(true));
        assert_eq!(field.to_db("m", &Value::Null).unwrap(), DatabaseValue::Bool(false));
    }

    #[test]
    fn test_binary_is_base64() {
        let field = Field::binary("Data");
        let db = field.to_db("m", &json!("aGVsbG8=")).unwrap();
        assert_eq!(db, DatabaseValue::Bytes(b"hello".to_vec()));
        assert_eq!(field.from_db(&db), json!("aGVsbG8="));
    }

    #[test]
    fn test_dict_and_many2one() {
        let dict = Field::dict("Attributes");
        let db = dict.to_db("m", &json!({"a": [1, 2]})).unwrap();
        assert_eq!(dict.from_db(&db), json!({"a": [1, 2]}));

        let m2o = Field::many2one("Target", "test.target");
        assert_eq!(m2o.to_db("m", &json!([4, "Four"])).unwrap(), DatabaseValue::Int64(4));
        assert_eq!(m2o.to_db("m", &json!(null)).unwrap(), DatabaseValue::Null);
    }
}
