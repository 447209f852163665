//! Column types and the tagged `Value` variant carried by records.
//!
//! The original engine leaned on Python's dynamic typing; spec.md §9
//! calls for re-architecting that as an explicit tagged variant with a
//! coercion table, which is what `Value`/`convert_value` below do.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    Float,
    Date,
    Varchar,
    ArrayFloat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    Int(i64),
    Float(f64),
    Date(String),
    Text(String),
    FloatVec(Vec<f64>),
    Null,
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Date(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float_vec(&self) -> Option<&[f64]> {
        match self {
            Value::FloatVec(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total ordering over comparable values, used by the ordered
    /// indexes (B+ tree, AVL, ISAM). Cross-type comparisons are a
    /// caller error and panic, mirroring the original's implicit
    /// reliance on same-typed keys throughout a column.
    pub fn cmp_key(&self, other: &Value) -> std::cmp::Ordering {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal),
            (Date(a), Date(b)) | (Text(a), Text(b)) => a.cmp(b),
            _ => panic!("cannot compare heterogeneous column values: {self:?} vs {other:?}"),
        }
    }
}

/// Coerces a loosely-typed input value into the column's declared
/// type. VARCHAR truncation to `max_len` is silent; every other
/// mismatch (empty INT/FLOAT/DATE, malformed DATE, wrong shape for
/// ARRAY_FLOAT) is a validation error naming the field.
pub fn convert_value(
    field: &str,
    col_type: ColumnType,
    raw: &serde_json::Value,
    max_len: Option<usize>,
) -> Result<Value> {
    match col_type {
        ColumnType::Int => to_int(field, raw),
        ColumnType::Float => to_float(field, raw),
        ColumnType::Date => to_date(field, raw),
        ColumnType::Varchar => Ok(to_varchar(raw, max_len)),
        ColumnType::ArrayFloat => to_array_float(field, raw),
    }
}

fn to_int(field: &str, raw: &serde_json::Value) -> Result<Value> {
    match raw {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| Error::validation(field, "INT overflow")),
        serde_json::Value::String(s) if !s.is_empty() => s
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::validation(field, format!("invalid INT literal '{s}'"))),
        serde_json::Value::Null | serde_json::Value::String(_) => {
            Err(Error::validation(field, "empty INT value"))
        }
        _ => Err(Error::validation(field, "expected an INT")),
    }
}

fn to_float(field: &str, raw: &serde_json::Value) -> Result<Value> {
    match raw {
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| Error::validation(field, "invalid FLOAT")),
        serde_json::Value::String(s) if !s.is_empty() => s
            .replace(',', ".")
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::validation(field, format!("invalid FLOAT literal '{s}'"))),
        serde_json::Value::Null | serde_json::Value::String(_) => {
            Err(Error::validation(field, "empty FLOAT value"))
        }
        _ => Err(Error::validation(field, "expected a FLOAT")),
    }
}

fn to_date(field: &str, raw: &serde_json::Value) -> Result<Value> {
    let s = match raw {
        serde_json::Value::String(s) if !s.is_empty() => s.trim(),
        _ => return Err(Error::validation(field, "empty DATE value")),
    };
    let parts: Vec<&str> = s.split('-').collect();
    let valid = parts.len() == 3
        && parts[0].len() == 4
        && parts[0].chars().all(|c| c.is_ascii_digit())
        && parts[1].len() == 2
        && parts[1].chars().all(|c| c.is_ascii_digit())
        && parts[2].len() == 2
        && parts[2].chars().all(|c| c.is_ascii_digit());
    if !valid {
        return Err(Error::validation(field, format!("invalid DATE '{s}', expected YYYY-MM-DD")));
    }
    Ok(Value::Date(s.to_string()))
}

fn to_varchar(raw: &serde_json::Value, max_len: Option<usize>) -> Value {
    let s = match raw {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    let truncated = match max_len {
        Some(max) if max > 0 && s.chars().count() > max => s.chars().take(max).collect(),
        _ => s,
    };
    Value::Text(truncated)
}

fn to_array_float(field: &str, raw: &serde_json::Value) -> Result<Value> {
    match raw {
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let f = item
                    .as_f64()
                    .ok_or_else(|| Error::validation(field, "ARRAY_FLOAT element is not numeric"))?;
                out.push(f);
            }
            Ok(Value::FloatVec(out))
        }
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(Value::FloatVec(Vec::new()));
            }
            let parts: Vec<&str> = s.split(',').map(|p| p.trim()).filter(|p| !p.is_empty()).collect();
            let mut out = Vec::with_capacity(parts.len());
            for p in parts {
                let f: f64 = p
                    .parse()
                    .map_err(|_| Error::validation(field, format!("invalid ARRAY_FLOAT element '{p}'")))?;
                out.push(f);
            }
            Ok(Value::FloatVec(out))
        }
        serde_json::Value::Null => Ok(Value::FloatVec(Vec::new())),
        _ => Err(Error::validation(field, "expected an ARRAY_FLOAT")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn varchar_truncates_silently() {
        let v = convert_value("name", ColumnType::Varchar, &json!("hello world"), Some(5)).unwrap();
        assert_eq!(v.as_str(), Some("hello"));
    }

    #[test]
    fn int_overflow_is_validation_error() {
        let err = convert_value("id", ColumnType::Int, &json!("not a number"), None).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn date_requires_iso_shape() {
        assert!(convert_value("d", ColumnType::Date, &json!("2024-01-05"), None).is_ok());
        assert!(convert_value("d", ColumnType::Date, &json!("01/05/2024"), None).is_err());
    }

    #[test]
    fn array_float_parses_comma_separated_string() {
        let v = convert_value("pt", ColumnType::ArrayFloat, &json!("1.0, 2.5"), None).unwrap();
        assert_eq!(v.as_float_vec(), Some(&[1.0, 2.5][..]));
    }
}
