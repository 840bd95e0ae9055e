//! Backend-agnostic decoded rows.

use crate::error::{DbError, DbResult};
use crate::models::SqlValue;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A decoded result row.
///
/// Column names are shared between all rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a column. Exact match first, then case-insensitive
    /// (H2 and some drivers report upper-cased labels).
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(column))
            })
    }

    /// Raw value of a column by name.
    pub fn value(&self, column: &str) -> Option<&SqlValue> {
        self.index_of(column).map(|idx| &self.values[idx])
    }

    /// Typed value of a column by name.
    pub fn get<T: FromSqlValue>(&self, column: &str) -> DbResult<T> {
        let idx = self
            .index_of(column)
            .ok_or_else(|| DbError::invalid_input(format!("Column not found: {}", column)))?;
        self.get_at(idx)
            .map_err(|e| DbError::invalid_input(format!("Column '{}': {}", column, e)))
    }

    /// Typed value of a column by position.
    pub fn get_at<T: FromSqlValue>(&self, idx: usize) -> DbResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            DbError::invalid_input(format!(
                "Column index {} out of bounds (len: {})",
                idx,
                self.values.len()
            ))
        })?;
        T::from_sql_value(value)
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Convert to a JSON object keyed by column name.
    pub fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(name, value)| {
                let json = match value {
                    SqlValue::Json(v) => v.clone(),
                    other => serde_json::to_value(other).unwrap_or(JsonValue::Null),
                };
                (name.clone(), json)
            })
            .collect()
    }
}

/// Conversion from a decoded column value into a Rust type.
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self>;
}

fn mismatch(expected: &str, value: &SqlValue) -> DbError {
    DbError::invalid_input(format!(
        "expected {}, found {}",
        expected,
        value.type_name()
    ))
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self> {
        Ok(value.clone())
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self> {
        value.as_i64().ok_or_else(|| mismatch("integer", value))
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self> {
        let v = i64::from_sql_value(value)?;
        i32::try_from(v).map_err(|_| DbError::invalid_input(format!("{} overflows i32", v)))
    }
}

impl FromSqlValue for u64 {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self> {
        let v = i64::from_sql_value(value)?;
        u64::try_from(v).map_err(|_| DbError::invalid_input(format!("{} is negative", v)))
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self> {
        value.as_f64().ok_or_else(|| mismatch("float", value))
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self> {
        value.as_bool().ok_or_else(|| mismatch("boolean", value))
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Text(s) => Ok(s.clone()),
            SqlValue::Int(v) => Ok(v.to_string()),
            SqlValue::Float(v) => Ok(v.to_string()),
            SqlValue::Bool(v) => Ok(v.to_string()),
            SqlValue::Json(v) => Ok(v.to_string()),
            SqlValue::Bytes(b) => String::from_utf8(b.clone())
                .map_err(|_| DbError::invalid_input("binary value is not valid UTF-8")),
            SqlValue::Null => Err(mismatch("text", value)),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Bytes(b) => Ok(b.clone()),
            SqlValue::Text(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(mismatch("bytes", value)),
        }
    }
}

impl FromSqlValue for JsonValue {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self> {
        match value {
            SqlValue::Json(v) => Ok(v.clone()),
            SqlValue::Text(s) => serde_json::from_str(s)
                .map_err(|e| DbError::invalid_input(format!("invalid JSON text: {}", e))),
            SqlValue::Null => Ok(JsonValue::Null),
            other => serde_json::to_value(other)
                .map_err(|e| DbError::internal(format!("JSON conversion failed: {}", e))),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> DbResult<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_sql_value(value).map(Some)
        }
    }
}
