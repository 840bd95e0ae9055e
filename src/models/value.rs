//! SQL parameter and column values.
//!
//! `SqlValue` is the single value type flowing through the toolkit: builders
//! collect it as positional parameters, the executor binds it to the driver,
//! and decoded rows hold it per column.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parameter or column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// Bound as native JSON on MySQL/PostgreSQL, as text on SQLite
    Json(JsonValue),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Int(v) => Some(*v != 0),
            Self::Text(s) => match s.as_str() {
                "true" | "TRUE" | "t" | "1" => Some(true),
                "false" | "FALSE" | "f" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "'{}'", v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),+ $(,)?) => {
        $(
            impl From<$t> for SqlValue {
                fn from(v: $t) -> Self {
                    SqlValue::Int(i64::from(v))
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::Float(f64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        SqlValue::Bytes(v.to_vec())
    }
}

impl From<JsonValue> for SqlValue {
    fn from(v: JsonValue) -> Self {
        SqlValue::Json(v)
    }
}

impl From<uuid::Uuid> for SqlValue {
    fn from(v: uuid::Uuid) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

/// Build an ordered `Vec<SqlValue>` from heterogeneous expressions.
///
/// ```
/// use sql_toolkit::{params, SqlValue};
///
/// let p = params!["abc-123", 42, true];
/// assert_eq!(p, vec![SqlValue::from("abc-123"), SqlValue::Int(42), SqlValue::Bool(true)]);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::SqlValue>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::SqlValue::from($value)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        assert_eq!(SqlValue::from(7i32), SqlValue::Int(7));
        assert_eq!(SqlValue::from(7u32), SqlValue::Int(7));
        assert_eq!(SqlValue::from("x"), SqlValue::Text("x".to_string()));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(1.5f64)), SqlValue::Float(1.5));
        assert_eq!(SqlValue::from(vec![1u8, 2]), SqlValue::Bytes(vec![1, 2]));
    }

    #[test]
    fn test_params_macro_preserves_order() {
        let p = crate::params!["abc-123", 1, None::<String>];
        assert_eq!(p.len(), 3);
        assert_eq!(p[0].type_name(), "text");
        assert_eq!(p[1].type_name(), "int");
        assert!(p[2].is_null());
        assert!(crate::params![].is_empty());
    }

    #[test]
    fn test_loose_accessors() {
        assert_eq!(SqlValue::Text("12".to_string()).as_i64(), Some(12));
        assert_eq!(SqlValue::Int(0).as_bool(), Some(false));
        assert_eq!(SqlValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(SqlValue::Bytes(vec![]).as_i64(), None);
    }

    #[test]
    fn test_bytes_serialize_as_base64() {
        let json = serde_json::to_string(&SqlValue::Bytes(vec![0, 1, 2])).unwrap();
        assert_eq!(json, "\"AAEC\"");
    }
}
