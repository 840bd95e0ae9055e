//! Driver row decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column's declared type
//! 2. Backend-specific decoders extract the value as a [`SqlValue`]
//!
//! DECIMAL/NUMERIC values are kept as exact text. Temporal values are
//! rendered as ISO-8601 text.

use crate::dialect::Dialect;
use crate::models::{Row, SqlValue};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo, ValueRef};
use std::fmt::Write as _;
use std::sync::Arc;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, dialect: Dialect) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric first, it overlaps with "numeric" affinity below
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is an affinity, not an exact type
        if dialect == Dialect::Sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("interval") {
        return TypeCategory::Unknown;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.starts_with("timestamp")
        || lower == "datetime"
        || lower == "date"
        || lower.starts_with("time")
    {
        // SQLite stores dates as text or numbers, decode whatever is there
        if dialect == Dialect::Sqlite {
            return TypeCategory::Unknown;
        }
        return TypeCategory::Temporal;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value as exact text.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("numeric")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(pg_numeric_to_string(value.as_bytes()?)?)),
        }
    }
}

/// Render PostgreSQL's binary NUMERIC (base-10000 digit groups) as text.
fn pg_numeric_to_string(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    if bytes.len() < 8 {
        return Err("NUMERIC value shorter than its header".into());
    }
    let word = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
    let ndigits = word(0) as usize;
    let weight = word(2) as i16 as i32;
    let sign = word(4);
    let dscale = word(6) as usize;

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if bytes.len() < 8 + ndigits * 2 {
        return Err("NUMERIC value truncated".into());
    }
    let digits: Vec<u16> = (0..ndigits).map(|i| word(8 + i * 2)).collect();
    let digit = |k: i32| -> u16 {
        if k < 0 {
            0
        } else {
            digits.get(k as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for k in 0..=weight {
            if k == 0 {
                let _ = write!(out, "{}", digit(k));
            } else {
                let _ = write!(out, "{:04}", digit(k));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut k = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit(k));
            k += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

// =============================================================================
// Row decoding
// =============================================================================

/// Driver rows that can be decoded into [`SqlValue`]s.
pub trait DecodeRow: sqlx::Row {
    fn decode_values(&self) -> Vec<SqlValue>;
}

/// Decode a result set, sharing one column-name list between its rows.
pub fn decode_rows<R: DecodeRow>(rows: &[R]) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    rows.iter()
        .map(|r| Row::new(Arc::clone(&columns), r.decode_values()))
        .collect()
}

impl DecodeRow for MySqlRow {
    fn decode_values(&self) -> Vec<SqlValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::MySql);
                mysql::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl DecodeRow for PgRow {
    fn decode_values(&self) -> Vec<SqlValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::PostgreSql);
                postgres::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl DecodeRow for SqliteRow {
    fn decode_values(&self) -> Vec<SqlValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), Dialect::Sqlite);
                sqlite::decode_column(self, idx, category)
            })
            .collect()
    }
}

fn is_null<R: sqlx::Row>(row: &R, idx: usize) -> bool
where
    usize: sqlx::ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> SqlValue {
        if is_null(row, idx) {
            return SqlValue::Null;
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> SqlValue {
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => SqlValue::Text(v.0),
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to decode DECIMAL");
                SqlValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> SqlValue {
        // MySQL decoding is width-strict, try each width in turn
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return SqlValue::Int(v);
        }
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u64, _>(idx) {
            return i64::try_from(v)
                .map(SqlValue::Int)
                .unwrap_or_else(|_| SqlValue::Text(v.to_string()));
        }
        SqlValue::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<bool, _>(idx)
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return SqlValue::Float(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return SqlValue::Float(v.into());
        }
        SqlValue::Null
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<Vec<u8>, _>(idx)
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> SqlValue {
        row.try_get::<serde_json::Value, _>(idx)
            .map(SqlValue::Json)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> SqlValue {
        use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return SqlValue::Text(v.to_rfc3339());
        }
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return SqlValue::Text(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
            return SqlValue::Text(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
            return SqlValue::Text(v.to_string());
        }
        decode_text(row, idx)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            return SqlValue::Text(v);
        }
        // ENUM/SET and friends come back as bytes under some collations
        row.try_get_unchecked::<Vec<u8>, _>(idx)
            .map(|bytes| match String::from_utf8(bytes) {
                Ok(s) => SqlValue::Text(s),
                Err(e) => SqlValue::Bytes(e.into_bytes()),
            })
            .unwrap_or(SqlValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> SqlValue {
        if is_null(row, idx) {
            return SqlValue::Null;
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> SqlValue {
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => SqlValue::Text(v.0),
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to decode NUMERIC");
                SqlValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return SqlValue::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return SqlValue::Int(v);
        }
        SqlValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> SqlValue {
        row.try_get::<bool, _>(idx)
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return SqlValue::Float(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return SqlValue::Float(v.into());
        }
        SqlValue::Null
    }

    fn decode_binary(row: &PgRow, idx: usize) -> SqlValue {
        row.try_get::<Vec<u8>, _>(idx)
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> SqlValue {
        row.try_get::<serde_json::Value, _>(idx)
            .map(SqlValue::Json)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> SqlValue {
        row.try_get::<uuid::Uuid, _>(idx)
            .map(|v| SqlValue::Text(v.to_string()))
            .unwrap_or(SqlValue::Null)
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> SqlValue {
        use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return SqlValue::Text(v.to_rfc3339());
        }
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return SqlValue::Text(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
            return SqlValue::Text(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
            return SqlValue::Text(v.to_string());
        }
        decode_text(row, idx)
    }

    fn decode_text(row: &PgRow, idx: usize) -> SqlValue {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            return SqlValue::Text(v);
        }
        // Types without a Rust mapping: keep text-format payloads, bytes otherwise
        match row.try_get_raw(idx) {
            Ok(raw) if raw.format() == PgValueFormat::Text => raw
                .as_str()
                .map(|s| SqlValue::Text(s.to_string()))
                .unwrap_or(SqlValue::Null),
            Ok(raw) => raw
                .as_bytes()
                .map(|b| SqlValue::Bytes(b.to_vec()))
                .unwrap_or(SqlValue::Null),
            Err(_) => SqlValue::Null,
        }
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> SqlValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return SqlValue::Null,
            Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
            Err(_) => return SqlValue::Null,
        };
        match category {
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            // Declared types are affinities; the stored value decides
            _ => decode_storage(row, idx, &storage),
        }
    }

    fn decode_storage(row: &SqliteRow, idx: usize, storage: &str) -> SqlValue {
        match storage {
            "INTEGER" => row
                .try_get::<i64, _>(idx)
                .map(SqlValue::Int)
                .unwrap_or(SqlValue::Null),
            "REAL" => row
                .try_get::<f64, _>(idx)
                .map(SqlValue::Float)
                .unwrap_or(SqlValue::Null),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(idx)
                .map(SqlValue::Bytes)
                .unwrap_or(SqlValue::Null),
            _ => row
                .try_get::<String, _>(idx)
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
        }
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> SqlValue {
        row.try_get::<bool, _>(idx)
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null)
    }

    fn decode_json(row: &SqliteRow, idx: usize) -> SqlValue {
        match row.try_get::<String, _>(idx) {
            Ok(text) => serde_json::from_str(&text)
                .map(SqlValue::Json)
                .unwrap_or(SqlValue::Text(text)),
            Err(_) => SqlValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT", Dialect::MySql), TypeCategory::Integer);
        assert_eq!(
            categorize_type("BIGINT", Dialect::PostgreSql),
            TypeCategory::Integer
        );
        assert_eq!(categorize_type("TINYINT", Dialect::MySql), TypeCategory::Integer);
        assert_eq!(
            categorize_type("SERIAL", Dialect::PostgreSql),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("DECIMAL", Dialect::MySql), TypeCategory::Decimal);
        assert_eq!(
            categorize_type("NUMERIC", Dialect::PostgreSql),
            TypeCategory::Decimal
        );
        assert_eq!(categorize_type("numeric", Dialect::Sqlite), TypeCategory::Float);
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(categorize_type("jsonb", Dialect::PostgreSql), TypeCategory::Json);
        assert_eq!(categorize_type("UUID", Dialect::PostgreSql), TypeCategory::Uuid);
        assert_eq!(
            categorize_type("TIMESTAMPTZ", Dialect::PostgreSql),
            TypeCategory::Temporal
        );
        assert_eq!(categorize_type("DATETIME", Dialect::Sqlite), TypeCategory::Unknown);
        assert_eq!(categorize_type("VARCHAR", Dialect::MySql), TypeCategory::Text);
        assert_eq!(
            categorize_type("INTERVAL", Dialect::PostgreSql),
            TypeCategory::Unknown
        );
    }

    fn numeric(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ndigits.to_be_bytes());
        out.extend_from_slice(&weight.to_be_bytes());
        out.extend_from_slice(&sign.to_be_bytes());
        out.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            out.extend_from_slice(&d.to_be_bytes());
        }
        out
    }

    #[test]
    fn test_pg_numeric_binary() {
        assert_eq!(
            pg_numeric_to_string(&numeric(2, 0, 0, 2, &[123, 4500])).unwrap(),
            "123.45"
        );
        assert_eq!(
            pg_numeric_to_string(&numeric(1, -1, 0, 2, &[500])).unwrap(),
            "0.05"
        );
        assert_eq!(
            pg_numeric_to_string(&numeric(2, 1, 0x4000, 0, &[1, 2])).unwrap(),
            "-10002"
        );
        assert_eq!(
            pg_numeric_to_string(&numeric(1, 1, 0, 0, &[7])).unwrap(),
            "70000"
        );
        assert_eq!(pg_numeric_to_string(&numeric(0, 0, 0xC000, 0, &[])).unwrap(), "NaN");
        assert!(pg_numeric_to_string(&[0, 1]).is_err());
    }
}
