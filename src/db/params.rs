//! Positional binding of [`SqlValue`]s onto backend query objects.
//!
//! `SqlValue::Null` carries no column type. MySQL and SQLite accept a NULL of
//! any declared type, so those bind a plain `Option`. PostgreSQL (and H2 over
//! its wire protocol) type-checks every parameter against the column, so a
//! NULL is sent with the unspecified OID and the server infers the type from
//! where the placeholder appears.

use crate::models::SqlValue;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Encode, MySql, Postgres, Sqlite, Type};

/// NULL whose type the PostgreSQL server resolves from context.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        // OID 0 leaves the parameter type unspecified in the Parse message
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

pub(crate) fn mysql_query<'q>(
    sql: &'q str,
    params: &'q [SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    params.iter().fold(sqlx::query(sql), |query, param| match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Json(v) => query.bind(Json(v)),
    })
}

pub(crate) fn postgres_query<'q>(
    sql: &'q str,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    params.iter().fold(sqlx::query(sql), |query, param| match param {
        SqlValue::Null => query.bind(UntypedNull),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Json(v) => query.bind(Json(v)),
    })
}

pub(crate) fn sqlite_query<'q>(
    sql: &'q str,
    params: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params.iter().fold(sqlx::query(sql), |query, param| match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        // No native JSON type, stored as text
        SqlValue::Json(v) => query.bind(v.to_string()),
    })
}
