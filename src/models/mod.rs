//! Data models shared by builders, the executor and the facade.

pub mod row;
pub mod value;

pub use row::{FromSqlValue, Row};
pub use value::SqlValue;
