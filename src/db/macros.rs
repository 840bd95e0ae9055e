//! Backend dispatch macros.
//!
//! Expands to a `match` over the `DbPool` variants so per-backend code stays
//! linear and readable. Zero runtime overhead.

/// Generate one match arm per `DbPool` variant.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.size(),
///     Postgres(p) => p.size(),
///     Sqlite(p) => p.size(),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
