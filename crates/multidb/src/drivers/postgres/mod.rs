//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PgConnection`]: pooled tokio-postgres client with COPY support
//!   (feature `postgres`)

#[cfg(feature = "postgres")]
mod connection;
mod dialect;

#[cfg(feature = "postgres")]
pub use connection::PgConnection;
pub use dialect::PostgresDialect;
