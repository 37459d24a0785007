//! SQLite driver.
//!
//! - [`SqliteDialect`]: SQL syntax strategy for SQLite
//! - [`SqliteConnection`]: rusqlite connection (feature `sqlite`, on by default)

#[cfg(feature = "sqlite")]
mod connection;
mod dialect;

#[cfg(feature = "sqlite")]
pub use connection::SqliteConnection;
pub use dialect::SqliteDialect;
