//! Microsoft SQL Server driver.
//!
//! - [`MssqlDialect`]: SQL syntax strategy for MSSQL
//! - [`MssqlConnection`]: Tiberius client from a bb8 pool (feature `mssql`)

#[cfg(feature = "mssql")]
mod connection;
mod dialect;

#[cfg(feature = "mssql")]
pub use connection::{MssqlConnection, TiberiusConnectionManager};
pub use dialect::MssqlDialect;
