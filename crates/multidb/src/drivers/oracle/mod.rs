//! Oracle driver (dialect only).
//!
//! Shared by the `Oracle` and `OracleManaged` providers. No client library is
//! bundled, so connecting reports `UnsupportedProvider`.

mod dialect;

pub use dialect::OracleDialect;
