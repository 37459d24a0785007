//! Firebird driver (dialect only).

mod dialect;

pub use dialect::FirebirdDialect;
