//! Core abstractions shared by every provider.
//!
//! - [`provider`]: provider identities and engine families
//! - [`schema`]: entity metadata for table generation
//! - [`value`]: owned SQL values and rows
//! - [`traits`]: capability contracts and the connection boundary
//! - [`registry`]: per-provider capability resolution and memoization
//!
//! Driver modules (`drivers/mssql`, `drivers/postgres`, ...) implement the
//! contracts; the registry binds them to provider identities through an
//! explicit dispatch table.

pub mod provider;
pub mod registry;
pub mod schema;
pub mod traits;
pub mod value;

pub use provider::{Engine, ProviderIdentity};
pub use registry::{
    Capability, Constructor, DispatchTable, ProviderConstructors, ProviderServiceRegistry,
    Resolution, ServiceContext,
};
pub use schema::{ColumnMetadata, ColumnType, EntityMetadata};
pub use traits::{
    BulkCopier, BulkLoader, Connection, LoadTarget, QueryTranslator, RowSource, SkipReason,
    SyntaxProvider, TableCreation, TableGenerator, Transaction,
};
pub use value::{Row, SqlValue};
