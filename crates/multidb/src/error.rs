//! Error types for the data access layer.

use thiserror::Error;

/// Boxed driver error carried unchanged as the `source` of an error.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for data access operations.
///
/// Every variant names the provider and the capability, table or handle
/// involved so that a multi-dialect deployment can be diagnosed from the
/// message alone.
#[derive(Error, Debug)]
pub enum DataError {
    /// No dialect mapping exists for the requested capability.
    #[error("Provider {provider} does not support capability '{capability}'")]
    UnsupportedProvider {
        provider: String,
        capability: &'static str,
    },

    /// A capability was registered twice without requesting overwrite.
    #[error("Capability '{capability}' is already registered for provider {provider}")]
    DuplicateRegistration {
        provider: String,
        capability: &'static str,
    },

    /// Two bulk-copy column mappings target the same destination column.
    #[error("Duplicate column mapping for {provider} table {table}: column '{column}' is already mapped")]
    DuplicateMapping {
        provider: String,
        table: String,
        column: String,
    },

    /// An asynchronous bulk copy was cancelled mid-flight.
    #[error("Bulk copy into {table} on {provider} cancelled after {rows_written} rows")]
    Cancelled {
        provider: String,
        table: String,
        rows_written: u64,
    },

    /// A logical handle was resolved with the wrong tenancy mode.
    #[error("Handle '{handle}' is configured for {actual} tenancy but was resolved as {expected}")]
    TenancyModeMismatch {
        handle: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// No tenancy entry exists for the logical handle.
    #[error("No database instance configured for handle '{0}'")]
    UnknownHandle(String),

    /// A distributed handle has no shard with the requested key.
    #[error("Handle '{handle}' has no shard with key '{key}'")]
    UnknownShard { handle: String, key: String },

    /// A provider type string could not be mapped to a known provider.
    #[error("Unknown provider type: '{0}'")]
    UnknownProvider(String),

    /// A capability bound to one provider was used with another.
    #[error("Capability '{capability}' is bound to {expected} but was used with {actual}")]
    ProviderMismatch {
        capability: &'static str,
        expected: String,
        actual: String,
    },

    /// Bulk copy could not proceed (mapping shape, released session, ...).
    #[error("Bulk copy into {table} on {provider} failed: {message}")]
    BulkCopy {
        provider: String,
        table: String,
        message: String,
    },

    /// The destination engine rejected a statement.
    #[error("{provider} error while {context}: {source}")]
    Execution {
        provider: String,
        context: String,
        #[source]
        source: DriverError,
    },

    /// Connecting to a target failed.
    #[error("Connection to {provider} failed: {message}")]
    Connection { provider: String, message: String },

    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Blocking call made from a context that cannot block.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DataError {
    /// Create an UnsupportedProvider error.
    pub fn unsupported(provider: impl ToString, capability: &'static str) -> Self {
        DataError::UnsupportedProvider {
            provider: provider.to_string(),
            capability,
        }
    }

    /// Wrap a driver error with provider and operation context.
    pub fn execution(
        provider: impl ToString,
        context: impl Into<String>,
        source: impl Into<DriverError>,
    ) -> Self {
        DataError::Execution {
            provider: provider.to_string(),
            context: context.into(),
            source: source.into(),
        }
    }

    /// Create a Connection error.
    pub fn connection(provider: impl ToString, message: impl ToString) -> Self {
        DataError::Connection {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a BulkCopy error.
    pub fn bulk_copy(
        provider: impl ToString,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        DataError::BulkCopy {
            provider: provider.to_string(),
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DataError::Cancelled { .. })
    }

    /// Process exit code for command-line front ends.
    pub fn exit_code(&self) -> u8 {
        match self {
            DataError::Config(_) | DataError::Yaml(_) | DataError::UnknownProvider(_) => 1,
            DataError::TenancyModeMismatch { .. }
            | DataError::UnknownHandle(_)
            | DataError::UnknownShard { .. } => 2,
            DataError::Execution { .. }
            | DataError::Connection { .. }
            | DataError::BulkCopy { .. }
            | DataError::Cancelled { .. } => 3,
            DataError::UnsupportedProvider { .. }
            | DataError::DuplicateRegistration { .. }
            | DataError::DuplicateMapping { .. }
            | DataError::ProviderMismatch { .. }
            | DataError::Runtime(_) => 4,
            DataError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for data access operations.
pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_names_provider_and_capability() {
        let err = DataError::unsupported("Firebird", "bulk copier");
        let msg = err.to_string();
        assert!(msg.contains("Firebird"));
        assert!(msg.contains("bulk copier"));
    }

    #[test]
    fn test_execution_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = DataError::execution("MsSql", "creating table orders", io);
        assert!(std::error::Error::source(&err).is_some());
        let detailed = err.format_detailed();
        assert!(detailed.contains("creating table orders"));
        assert!(detailed.contains("Caused by"));
        assert!(detailed.contains("denied"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(DataError::Config("x".into()).exit_code(), 1);
        assert_eq!(DataError::UnknownHandle("main".into()).exit_code(), 2);
        assert_eq!(DataError::connection("Sqlite", "refused").exit_code(), 3);
        assert_eq!(
            DataError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x")).exit_code(),
            7
        );
    }

    #[test]
    fn test_cancelled_is_cancelled() {
        let err = DataError::Cancelled {
            provider: "PostgreSql".into(),
            table: "events".into(),
            rows_written: 4,
        };
        assert!(err.is_cancelled());
        assert!(!DataError::Config("x".into()).is_cancelled());
    }
}
