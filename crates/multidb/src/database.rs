//! Database facade.
//!
//! A [`Database`] binds one logical handle to a connection and a provider
//! identity. Every dialect-specific operation goes through the shared
//! [`ProviderServiceRegistry`]; the facade never branches on the provider.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::bulk::BulkCopySession;
use crate::core::provider::ProviderIdentity;
use crate::core::registry::{Capability, ProviderServiceRegistry};
use crate::core::schema::EntityMetadata;
use crate::core::traits::{
    BulkCopier, Connection, QueryTranslator, TableCreation, TableGenerator, Transaction,
};
use crate::error::{DataError, Result};
use crate::tenancy::{ConnectionTarget, TenancyResolver};
use crate::translate::SelectQuery;

/// Liveness probe understood by every connectable engine.
const PING_SQL: &str = "SELECT COUNT(*) FROM (SELECT 1 AS probe) AS ping";

/// Opens driver connections for connection targets.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Arc<dyn Connection>>;
}

/// One logical database: handle, target, shared registry and a connection.
///
/// Clones share the connection. Bulk-copy sessions on clones take turns
/// batch by batch; plain statements interleave freely.
#[derive(Clone)]
pub struct Database {
    handle: String,
    target: ConnectionTarget,
    registry: Arc<ProviderServiceRegistry>,
    connection: Arc<dyn Connection>,
}

impl Database {
    /// Wrap an already-open connection.
    pub fn new(
        handle: impl Into<String>,
        target: ConnectionTarget,
        registry: Arc<ProviderServiceRegistry>,
        connection: Arc<dyn Connection>,
    ) -> Self {
        Self {
            handle: handle.into(),
            target,
            registry,
            connection,
        }
    }

    /// Open a single-tenancy handle.
    pub async fn open(
        handle: &str,
        resolver: &TenancyResolver,
        registry: Arc<ProviderServiceRegistry>,
        factory: &dyn ConnectionFactory,
    ) -> Result<Self> {
        let target = resolver.resolve_single(handle)?;
        Self::connect(handle.to_string(), target, registry, factory).await
    }

    /// Open the resolver's default handle.
    pub async fn open_default(
        resolver: &TenancyResolver,
        registry: Arc<ProviderServiceRegistry>,
        factory: &dyn ConnectionFactory,
    ) -> Result<Self> {
        let handle = resolver
            .default_handle()
            .ok_or_else(|| DataError::Config("no default instance configured".to_string()))?;
        Self::open(&handle, resolver, registry, factory).await
    }

    /// Open one facade per shard of a handle, in configuration order.
    ///
    /// Each facade's handle is `<handle>/<shard key>`.
    pub async fn open_shards(
        handle: &str,
        resolver: &TenancyResolver,
        registry: Arc<ProviderServiceRegistry>,
        factory: &dyn ConnectionFactory,
    ) -> Result<Vec<Self>> {
        let shards = resolver.shards(handle)?;
        let mut databases = Vec::with_capacity(shards.len());
        for shard in shards {
            let name = format!("{}/{}", handle, shard.key);
            databases.push(Self::connect(name, shard.target, registry.clone(), factory).await?);
        }
        Ok(databases)
    }

    async fn connect(
        handle: String,
        target: ConnectionTarget,
        registry: Arc<ProviderServiceRegistry>,
        factory: &dyn ConnectionFactory,
    ) -> Result<Self> {
        let connection = factory.connect(&target).await?;
        if connection.provider() != target.provider() {
            return Err(DataError::ProviderMismatch {
                capability: "connection",
                expected: target.provider().to_string(),
                actual: connection.provider().to_string(),
            });
        }
        info!("Opened {} on {}", handle, target);
        Ok(Self::new(handle, target, registry, connection))
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn provider(&self) -> &ProviderIdentity {
        self.target.provider()
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn registry(&self) -> &Arc<ProviderServiceRegistry> {
        &self.registry
    }

    /// Resolve a capability for this database's provider.
    pub fn service<C: Capability + ?Sized>(&self) -> Result<Arc<C>> {
        self.registry.get_service::<C>(self.provider())
    }

    /// Render a structured query in this provider's dialect.
    pub fn translate(&self, query: &SelectQuery) -> Result<String> {
        self.service::<dyn QueryTranslator>()?.translate(query)
    }

    pub async fn table_exists(&self, entity: &EntityMetadata) -> Result<bool> {
        self.service::<dyn TableGenerator>()?
            .exists(self, entity)
            .await
    }

    pub async fn try_create_table(&self, entity: Option<&EntityMetadata>) -> Result<TableCreation> {
        self.service::<dyn TableGenerator>()?
            .try_create(self, entity)
            .await
    }

    /// Open a bulk copy committing each batch on its own.
    pub fn bulk_copy(&self, table: &str, batch_size: usize) -> Result<BulkCopySession<'_>> {
        let copier = self.service::<dyn BulkCopier>()?;
        copier.open_session(self.connection(), None, table, batch_size)
    }

    /// Open a bulk copy inside the caller's transaction.
    pub fn bulk_copy_in<'c>(
        &'c self,
        transaction: &'c Transaction<'c>,
        table: &str,
        batch_size: usize,
    ) -> Result<BulkCopySession<'c>> {
        let copier = self.service::<dyn BulkCopier>()?;
        copier.open_session(self.connection(), Some(transaction), table, batch_size)
    }

    pub async fn begin(&self) -> Result<Transaction<'_>> {
        Transaction::begin(self.connection()).await
    }

    pub async fn execute(&self, sql: &str) -> Result<u64> {
        debug!("{}: {}", self.handle, sql);
        self.connection.execute(sql).await
    }

    /// Round-trip a trivial query and report how long it took.
    pub async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        self.connection.query_count(PING_SQL).await?;
        Ok(start.elapsed())
    }

    pub async fn close(&self) -> Result<()> {
        debug!("Closing {}", self.handle);
        self.connection.close().await
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("handle", &self.handle)
            .field("target", &self.target)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, InstanceConfig, ShardConfig};
    use crate::core::value::SqlValue;
    use crate::testing::FakeConnection;
    use crate::translate::SelectQuery;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct FakeFactory {
        opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ConnectionFactory for FakeFactory {
        async fn connect(&self, target: &ConnectionTarget) -> Result<Arc<dyn Connection>> {
            self.opened
                .lock()
                .unwrap()
                .push(target.connection_string().to_string());
            Ok(Arc::new(FakeConnection::new(target.provider().clone())))
        }
    }

    fn resolver() -> TenancyResolver {
        let config = Config::new()
            .with_instance(InstanceConfig::single("main", "mssql", "Server=main"))
            .with_instance(InstanceConfig::distributed(
                "events",
                "sqlite",
                vec![
                    ShardConfig::keyed("eu", "eu.db"),
                    ShardConfig::keyed("us", "us.db"),
                ],
            ))
            .with_default("main");
        TenancyResolver::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_open_binds_target_provider() {
        let factory = FakeFactory::default();
        let registry = Arc::new(ProviderServiceRegistry::with_builtins());
        let db = Database::open_default(&resolver(), registry, &factory)
            .await
            .unwrap();

        assert_eq!(db.handle(), "main");
        assert_eq!(db.provider(), &ProviderIdentity::mssql());
        assert_eq!(
            db.translate(&SelectQuery::from_table("Movies").limit(5))
                .unwrap(),
            "SELECT TOP 5 * FROM [Movies]"
        );
    }

    #[tokio::test]
    async fn test_open_distributed_handle_as_single_fails() {
        let factory = FakeFactory::default();
        let registry = Arc::new(ProviderServiceRegistry::with_builtins());
        let err = Database::open("events", &resolver(), registry, &factory)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::TenancyModeMismatch { .. }));
        assert!(factory.opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_shards_share_registry_instances() {
        let factory = FakeFactory::default();
        let registry = Arc::new(ProviderServiceRegistry::with_builtins());
        let shards = Database::open_shards("events", &resolver(), registry.clone(), &factory)
            .await
            .unwrap();

        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].handle(), "events/eu");
        assert_eq!(shards[1].handle(), "events/us");
        assert_eq!(*factory.opened.lock().unwrap(), vec!["eu.db", "us.db"]);

        let a = shards[0].service::<dyn BulkCopier>().unwrap();
        let b = shards[1].service::<dyn BulkCopier>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_bulk_copy_in_caller_transaction() {
        let conn = Arc::new(FakeConnection::new(ProviderIdentity::sqlite()));
        let db = Database::new(
            "local",
            ConnectionTarget::new(ProviderIdentity::sqlite(), ":memory:"),
            Arc::new(ProviderServiceRegistry::with_builtins()),
            conn.clone(),
        );

        let tx = db.begin().await.unwrap();
        {
            let mut session = db.bulk_copy_in(&tx, "Movies", 10).unwrap();
            session.add_column_mapping(0, "Name").unwrap();
            session
                .write_rows_async(
                    vec![vec![SqlValue::from("Alien")]].into_iter(),
                    CancellationToken::new(),
                )
                .await
                .unwrap();
        }
        tx.rollback().await.unwrap();

        assert!(conn.committed_inserts().is_empty());
        assert_eq!(conn.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_ping_issues_probe() {
        let conn = Arc::new(FakeConnection::new(ProviderIdentity::postgresql()));
        let db = Database::new(
            "events",
            ConnectionTarget::new(ProviderIdentity::postgresql(), "host=eu"),
            Arc::new(ProviderServiceRegistry::with_builtins()),
            conn.clone(),
        );

        db.ping().await.unwrap();
        assert_eq!(conn.statements(), vec![PING_SQL.to_string()]);
    }
}
