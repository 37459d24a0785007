//! Table generation: existence probe and DDL execution.
//!
//! [`DdlTableGenerator`] renders DDL through the provider's
//! [`SyntaxProvider`] and runs it on the database's connection. The dialect
//! decides how idempotent the statement itself is (`IF NOT EXISTS`,
//! `IF OBJECT_ID(...) IS NULL`, or a plain `CREATE TABLE`); the generator
//! always probes first so no dialect re-issues a create for an existing table.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::provider::ProviderIdentity;
use crate::core::schema::EntityMetadata;
use crate::core::traits::{SkipReason, SyntaxProvider, TableCreation, TableGenerator};
use crate::database::Database;
use crate::error::{DataError, Result};

const CAPABILITY: &str = "table generator";

/// Table generator driven by the provider's syntax helper.
#[derive(Debug, Clone)]
pub struct DdlTableGenerator {
    provider: ProviderIdentity,
}

impl DdlTableGenerator {
    pub fn new(provider: ProviderIdentity) -> Self {
        Self { provider }
    }

    fn check_provider(&self, db: &Database) -> Result<()> {
        if db.provider() != &self.provider {
            return Err(DataError::ProviderMismatch {
                capability: CAPABILITY,
                expected: self.provider.to_string(),
                actual: db.provider().to_string(),
            });
        }
        Ok(())
    }

    fn syntax(&self, db: &Database) -> Result<Option<Arc<dyn SyntaxProvider>>> {
        Ok(db
            .registry()
            .resolve::<dyn SyntaxProvider>(&self.provider)?
            .instance())
    }

    async fn probe(
        &self,
        db: &Database,
        syntax: &dyn SyntaxProvider,
        entity: &EntityMetadata,
    ) -> Result<bool> {
        let sql = syntax.table_exists_sql(entity.schema.as_deref(), &entity.name);
        let count = db.connection().query_count(&sql).await?;
        debug!(
            "{}: probe for {} returned {}",
            self.provider,
            entity.full_name(),
            count
        );
        Ok(count > 0)
    }
}

#[async_trait]
impl TableGenerator for DdlTableGenerator {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    async fn exists(&self, db: &Database, entity: &EntityMetadata) -> Result<bool> {
        self.check_provider(db)?;
        let syntax = self
            .syntax(db)?
            .ok_or_else(|| DataError::unsupported(&self.provider, "syntax provider"))?;
        self.probe(db, syntax.as_ref(), entity).await
    }

    async fn try_create(
        &self,
        db: &Database,
        entity: Option<&EntityMetadata>,
    ) -> Result<TableCreation> {
        self.check_provider(db)?;
        let Some(entity) = entity else {
            debug!("{}: no entity metadata, skipping table creation", self.provider);
            return Ok(TableCreation::Skipped(SkipReason::NoMetadata));
        };
        let Some(syntax) = self.syntax(db)? else {
            debug!(
                "{}: no syntax provider, skipping creation of {}",
                self.provider,
                entity.full_name()
            );
            return Ok(TableCreation::Skipped(SkipReason::NoSyntaxProvider));
        };
        if entity.columns.is_empty() {
            debug!(
                "{}: {} declares no columns, skipping",
                self.provider,
                entity.full_name()
            );
            return Ok(TableCreation::Skipped(SkipReason::NoColumns));
        }

        if self.probe(db, syntax.as_ref(), entity).await? {
            debug!("{}: {} already exists", self.provider, entity.full_name());
            return Ok(TableCreation::AlreadyExists);
        }

        let statements = syntax.create_table_sql(entity);
        for sql in &statements {
            debug!("{}: {}", self.provider, sql);
            db.connection().execute(sql).await?;
        }
        info!("{}: created table {}", self.provider, entity.full_name());
        Ok(TableCreation::Created { statements })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{DispatchTable, ProviderConstructors, ProviderServiceRegistry};
    use crate::core::schema::{ColumnMetadata, ColumnType};
    use crate::tenancy::ConnectionTarget;
    use crate::testing::FakeConnection;

    fn movies() -> EntityMetadata {
        EntityMetadata::new("Movies")
            .with_schema("dbo")
            .column(
                ColumnMetadata::new("Id", ColumnType::Int32)
                    .primary_key()
                    .identity(),
            )
            .column(ColumnMetadata::new(
                "Name",
                ColumnType::String {
                    max_length: Some(200),
                },
            ))
            .column(ColumnMetadata::new("Year", ColumnType::Int32))
    }

    fn database(
        provider: ProviderIdentity,
        registry: ProviderServiceRegistry,
    ) -> (Database, Arc<FakeConnection>) {
        let conn = Arc::new(FakeConnection::new(provider.clone()));
        let db = Database::new(
            "main",
            ConnectionTarget::new(provider, "Server=fake"),
            Arc::new(registry),
            conn.clone(),
        );
        (db, conn)
    }

    #[tokio::test]
    async fn test_mssql_exists_before_and_after_create() {
        let (db, conn) = database(
            ProviderIdentity::mssql(),
            ProviderServiceRegistry::with_builtins(),
        );
        let generator = db.service::<dyn TableGenerator>().unwrap();
        let entity = movies();

        assert!(!generator.exists(&db, &entity).await.unwrap());

        let created = generator.try_create(&db, Some(&entity)).await.unwrap();
        let TableCreation::Created { statements } = created else {
            panic!("expected table to be created, got {created:?}");
        };
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("IF OBJECT_ID(N'[dbo].[Movies]', N'U') IS NULL"));
        assert!(statements[0].contains("[Id] INT IDENTITY(1,1) NOT NULL"));

        assert!(generator.exists(&db, &entity).await.unwrap());
        assert_eq!(
            generator.try_create(&db, Some(&entity)).await.unwrap(),
            TableCreation::AlreadyExists
        );
        assert_eq!(
            conn.statements()
                .iter()
                .filter(|s| s.contains("CREATE TABLE"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_skips_are_not_errors() {
        let (db, conn) = database(
            ProviderIdentity::sqlite(),
            ProviderServiceRegistry::with_builtins(),
        );
        let generator = db.service::<dyn TableGenerator>().unwrap();

        assert_eq!(
            generator.try_create(&db, None).await.unwrap(),
            TableCreation::Skipped(SkipReason::NoMetadata)
        );
        assert_eq!(
            generator
                .try_create(&db, Some(&EntityMetadata::new("Empty")))
                .await
                .unwrap(),
            TableCreation::Skipped(SkipReason::NoColumns)
        );
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_missing_syntax_provider_skips() {
        let provider = ProviderIdentity::firebird();
        let dispatch = DispatchTable::new().with(
            provider.clone(),
            ProviderConstructors::new()
                .table_generator(|ctx| Ok(DdlTableGenerator::new(ctx.provider().clone()))),
        );
        let (db, conn) = database(provider, ProviderServiceRegistry::new(dispatch));
        let generator = db.service::<dyn TableGenerator>().unwrap();

        assert_eq!(
            generator.try_create(&db, Some(&movies())).await.unwrap(),
            TableCreation::Skipped(SkipReason::NoSyntaxProvider)
        );
        assert!(generator.exists(&db, &movies()).await.is_err());
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_generator_rejects_other_provider() {
        let (db, _conn) = database(
            ProviderIdentity::sqlite(),
            ProviderServiceRegistry::with_builtins(),
        );
        let generator = DdlTableGenerator::new(ProviderIdentity::postgresql());
        let err = generator.exists(&db, &movies()).await.unwrap_err();
        assert!(matches!(err, DataError::ProviderMismatch { .. }));
    }
}
