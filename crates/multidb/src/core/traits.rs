//! Capability contracts and the connection boundary.
//!
//! Every dialect-specific behavior sits behind one of these traits and is
//! resolved per provider through the
//! [`ProviderServiceRegistry`](super::registry::ProviderServiceRegistry):
//!
//! - [`SyntaxProvider`]: identifier quoting, type names, literals, paging, DDL text
//! - [`QueryTranslator`]: renders a structured [`SelectQuery`] to dialect SQL
//! - [`TableGenerator`]: existence probe and table creation
//! - [`BulkCopier`]: opens [`BulkCopySession`]s against a connection
//!
//! The [`Connection`] trait is the consumed driver boundary. Drivers live in
//! `drivers/<engine>` and implement it over their native client.

use async_trait::async_trait;
use bytes::Bytes;

use crate::bulk::BulkCopySession;
use crate::database::Database;
use crate::error::{DataError, Result};
use crate::translate::SelectQuery;

use super::provider::ProviderIdentity;
use super::schema::{ColumnMetadata, EntityMetadata};
use super::value::{hex_encode, Row, SqlValue};

/// SQL syntax strategy for one provider.
///
/// Default methods implement the ANSI-ish behavior most engines share;
/// dialects override where they differ.
pub trait SyntaxProvider: Send + Sync {
    /// Provider this syntax helper is bound to.
    fn provider(&self) -> &ProviderIdentity;

    /// Quote an identifier (table name, column name, etc.).
    ///
    /// - MsSql: `[identifier]`
    /// - MySql: `` `identifier` ``
    /// - everything else: `"identifier"`
    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quote a possibly schema-qualified name.
    fn qualify(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) if !schema.is_empty() => {
                format!("{}.{}", self.quote_ident(schema), self.quote_ident(name))
            }
            _ => self.quote_ident(name),
        }
    }

    /// Quote a dotted name such as `dbo.Movies`, one part at a time.
    fn quote_qualified(&self, dotted: &str) -> String {
        dotted
            .split('.')
            .map(|part| self.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Render the column's type name.
    fn column_type(&self, column: &ColumnMetadata) -> String;

    /// Clause appended to an identity column's definition, if any.
    fn identity_clause(&self) -> Option<&'static str> {
        Some("GENERATED BY DEFAULT AS IDENTITY")
    }

    /// Query returning a single `COUNT(*)`: non-zero when the table exists.
    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String;

    /// Prefix of the CREATE statement (e.g. `CREATE TABLE IF NOT EXISTS`).
    fn create_table_prefix(&self) -> &'static str {
        "CREATE TABLE"
    }

    /// Render one column definition.
    fn column_definition(&self, column: &ColumnMetadata, _entity: &EntityMetadata) -> String {
        let mut def = format!(
            "{} {}",
            self.quote_ident(&column.name),
            self.column_type(column)
        );
        if column.identity {
            if let Some(clause) = self.identity_clause() {
                def.push(' ');
                def.push_str(clause);
            }
        }
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }

    /// Table-level primary key constraint, if the entity declares a key.
    fn primary_key_constraint(&self, entity: &EntityMetadata) -> Option<String> {
        let pk = entity.primary_key();
        if pk.is_empty() {
            return None;
        }
        let cols: Vec<String> = pk.iter().map(|c| self.quote_ident(&c.name)).collect();
        Some(format!("PRIMARY KEY ({})", cols.join(", ")))
    }

    /// DDL statements creating the entity's table, in execution order.
    fn create_table_sql(&self, entity: &EntityMetadata) -> Vec<String> {
        vec![create_table_statement(self, entity)]
    }

    /// Quote a string literal.
    fn string_literal(&self, s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    /// Render a binary literal.
    fn binary_literal(&self, b: &[u8]) -> String {
        format!("X'{}'", hex_encode(b))
    }

    fn bool_literal(&self, v: bool) -> String {
        (if v { "1" } else { "0" }).to_string()
    }

    fn date_literal(&self, v: &chrono::NaiveDate) -> String {
        format!("'{}'", v.format("%Y-%m-%d"))
    }

    fn time_literal(&self, v: &chrono::NaiveTime) -> String {
        format!("'{}'", v.format("%H:%M:%S%.f"))
    }

    fn datetime_literal(&self, v: &chrono::NaiveDateTime) -> String {
        format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.f"))
    }

    fn datetime_offset_literal(&self, v: &chrono::DateTime<chrono::FixedOffset>) -> String {
        format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.f %:z"))
    }

    /// Render a value as an inline SQL literal.
    ///
    /// Fails for non-finite floats, which no supported engine accepts inline.
    fn literal(&self, value: &SqlValue) -> Result<String> {
        Ok(match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => self.bool_literal(*v),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) if v.is_finite() => v.to_string(),
            SqlValue::F64(v) if v.is_finite() => v.to_string(),
            SqlValue::F32(_) | SqlValue::F64(_) => {
                return Err(DataError::execution(
                    self.provider(),
                    "rendering literal",
                    format!("non-finite {} value cannot be inlined", value.kind()),
                ))
            }
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Text(s) => self.string_literal(s),
            SqlValue::Bytes(b) => self.binary_literal(b),
            SqlValue::Uuid(u) => self.string_literal(&u.to_string()),
            SqlValue::Date(v) => self.date_literal(v),
            SqlValue::Time(v) => self.time_literal(v),
            SqlValue::DateTime(v) => self.datetime_literal(v),
            SqlValue::DateTimeOffset(v) => self.datetime_offset_literal(v),
        })
    }

    /// Maximum rows rendered into one INSERT statement.
    fn max_rows_per_insert(&self) -> usize {
        1000
    }

    /// Render one multi-row INSERT for `rows` (already in column order).
    fn insert_rows_sql(&self, table: &str, columns: &[String], rows: &[Row]) -> Result<String> {
        let cols: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let rendered: Result<Vec<String>> = row.iter().map(|v| self.literal(v)).collect();
            values.push(format!("({})", rendered?.join(", ")));
        }
        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.quote_qualified(table),
            cols.join(", "),
            values.join(", ")
        ))
    }

    /// Set savepoint `name` inside an open transaction.
    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVEPOINT {}", name)
    }

    /// Undo everything since savepoint `name`, keeping the transaction open.
    fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", name)
    }

    /// Discard savepoint `name`; `None` where the engine has no release statement.
    fn release_savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("RELEASE SAVEPOINT {}", name))
    }

    /// Apply row limiting to a rendered SELECT.
    ///
    /// `has_order` tells dialects that require an ORDER BY for offset paging
    /// whether one is already present.
    fn paginate(
        &self,
        sql: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        has_order: bool,
    ) -> String;
}

/// Render `CREATE TABLE` from a syntax helper's column and key rendering.
///
/// Dialects overriding [`SyntaxProvider::create_table_sql`] call this to
/// wrap the plain statement.
pub fn create_table_statement<S>(syntax: &S, entity: &EntityMetadata) -> String
where
    S: SyntaxProvider + ?Sized,
{
    let mut parts: Vec<String> = entity
        .columns
        .iter()
        .map(|c| syntax.column_definition(c, entity))
        .collect();
    if let Some(pk) = syntax.primary_key_constraint(entity) {
        parts.push(pk);
    }
    format!(
        "{} {} (\n    {}\n)",
        syntax.create_table_prefix(),
        syntax.qualify(entity.schema.as_deref(), &entity.name),
        parts.join(",\n    ")
    )
}

/// Renders structured queries to the provider's SQL.
pub trait QueryTranslator: Send + Sync {
    fn provider(&self) -> &ProviderIdentity;

    fn translate(&self, query: &SelectQuery) -> Result<String>;
}

/// Why a table creation was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The caller supplied no entity metadata.
    NoMetadata,
    /// The provider has no syntax helper to render DDL with.
    NoSyntaxProvider,
    /// The entity declares no columns.
    NoColumns,
}

/// Outcome of [`TableGenerator::try_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableCreation {
    /// The table was created by executing `statements` in order.
    Created { statements: Vec<String> },
    /// The probe found the table; nothing was executed.
    AlreadyExists,
    /// Nothing to do; not an error.
    Skipped(SkipReason),
}

impl TableCreation {
    pub fn is_created(&self) -> bool {
        matches!(self, TableCreation::Created { .. })
    }
}

/// Existence probe and table creation for one provider.
#[async_trait]
pub trait TableGenerator: Send + Sync {
    fn provider(&self) -> &ProviderIdentity;

    /// Whether the entity's table exists on the database's connection.
    async fn exists(&self, db: &Database, entity: &EntityMetadata) -> Result<bool>;

    /// Create the entity's table unless it already exists.
    async fn try_create(
        &self,
        db: &Database,
        entity: Option<&EntityMetadata>,
    ) -> Result<TableCreation>;
}

/// Opens bulk-copy sessions for one provider.
pub trait BulkCopier: Send + Sync {
    fn provider(&self) -> &ProviderIdentity;

    /// Open a session writing into `table` in batches of `batch_size` rows.
    ///
    /// With `transaction` set, every batch runs inside the caller's
    /// transaction and the caller owns commit/rollback; otherwise each batch
    /// is committed on its own.
    fn open_session<'c>(
        &self,
        connection: &'c dyn Connection,
        transaction: Option<&'c Transaction<'c>>,
        table: &str,
        batch_size: usize,
    ) -> Result<BulkCopySession<'c>>;
}

/// A live connection to one database.
///
/// Implementations serialize statements internally; `&self` methods may be
/// called from any task.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Provider of the connected engine.
    fn provider(&self) -> &ProviderIdentity;

    /// Execute a statement, returning the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Run a query whose first column of the first row is an integer count.
    async fn query_count(&self, sql: &str) -> Result<i64>;

    async fn begin(&self) -> Result<()> {
        self.execute("BEGIN").await.map(|_| ())
    }

    async fn commit(&self) -> Result<()> {
        self.execute("COMMIT").await.map(|_| ())
    }

    async fn rollback(&self) -> Result<()> {
        self.execute("ROLLBACK").await.map(|_| ())
    }

    /// Lock a bulk-copy session holds from `begin` to `commit`/`rollback` of
    /// each batch it owns. Sessions sharing a connection take turns on it.
    fn batch_lock(&self) -> &tokio::sync::Mutex<()>;

    /// Whether [`copy_in`](Connection::copy_in) is available.
    fn supports_copy(&self) -> bool {
        false
    }

    /// Stream `data` into a `COPY ... FROM STDIN` statement.
    async fn copy_in(&self, _statement: &str, _data: Bytes) -> Result<u64> {
        Err(DataError::unsupported(self.provider(), "copy in"))
    }

    /// Close the connection. Further calls may fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A transaction on a borrowed connection.
///
/// Dropping an unfinished transaction does not roll back (that needs an
/// await); it logs a warning and leaves cleanup to the driver.
pub struct Transaction<'c> {
    connection: &'c dyn Connection,
    done: bool,
}

impl<'c> Transaction<'c> {
    /// Begin a transaction on `connection`.
    pub async fn begin(connection: &'c dyn Connection) -> Result<Self> {
        connection.begin().await?;
        Ok(Self {
            connection,
            done: false,
        })
    }

    pub fn connection(&self) -> &'c dyn Connection {
        self.connection
    }

    pub async fn commit(mut self) -> Result<()> {
        self.done = true;
        self.connection.commit().await
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.done = true;
        self.connection.rollback().await
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!(
                "{} transaction dropped without commit or rollback",
                self.connection.provider()
            );
        }
    }
}

/// Destination of one loaded batch.
#[derive(Debug, Clone, Copy)]
pub struct LoadTarget<'a> {
    /// Destination table (dotted name, unquoted).
    pub table: &'a str,
    /// Destination columns, matching the order of every row's values.
    pub columns: &'a [String],
}

/// Provider-specific loader writing one batch at a time.
#[async_trait]
pub trait BulkLoader: Send + Sync {
    /// Write `rows` (already projected to `target.columns`), returning rows written.
    async fn load(
        &mut self,
        connection: &dyn Connection,
        target: &LoadTarget<'_>,
        rows: &[Row],
    ) -> Result<u64>;

    /// Free loader resources. Called exactly once per session.
    fn release(&mut self) {}
}

/// Pull-based source of rows for bulk copy.
pub trait RowSource: Send {
    fn next_row(&mut self) -> Result<Option<Row>>;
}

impl<I> RowSource for I
where
    I: Iterator<Item = Row> + Send,
{
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.next())
    }
}
