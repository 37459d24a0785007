//! Provider loaders writing one batch at a time.
//!
//! - [`StatementLoader`]: multi-row INSERT statements rendered by the syntax helper
//! - [`CopyLoader`]: PostgreSQL `COPY ... FROM STDIN` in text format

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::core::traits::{BulkLoader, Connection, LoadTarget, SyntaxProvider};
use crate::core::value::{hex_encode, Row, SqlValue};
use crate::error::{DataError, Result};

/// Loader issuing multi-row INSERT statements.
///
/// A batch larger than the dialect's per-statement row limit is split into
/// several statements; the batch transaction or savepoint keeps it atomic.
pub struct StatementLoader {
    syntax: Arc<dyn SyntaxProvider>,
    statements: u64,
}

impl StatementLoader {
    pub fn new(syntax: Arc<dyn SyntaxProvider>) -> Self {
        Self {
            syntax,
            statements: 0,
        }
    }
}

#[async_trait]
impl BulkLoader for StatementLoader {
    async fn load(
        &mut self,
        connection: &dyn Connection,
        target: &LoadTarget<'_>,
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let max_rows = self.syntax.max_rows_per_insert().max(1);
        let mut written = 0u64;
        for chunk in rows.chunks(max_rows) {
            let sql = self
                .syntax
                .insert_rows_sql(target.table, target.columns, chunk)?;
            connection.execute(&sql).await.map_err(|e| {
                with_table_context(e, self.syntax.provider().name(), target.table)
            })?;
            self.statements += 1;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    fn release(&mut self) {
        debug!(
            "{}: statement loader released after {} statements",
            self.syntax.provider(),
            self.statements
        );
    }
}

/// Loader streaming batches through `COPY ... FROM STDIN`.
pub struct CopyLoader {
    syntax: Arc<dyn SyntaxProvider>,
    bytes_sent: u64,
}

impl CopyLoader {
    pub fn new(syntax: Arc<dyn SyntaxProvider>) -> Self {
        Self {
            syntax,
            bytes_sent: 0,
        }
    }

    fn copy_statement(&self, target: &LoadTarget<'_>) -> String {
        let cols: Vec<String> = target
            .columns
            .iter()
            .map(|c| self.syntax.quote_ident(c))
            .collect();
        format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT TEXT)",
            self.syntax.quote_qualified(target.table),
            cols.join(", ")
        )
    }
}

#[async_trait]
impl BulkLoader for CopyLoader {
    async fn load(
        &mut self,
        connection: &dyn Connection,
        target: &LoadTarget<'_>,
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let data = encode_copy_text(rows);
        let len = data.len() as u64;
        let written = connection
            .copy_in(&self.copy_statement(target), data)
            .await
            .map_err(|e| with_table_context(e, self.syntax.provider().name(), target.table))?;
        self.bytes_sent += len;
        Ok(written)
    }

    fn release(&mut self) {
        debug!(
            "{}: COPY loader released after {} bytes",
            self.syntax.provider(),
            self.bytes_sent
        );
    }
}

/// Attach the destination table to execution errors that lack it.
fn with_table_context(err: DataError, provider: &str, table: &str) -> DataError {
    match err {
        DataError::Execution {
            provider: p,
            context,
            source,
        } if !context.contains(table) => DataError::Execution {
            provider: p,
            context: format!("{} (bulk copy into {})", context, table),
            source,
        },
        DataError::Connection { message, .. } => DataError::bulk_copy(provider, table, message),
        other => other,
    }
}

/// Encode rows in COPY text format (tab-separated, `\N` for NULL).
pub(crate) fn encode_copy_text(rows: &[Row]) -> Bytes {
    let mut buf = String::with_capacity(rows.len() * 64);
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                buf.push('\t');
            }
            buf.push_str(&value_to_copy_text(value));
        }
        buf.push('\n');
    }
    Bytes::from(buf)
}

/// Convert SqlValue to text for COPY.
fn value_to_copy_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => (if *b { "t" } else { "f" }).to_string(),
        SqlValue::I16(i) => i.to_string(),
        SqlValue::I32(i) => i.to_string(),
        SqlValue::I64(i) => i.to_string(),
        SqlValue::F32(f) if f.is_nan() => "NaN".to_string(),
        SqlValue::F64(f) if f.is_nan() => "NaN".to_string(),
        SqlValue::F32(f) if f.is_infinite() => infinity(f.is_sign_positive()),
        SqlValue::F64(f) if f.is_infinite() => infinity(f.is_sign_positive()),
        SqlValue::F32(f) => f.to_string(),
        SqlValue::F64(f) => f.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Text(s) => escape_copy_text(s),
        SqlValue::Bytes(b) => format!("\\\\x{}", hex_encode(b)),
        SqlValue::Uuid(u) => u.to_string(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::DateTimeOffset(dto) => dto.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
    }
}

fn infinity(positive: bool) -> String {
    (if positive { "Infinity" } else { "-Infinity" }).to_string()
}

/// Escape text for PostgreSQL COPY.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}
