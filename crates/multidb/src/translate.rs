//! Structured SELECT queries and the generic translator.
//!
//! [`SelectQuery`] is the small query description the translator capability
//! accepts. [`SqlTranslator`] renders it through the provider's
//! [`SyntaxProvider`], so every dialect gets translation from its syntax
//! helper alone.

use std::sync::Arc;

use crate::core::provider::ProviderIdentity;
use crate::core::traits::{QueryTranslator, SyntaxProvider};
use crate::error::Result;

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// A single-table SELECT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectQuery {
    /// Schema name.
    pub schema: Option<String>,
    /// Table name.
    pub table: String,
    /// Columns to select; empty selects `*`.
    pub columns: Vec<String>,
    /// Raw WHERE predicate, rendered as-is.
    pub filter: Option<String>,
    /// Ordering terms.
    pub order_by: Vec<OrderBy>,
    /// Maximum rows to return.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.filter = Some(predicate.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Translator rendering through a provider's syntax helper.
pub struct SqlTranslator {
    syntax: Arc<dyn SyntaxProvider>,
}

impl SqlTranslator {
    pub fn new(syntax: Arc<dyn SyntaxProvider>) -> Self {
        Self { syntax }
    }
}

impl QueryTranslator for SqlTranslator {
    fn provider(&self) -> &ProviderIdentity {
        self.syntax.provider()
    }

    fn translate(&self, query: &SelectQuery) -> Result<String> {
        let syntax = &self.syntax;

        let cols = if query.columns.is_empty() {
            "*".to_string()
        } else {
            query
                .columns
                .iter()
                .map(|c| syntax.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!(
            "SELECT {} FROM {}",
            cols,
            syntax.qualify(query.schema.as_deref(), &query.table)
        );

        if let Some(ref filter) = query.filter {
            if !filter.is_empty() {
                sql.push_str(&format!(" WHERE {}", filter));
            }
        }

        if !query.order_by.is_empty() {
            let terms = query
                .order_by
                .iter()
                .map(|o| {
                    let col = syntax.quote_ident(&o.column);
                    if o.descending {
                        format!("{} DESC", col)
                    } else {
                        col
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {}", terms));
        }

        Ok(syntax.paginate(
            &sql,
            query.limit,
            query.offset,
            !query.order_by.is_empty(),
        ))
    }
}
