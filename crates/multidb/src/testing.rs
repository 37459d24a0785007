//! Scripted in-memory connection for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::core::provider::ProviderIdentity;
use crate::core::traits::Connection;
use crate::error::{DataError, Result};

#[derive(Default)]
struct FakeState {
    statements: Vec<String>,
    committed: Vec<String>,
    pending: Vec<String>,
    in_tx: bool,
    /// Pending-insert count when the open savepoint was set.
    savepoint: Option<usize>,
    inserts: usize,
    commits: usize,
    rollbacks: usize,
}

/// Records statements and simulates transactions.
///
/// INSERTs executed inside a transaction only become visible in
/// [`committed_inserts`](Self::committed_inserts) on commit; rolling back to
/// a savepoint drops the inserts made since it. The existence query reports 1
/// once any `CREATE TABLE` statement has run.
pub(crate) struct FakeConnection {
    provider: ProviderIdentity,
    state: Mutex<FakeState>,
    stall_on_insert: Option<usize>,
    fail_on_insert: Option<usize>,
    stalled: Arc<Notify>,
    batch_lock: tokio::sync::Mutex<()>,
}

impl FakeConnection {
    pub(crate) fn new(provider: ProviderIdentity) -> Self {
        Self {
            provider,
            state: Mutex::new(FakeState::default()),
            stall_on_insert: None,
            fail_on_insert: None,
            stalled: Arc::new(Notify::new()),
            batch_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The n-th INSERT (1-based) never completes; [`stalled`](Self::stalled) is notified.
    pub(crate) fn stall_on_insert(mut self, n: usize) -> Self {
        self.stall_on_insert = Some(n);
        self
    }

    /// The n-th INSERT (1-based) fails.
    pub(crate) fn fail_on_insert(mut self, n: usize) -> Self {
        self.fail_on_insert = Some(n);
        self
    }

    pub(crate) fn stalled(&self) -> Arc<Notify> {
        self.stalled.clone()
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub(crate) fn committed_inserts(&self) -> Vec<String> {
        self.state.lock().unwrap().committed.clone()
    }

    pub(crate) fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub(crate) fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let stall = {
            let mut state = self.state.lock().unwrap();
            state.statements.push(sql.to_string());
            if sql.starts_with("SAVEPOINT") || sql.starts_with("SAVE TRANSACTION") {
                state.savepoint = Some(state.pending.len());
                return Ok(0);
            }
            if sql.starts_with("ROLLBACK TO") || sql.starts_with("ROLLBACK TRANSACTION ") {
                let mark = state.savepoint.unwrap_or(0);
                state.pending.truncate(mark);
                return Ok(0);
            }
            if sql.starts_with("RELEASE") {
                state.savepoint = None;
                return Ok(0);
            }
            if !sql.starts_with("INSERT") {
                return Ok(0);
            }
            state.inserts += 1;
            let n = state.inserts;
            if self.fail_on_insert == Some(n) {
                return Err(DataError::execution(
                    &self.provider,
                    "executing INSERT",
                    std::io::Error::new(std::io::ErrorKind::Other, "constraint violation"),
                ));
            }
            if self.stall_on_insert == Some(n) {
                true
            } else {
                if state.in_tx {
                    state.pending.push(sql.to_string());
                } else {
                    state.committed.push(sql.to_string());
                }
                false
            }
        };

        if stall {
            self.stalled.notify_one();
            std::future::pending::<()>().await;
        }
        Ok(1)
    }

    fn batch_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.batch_lock
    }

    async fn query_count(&self, sql: &str) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        let created = state
            .statements
            .iter()
            .any(|s| s.contains("CREATE TABLE"));
        Ok(i64::from(created))
    }

    async fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.statements.push("BEGIN".to_string());
        state.pending.clear();
        state.in_tx = true;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.statements.push("COMMIT".to_string());
        let pending = std::mem::take(&mut state.pending);
        state.committed.extend(pending);
        state.in_tx = false;
        state.savepoint = None;
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.statements.push("ROLLBACK".to_string());
        state.pending.clear();
        state.in_tx = false;
        state.savepoint = None;
        state.rollbacks += 1;
        Ok(())
    }
}
