//! Transactions spanning several named tables.
//!
//! Each registered table maps to a shared client. Starting a transaction
//! locks the clients of every named table (each client once, in a fixed
//! order) and keeps them locked until the returned [`TransactionScope`] is
//! committed, rolled back or dropped. Single operations outside a
//! transaction lock a table's client through
//! [`TransactionManager::acquire_table`] and therefore wait for any
//! transaction holding it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::backend::DbInterface;
use crate::error::{DbError, DbErrorCode, DbResult};
use crate::utils::validate_identifier;

/// Client shared between the tables that live on it.
pub type SharedClient = Arc<AsyncMutex<Box<dyn DbInterface>>>;

/// Exclusive access to a client for one operation.
pub type ClientGuard = OwnedMutexGuard<Box<dyn DbInterface>>;

pub fn shared_client(client: Box<dyn DbInterface>) -> SharedClient {
    Arc::new(AsyncMutex::new(client))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Idle,
    InTransaction,
}

struct TableEntry {
    client: SharedClient,
    state: TableState,
}

type Registry = Arc<Mutex<HashMap<String, TableEntry>>>;

fn set_state(registry: &Registry, tables: &[String], state: TableState) {
    match registry.lock() {
        Ok(mut entries) => {
            for table in tables {
                if let Some(entry) = entries.get_mut(table) {
                    entry.state = state;
                }
            }
        }
        Err(e) => warn!(error = %e, "Transaction registry lock poisoned"),
    }
}

fn client_key(client: &SharedClient) -> usize {
    Arc::as_ptr(client) as *const () as usize
}

#[derive(Default)]
pub struct TransactionManager {
    tables: Registry,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `table` as living on `client`.
    pub fn add_table(&self, table: &str, client: SharedClient) -> DbResult<()> {
        validate_identifier(table)?;
        let mut tables = self.tables.lock()?;
        if tables.contains_key(table) {
            return Err(DbError::invalid_query(format!(
                "Table '{}' is already registered",
                table
            )));
        }
        tables.insert(
            table.to_string(),
            TableEntry {
                client,
                state: TableState::Idle,
            },
        );
        Ok(())
    }

    /// Forget `table`. Fails while a transaction holds it.
    pub fn remove_table(&self, table: &str) -> DbResult<()> {
        let mut tables = self.tables.lock()?;
        match tables.get(table) {
            None => Err(unknown_table(table)),
            Some(entry) if entry.state == TableState::InTransaction => {
                Err(DbError::transaction(
                    DbErrorCode::TransactionStartFailed,
                    format!("Table '{}' is in a transaction", table),
                ))
            }
            Some(_) => {
                tables.remove(table);
                Ok(())
            }
        }
    }

    pub fn state(&self, table: &str) -> Option<TableState> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).map(|entry| entry.state))
    }

    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .lock()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Lock the client of `table` for a single operation.
    pub async fn acquire_table(&self, table: &str) -> DbResult<ClientGuard> {
        let client = {
            let tables = self.tables.lock()?;
            tables
                .get(table)
                .map(|entry| Arc::clone(&entry.client))
                .ok_or_else(|| unknown_table(table))?
        };
        Ok(client.lock_owned().await)
    }

    /// Open one transaction on every client behind `tables`.
    ///
    /// Fails with `TransactionStartFailed` if a named table is already in a
    /// transaction, or a name repeats.
    pub async fn start_transaction(&self, tables: &[&str]) -> DbResult<TransactionScope> {
        if tables.is_empty() {
            return Err(DbError::invalid_query("No tables given"));
        }

        let mut groups: Vec<(SharedClient, Vec<String>)> = Vec::new();
        let names: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
        {
            let mut entries = self.tables.lock()?;
            for (index, table) in tables.iter().enumerate() {
                if tables[..index].contains(table) {
                    return Err(DbError::transaction(
                        DbErrorCode::TransactionStartFailed,
                        format!("Table '{}' named twice", table),
                    ));
                }
                let entry = entries.get(*table).ok_or_else(|| unknown_table(table))?;
                if entry.state == TableState::InTransaction {
                    return Err(DbError::transaction(
                        DbErrorCode::TransactionStartFailed,
                        format!("Transaction already started for table '{}'", table),
                    ));
                }
                match groups
                    .iter_mut()
                    .find(|(client, _)| Arc::ptr_eq(client, &entry.client))
                {
                    Some((_, group)) => group.push(table.to_string()),
                    None => groups.push((Arc::clone(&entry.client), vec![table.to_string()])),
                }
            }
            for table in tables {
                if let Some(entry) = entries.get_mut(*table) {
                    entry.state = TableState::InTransaction;
                }
            }
        }
        // A fixed lock order keeps two overlapping scopes from deadlocking.
        groups.sort_by_key(|(client, _)| client_key(client));

        let mut scope = TransactionScope {
            clients: Vec::with_capacity(groups.len()),
            tables: names,
            registry: Arc::clone(&self.tables),
            finished: false,
        };
        for (client, group) in groups {
            let mut guard = client.lock_owned().await;
            let started = if guard.is_transaction_in_progress() {
                Err(DbError::transaction(
                    DbErrorCode::TransactionStartFailed,
                    format!("Client of {:?} already has an open transaction", group),
                ))
            } else {
                guard.start_transaction().await
            };
            if let Err(e) = started {
                drop(guard);
                // Rolls back the clients started so far.
                if let Err(rollback_error) = scope.rollback().await {
                    warn!(error = %rollback_error, "Rollback after failed start also failed");
                }
                return Err(e);
            }
            scope.clients.push((group, guard));
        }
        debug!(tables = ?scope.tables, clients = scope.clients.len(), "Transaction started");
        Ok(scope)
    }
}

fn unknown_table(table: &str) -> DbError {
    DbError::invalid_query(format!("Table '{}' is not registered", table))
}

/// Open transaction over a set of tables.
///
/// Dropping an unfinished scope rolls its transactions back in the
/// background; the clients stay locked until that rollback is done.
pub struct TransactionScope {
    clients: Vec<(Vec<String>, ClientGuard)>,
    tables: Vec<String>,
    registry: Registry,
    finished: bool,
}

impl TransactionScope {
    /// Tables covered by this transaction.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Client of `table`, inside the transaction.
    pub fn table(&mut self, table: &str) -> DbResult<&mut dyn DbInterface> {
        match self
            .clients
            .iter_mut()
            .find(|(group, _)| group.iter().any(|t| t == table))
        {
            Some((_, guard)) => Ok(&mut ***guard),
            None => Err(DbError::invalid_query(format!(
                "Table '{}' is not part of this transaction",
                table
            ))),
        }
    }

    /// Commit every client. When one commit fails the remaining clients are
    /// rolled back and the error is returned.
    pub async fn commit(mut self) -> DbResult<()> {
        self.finished = true;
        let mut failure: Option<DbError> = None;
        for (group, guard) in self.clients.iter_mut() {
            if failure.is_none() {
                if let Err(e) = guard.commit_transaction().await {
                    warn!(tables = ?group, error = %e, "Commit failed");
                    failure = Some(e);
                }
            } else if let Err(e) = guard.rollback_transaction().await {
                warn!(tables = ?group, error = %e, "Rollback after failed commit also failed");
            }
        }
        set_state(&self.registry, &self.tables, TableState::Idle);
        match failure {
            Some(e) => Err(e),
            None => {
                debug!(tables = ?self.tables, "Transaction committed");
                Ok(())
            }
        }
    }

    /// Roll back every client; returns the first failure.
    pub async fn rollback(mut self) -> DbResult<()> {
        self.finished = true;
        let mut failure: Option<DbError> = None;
        for (group, guard) in self.clients.iter_mut() {
            if let Err(e) = guard.rollback_transaction().await {
                warn!(tables = ?group, error = %e, "Rollback failed");
                failure.get_or_insert(e);
            }
        }
        set_state(&self.registry, &self.tables, TableState::Idle);
        match failure {
            Some(e) => Err(e),
            None => {
                debug!(tables = ?self.tables, "Transaction rolled back");
                Ok(())
            }
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        set_state(&self.registry, &self.tables, TableState::Idle);
        let clients = std::mem::take(&mut self.clients);
        if clients.is_empty() {
            return;
        }
        warn!(tables = ?self.tables, "Transaction scope dropped without commit, rolling back");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for (group, mut guard) in clients {
                        if guard.is_transaction_in_progress() {
                            if let Err(e) = guard.rollback_transaction().await {
                                warn!(tables = ?group, error = %e, "Background rollback failed");
                            }
                        }
                    }
                });
            }
            Err(_) => warn!("No runtime to roll back the dropped transaction"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DbInterfaceFactory;
    use crate::models::{Field, Record};

    fn row(id: i32) -> Record {
        Record::from(vec![Field::new("id", id)])
    }

    async fn manager_with_tables(names: &[&str], shared: bool) -> TransactionManager {
        let manager = TransactionManager::new();
        let common = shared_client(DbInterfaceFactory::create_mock_database());
        for name in names {
            let client = if shared {
                Arc::clone(&common)
            } else {
                shared_client(DbInterfaceFactory::create_mock_database())
            };
            client
                .lock()
                .await
                .create_table(name, &row(0))
                .await
                .unwrap();
            manager.add_table(name, client).unwrap();
        }
        manager
    }

    #[tokio::test]
    async fn test_commit_across_clients() {
        let manager = manager_with_tables(&["orders", "items"], false).await;
        let mut scope = manager.start_transaction(&["orders", "items"]).await.unwrap();
        assert_eq!(manager.state("orders"), Some(TableState::InTransaction));

        scope.table("orders").unwrap().insert("orders", &[row(1)]).await.unwrap();
        scope.table("items").unwrap().insert("items", &[row(2)]).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(manager.state("orders"), Some(TableState::Idle));
        let mut items = manager.acquire_table("items").await.unwrap();
        assert_eq!(items.count_all("items").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let manager = manager_with_tables(&["orders"], false).await;
        let mut scope = manager.start_transaction(&["orders"]).await.unwrap();
        scope.table("orders").unwrap().insert("orders", &[row(1)]).await.unwrap();
        scope.rollback().await.unwrap();

        let mut orders = manager.acquire_table("orders").await.unwrap();
        assert_eq!(orders.count_all("orders").await.unwrap(), 0);
        assert!(!orders.is_transaction_in_progress());
    }

    #[tokio::test]
    async fn test_shared_client_started_once() {
        let manager = manager_with_tables(&["orders", "items"], true).await;
        let mut scope = manager.start_transaction(&["items", "orders"]).await.unwrap();
        scope.table("orders").unwrap().insert("orders", &[row(1)]).await.unwrap();
        scope.table("items").unwrap().insert("items", &[row(1)]).await.unwrap();
        scope.commit().await.unwrap();

        let mut client = manager.acquire_table("orders").await.unwrap();
        assert_eq!(client.count_all("items").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let manager = manager_with_tables(&["orders"], false).await;
        let scope = manager.start_transaction(&["orders"]).await.unwrap();
        let err = manager.start_transaction(&["orders"]).await.err().unwrap();
        assert_eq!(err.code(), DbErrorCode::TransactionStartFailed);
        assert!(manager.remove_table("orders").is_err());
        scope.commit().await.unwrap();
        manager.remove_table("orders").unwrap();
    }

    #[tokio::test]
    async fn test_bad_table_lists() {
        let manager = manager_with_tables(&["orders"], false).await;
        let err = manager.start_transaction(&["orders", "orders"]).await.err().unwrap();
        assert!(err.is_transaction_error());
        let err = manager.start_transaction(&["missing"]).await.err().unwrap();
        assert_eq!(err.code(), DbErrorCode::InvalidQuery);
        assert_eq!(manager.state("orders"), Some(TableState::Idle));
    }

    #[tokio::test]
    async fn test_table_outside_scope() {
        let manager = manager_with_tables(&["orders", "items"], false).await;
        let mut scope = manager.start_transaction(&["orders"]).await.unwrap();
        assert!(scope.table("items").is_err());
        scope.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_scope_rolls_back() {
        let manager = manager_with_tables(&["orders"], false).await;
        {
            let mut scope = manager.start_transaction(&["orders"]).await.unwrap();
            scope.table("orders").unwrap().insert("orders", &[row(1)]).await.unwrap();
        }
        assert_eq!(manager.state("orders"), Some(TableState::Idle));

        // Waits for the background rollback to release the client.
        let mut orders = manager.acquire_table("orders").await.unwrap();
        assert!(!orders.is_transaction_in_progress());
        assert_eq!(orders.count_all("orders").await.unwrap(), 0);
    }
}
