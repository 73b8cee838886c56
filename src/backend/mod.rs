use crate::config::DatabaseConfig;
use crate::error::DbResult;
use crate::models::{Conditions, Record, ViewRecord};
use async_trait::async_trait;

pub mod database;

pub use database::settings::SearchIndexState;
pub use database::PgConnectParams;

/// Supported storage engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    Mock,
}

/// Storage contract every backend implements.
///
/// One instance owns one physical connection and at most one open
/// transaction. Operations take `&mut self`: an instance is never shared by
/// concurrent callers; hand instances out through the pool or wrap them in
/// the transaction manager instead.
#[async_trait]
pub trait DbInterface: Send {
    /// Engine behind this instance
    fn database_type(&self) -> DatabaseType;

    /// False once the connection was closed with `drop_connect`.
    fn is_connected(&self) -> bool;

    /// Close the physical connection. Every later operation fails with
    /// `ConnectionFailed`.
    async fn drop_connect(&mut self) -> DbResult<()>;

    /// Round trip to check the connection is usable
    async fn health_check(&mut self) -> DbResult<()>;

    // Transaction lifecycle. Out-of-sequence calls fail with a transaction error.

    async fn start_transaction(&mut self) -> DbResult<()>;

    async fn commit_transaction(&mut self) -> DbResult<()>;

    async fn rollback_transaction(&mut self) -> DbResult<()>;

    fn is_transaction_in_progress(&self) -> bool;

    // Schema lifecycle

    /// Create `table` with one column per field of `template`.
    async fn create_table(&mut self, table: &str, template: &Record) -> DbResult<()>;

    async fn remove_table(&mut self, table: &str) -> DbResult<()>;

    async fn check_table(&mut self, table: &str) -> DbResult<bool>;

    async fn truncate_table(&mut self, table: &str) -> DbResult<()>;

    async fn list_tables(&mut self) -> DbResult<Vec<String>>;

    /// Declare `key_fields` unique; they also become the table's conflict fields.
    async fn make_unique_constraint(&mut self, table: &str, key_fields: &[&str]) -> DbResult<()>;

    /// Remember the fields searched by pattern and similarity conditions.
    async fn set_search_fields(&mut self, table: &str, fields: &[&str]) -> DbResult<()>;

    /// Remember the fields upsert resolves conflicts on.
    fn set_conflict_fields(&mut self, table: &str, fields: &[&str]) -> DbResult<()>;

    // Search index lifecycle: setup -> Active, drop -> Dropped, restore -> Active,
    // remove -> Absent (fields forgotten).

    async fn setup_search_index(&mut self, table: &str, fields: &[&str]) -> DbResult<()>;

    async fn drop_search_index(&mut self, table: &str) -> DbResult<()>;

    async fn remove_search_index(&mut self, table: &str) -> DbResult<()>;

    async fn restore_search_index(&mut self, table: &str) -> DbResult<()>;

    fn search_index_state(&self, table: &str) -> SearchIndexState;

    // Data

    async fn insert(&mut self, table: &str, rows: &[Record]) -> DbResult<()>;

    /// Insert and return `returning` for every row, in input order, as stored.
    async fn insert_with_returning(
        &mut self,
        table: &str,
        rows: &[Record],
        returning: &[&str],
    ) -> DbResult<Vec<Record>>;

    /// Insert, overwriting exactly `replace_fields` on conflicting rows.
    async fn upsert(&mut self, table: &str, rows: &[Record], replace_fields: &[&str])
        -> DbResult<()>;

    async fn select(&mut self, table: &str, conditions: &Conditions) -> DbResult<Vec<Record>>;

    async fn view(
        &mut self,
        table: &str,
        conditions: &Conditions,
    ) -> DbResult<Vec<Box<dyn ViewRecord>>>;

    /// Delete matching rows and return how many were deleted.
    async fn remove(&mut self, table: &str, conditions: &Conditions) -> DbResult<u64>;

    async fn count(&mut self, table: &str, conditions: &Conditions) -> DbResult<u32>;

    async fn select_all(&mut self, table: &str) -> DbResult<Vec<Record>> {
        self.select(table, &Conditions::default()).await
    }

    async fn count_all(&mut self, table: &str) -> DbResult<u32> {
        self.count(table, &Conditions::default()).await
    }
}

/// Factory for creating storage instances
pub struct DbInterfaceFactory;

impl DbInterfaceFactory {
    /// Connect a PostgreSQL client.
    ///
    /// When the first connect fails and `create_if_missing` is set, the
    /// database is created through the maintenance connection and the
    /// connect is retried once.
    pub async fn create_pqxx_client(
        params: &PgConnectParams,
        create_if_missing: bool,
    ) -> DbResult<Box<dyn DbInterface>> {
        let client = database::postgres::PqxxClient::connect_or_create(params, create_if_missing)
            .await?;
        Ok(Box::new(client))
    }

    /// In-memory storage for tests of higher layers.
    pub fn create_mock_database() -> Box<dyn DbInterface> {
        Box::new(database::mock::MockDbClient::new())
    }

    /// Build a client from the loaded configuration.
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Box<dyn DbInterface>> {
        Self::create_pqxx_client(&config.connect_params(), config.create_database_if_missing)
            .await
    }
}
