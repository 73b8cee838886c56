use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Connection, Postgres, Row};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::filter_impl::PostgresConditionCompiler;
use super::schema::{self, InsertStatement, OnConflict};
use super::type_cache::TypeOidCache;
use super::view_impl::{decode_record, PgViewRecord};
use crate::backend::database::config::PgConnectParams;
use crate::backend::database::filter::ConditionCompiler;
use crate::backend::database::settings::{SearchIndexState, TableRegistry};
use crate::backend::{DatabaseType, DbInterface};
use crate::error::{map_sqlx_error, DbError, DbErrorCode, DbResult};
use crate::logging::log_statement;
use crate::models::{Conditions, FieldValue, Record, SqlType, ViewRecord};
use crate::utils::validate_identifier;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// PostgreSQL storage client over a single physical connection.
///
/// Transactions are plain `BEGIN`/`COMMIT`/`ROLLBACK` statements on that
/// connection; every statement issued in between belongs to the transaction.
pub struct PqxxClient {
    conn: Option<PgConnection>,
    params: PgConnectParams,
    compiler: PostgresConditionCompiler,
    types: Arc<TypeOidCache>,
    tables: TableRegistry,
    in_transaction: bool,
    transaction_failed: bool,
}

impl PqxxClient {
    /// Open the connection and resolve the type OIDs.
    pub async fn connect(params: &PgConnectParams) -> DbResult<Self> {
        let url = params.make_connect_string()?;
        let mut conn = PgConnection::connect(&url)
            .await
            .map_err(|e| connect_error(params, e))?;
        let types = TypeOidCache::load(&mut conn).await?;

        info!(
            host = %params.host,
            port = params.port,
            database = %params.db_name,
            cached_types = types.len(),
            "Connected to PostgreSQL"
        );

        Ok(Self {
            conn: Some(conn),
            params: params.clone(),
            compiler: PostgresConditionCompiler::new(),
            types: Arc::new(types),
            tables: TableRegistry::new(),
            in_transaction: false,
            transaction_failed: false,
        })
    }

    /// Connect, creating the database first if the connect fails and
    /// `create_if_missing` is set.
    pub async fn connect_or_create(
        params: &PgConnectParams,
        create_if_missing: bool,
    ) -> DbResult<Self> {
        match Self::connect(params).await {
            Ok(client) => Ok(client),
            Err(e) if create_if_missing && e.code() == DbErrorCode::ConnectionFailed => {
                warn!(
                    database = %params.db_name,
                    error = %e,
                    "Connect failed, creating database and retrying"
                );
                Self::create_database(params).await?;
                Self::connect(params).await
            }
            Err(e) => Err(e),
        }
    }

    /// Create `params.db_name` through the maintenance database.
    pub async fn create_database(params: &PgConnectParams) -> DbResult<()> {
        let sql = schema::create_database_sql(&params.db_name, &params.login)?;
        let maintenance = params.maintenance();
        let mut conn = PgConnection::connect(&maintenance.make_connect_string()?)
            .await
            .map_err(|e| connect_error(&maintenance, e))?;

        let started = Instant::now();
        let result = sqlx::query(&sql)
            .execute(&mut conn)
            .await
            .map_err(map_sqlx_error);
        log_statement(&sql, 0, started);
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close maintenance connection");
        }
        result?;

        info!(database = %params.db_name, "Database created");
        Ok(())
    }

    pub fn connect_params(&self) -> &PgConnectParams {
        &self.params
    }

    pub fn type_cache(&self) -> &TypeOidCache {
        &self.types
    }

    fn connection(&mut self) -> DbResult<&mut PgConnection> {
        self.conn.as_mut().ok_or_else(|| {
            DbError::connection(DbErrorCode::ConnectionFailed, "Connection is closed")
        })
    }

    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[FieldValue]) -> DbResult<u64> {
        let started = Instant::now();
        let query = bind_all(sqlx::query(sql), params)?;
        let result = query.execute(&mut *self.connection()?).await;
        match result {
            Ok(done) => {
                log_statement(sql, done.rows_affected(), started);
                Ok(done.rows_affected())
            }
            Err(e) => Err(self.statement_failed(e)),
        }
    }

    async fn fetch(&mut self, sql: &str, params: &[FieldValue]) -> DbResult<Vec<PgRow>> {
        let started = Instant::now();
        let query = bind_all(sqlx::query(sql), params)?;
        let result = query.fetch_all(&mut *self.connection()?).await;
        match result {
            Ok(rows) => {
                log_statement(sql, rows.len() as u64, started);
                Ok(rows)
            }
            Err(e) => Err(self.statement_failed(e)),
        }
    }

    /// Run one of the `SELECT EXISTS (...)` catalog queries.
    async fn fetch_exists(&mut self, sql: &str, name: &str) -> DbResult<bool> {
        let rows = self
            .fetch(sql, &[FieldValue::Text(name.to_string())])
            .await?;
        match rows.first() {
            Some(row) => row.try_get::<bool, _>(0).map_err(map_sqlx_error),
            None => Ok(false),
        }
    }

    /// A failed statement aborts the open transaction on the server side.
    fn statement_failed(&mut self, error: sqlx::Error) -> DbError {
        if self.in_transaction {
            self.transaction_failed = true;
        }
        map_sqlx_error(error)
    }

    fn search_fields_for(&self, table: &str, conditions: &Conditions) -> DbResult<Vec<String>> {
        if conditions.needs_search_fields() {
            Ok(self.tables.search_fields(table)?.to_vec())
        } else {
            Ok(Vec::new())
        }
    }

    async fn create_search_indexes(&mut self, table: &str, fields: &[String]) -> DbResult<()> {
        self.execute(schema::TRGM_EXTENSION_SQL, &[]).await?;
        for sql in schema::create_search_index_sql(table, fields)? {
            self.execute(&sql, &[]).await?;
        }
        Ok(())
    }

    async fn drop_search_indexes(&mut self, table: &str) -> DbResult<()> {
        for sql in schema::drop_search_index_sql(table)? {
            self.execute(&sql, &[]).await?;
        }
        Ok(())
    }

    /// Start a transaction for a multi-statement write unless one is open.
    async fn begin_implicit(&mut self, statements: usize) -> DbResult<bool> {
        if statements > 1 && !self.in_transaction {
            self.start_transaction().await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn finish_implicit<T>(&mut self, implicit: bool, result: DbResult<T>) -> DbResult<T> {
        if !implicit {
            return result;
        }
        match result {
            Ok(value) => {
                self.commit_transaction().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = self.rollback_transaction().await {
                    warn!(error = %rollback_error, "Rollback after failed write also failed");
                }
                Err(e)
            }
        }
    }

    /// Run `statement` over `rows` in parameter-limit sized chunks.
    async fn write_chunks(
        &mut self,
        table: &str,
        rows: &[Record],
        statement: InsertStatement<'_>,
    ) -> DbResult<Vec<PgRow>> {
        validate_identifier(table)?;
        let columns = InsertStatement::columns(rows)?;
        let chunk_size = InsertStatement::max_rows_per_statement(columns.len());
        let chunk_count = rows.len().div_ceil(chunk_size);

        let implicit = self.begin_implicit(chunk_count).await?;
        let mut returned = Vec::new();
        let mut result = Ok(());
        for chunk in rows.chunks(chunk_size) {
            let step = match statement.build(chunk) {
                Ok((sql, params)) => self.fetch(&sql, &params).await,
                Err(e) => Err(e),
            };
            match step {
                Ok(rows) => returned.extend(rows),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.finish_implicit(implicit, result.map(|_| returned))
            .await
    }
}

fn connect_error(params: &PgConnectParams, error: sqlx::Error) -> DbError {
    DbError::connection(
        DbErrorCode::ConnectionFailed,
        format!(
            "Failed to connect to {}:{}/{}: {}",
            params.host, params.port, params.db_name, error
        ),
    )
}

fn bind_all<'q>(mut query: PgQuery<'q>, params: &[FieldValue]) -> DbResult<PgQuery<'q>> {
    for value in params {
        query = bind_value(query, value)?;
    }
    Ok(query)
}

fn bind_value<'q>(query: PgQuery<'q>, value: &FieldValue) -> DbResult<PgQuery<'q>> {
    let query = match value {
        FieldValue::Int(v) => query.bind(*v),
        FieldValue::BigInt(v) => query.bind(*v),
        FieldValue::Double(v) => query.bind(*v),
        FieldValue::Bool(v) => query.bind(*v),
        FieldValue::Text(v) => query.bind(v.clone()),
        FieldValue::Timestamp(v) => query.bind(*v),
        FieldValue::Json(v) => query.bind(v.clone()),
        FieldValue::Uuid(id) => query.bind(id.to_uuid()?),
        FieldValue::Null(sql_type) => match sql_type {
            SqlType::Int => query.bind(None::<i32>),
            SqlType::BigInt => query.bind(None::<i64>),
            SqlType::DoublePrecision => query.bind(None::<f64>),
            SqlType::Boolean => query.bind(None::<bool>),
            SqlType::Text => query.bind(None::<String>),
            SqlType::Timestamp => query.bind(None::<chrono::NaiveDateTime>),
            SqlType::Jsonb => query.bind(None::<serde_json::Value>),
            SqlType::Uuid => query.bind(None::<uuid::Uuid>),
        },
    };
    Ok(query)
}

#[async_trait]
impl DbInterface for PqxxClient {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn drop_connect(&mut self) -> DbResult<()> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return Ok(()),
        };
        if self.in_transaction {
            warn!(database = %self.params.db_name, "Closing connection with an open transaction");
        }
        self.in_transaction = false;
        self.transaction_failed = false;
        conn.close().await.map_err(|e| {
            DbError::connection(DbErrorCode::DisconnectionFailed, e.to_string())
        })?;
        info!(database = %self.params.db_name, "Connection closed");
        Ok(())
    }

    async fn health_check(&mut self) -> DbResult<()> {
        self.fetch("SELECT 1", &[]).await?;
        Ok(())
    }

    async fn start_transaction(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::transaction(
                DbErrorCode::TransactionStartFailed,
                "Transaction is already in progress",
            ));
        }
        self.execute("BEGIN", &[])
            .await
            .map_err(|e| DbError::transaction(DbErrorCode::TransactionStartFailed, e.message()))?;
        self.in_transaction = true;
        self.transaction_failed = false;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::transaction(
                DbErrorCode::TransactionCommitFailed,
                "No transaction in progress",
            ));
        }

        if self.transaction_failed {
            let rollback = self.execute("ROLLBACK", &[]).await;
            self.in_transaction = false;
            self.transaction_failed = false;
            rollback.map_err(|e| {
                DbError::transaction(DbErrorCode::TransactionRollbackFailed, e.message())
            })?;
            return Err(DbError::transaction(
                DbErrorCode::SystemRollback,
                "Transaction was aborted by a failed statement and has been rolled back",
            ));
        }

        let result = self.execute("COMMIT", &[]).await;
        self.in_transaction = false;
        result.map_err(|e| DbError::transaction(DbErrorCode::TransactionCommitFailed, e.message()))?;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::transaction(
                DbErrorCode::TransactionRollbackFailed,
                "No transaction in progress",
            ));
        }
        let result = self.execute("ROLLBACK", &[]).await;
        self.in_transaction = false;
        self.transaction_failed = false;
        result.map_err(|e| {
            DbError::transaction(DbErrorCode::TransactionRollbackFailed, e.message())
        })?;
        Ok(())
    }

    fn is_transaction_in_progress(&self) -> bool {
        self.in_transaction
    }

    async fn create_table(&mut self, table: &str, template: &Record) -> DbResult<()> {
        let sql = schema::create_table_sql(table, template)?;
        self.execute(&sql, &[]).await?;
        info!(table, columns = template.len(), "Table created");
        Ok(())
    }

    async fn remove_table(&mut self, table: &str) -> DbResult<()> {
        let sql = schema::drop_table_sql(table)?;
        self.execute(&sql, &[]).await?;
        self.tables.forget(table);
        info!(table, "Table removed");
        Ok(())
    }

    async fn check_table(&mut self, table: &str) -> DbResult<bool> {
        validate_identifier(table)?;
        self.fetch_exists(schema::CHECK_TABLE_SQL, table).await
    }

    async fn truncate_table(&mut self, table: &str) -> DbResult<()> {
        let sql = schema::truncate_table_sql(table)?;
        self.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn list_tables(&mut self) -> DbResult<Vec<String>> {
        let rows = self.fetch(schema::LIST_TABLES_SQL, &[]).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(map_sqlx_error))
            .collect()
    }

    async fn make_unique_constraint(&mut self, table: &str, key_fields: &[&str]) -> DbResult<()> {
        let name = schema::unique_constraint_name(table, key_fields)?;
        let sql = schema::add_unique_constraint_sql(table, key_fields)?;

        if self.fetch_exists(schema::CONSTRAINT_EXISTS_SQL, &name).await? {
            info!(table, constraint = %name, "Unique constraint already present");
        } else {
            self.execute(&sql, &[]).await?;
            info!(table, constraint = %name, "Unique constraint created");
        }
        self.tables.set_conflict_fields(table, key_fields)
    }

    async fn set_search_fields(&mut self, table: &str, fields: &[&str]) -> DbResult<()> {
        validate_identifier(table)?;
        let index = schema::search_index_name(table);
        validate_identifier(&index)?;
        let state = if self.fetch_exists(schema::INDEX_EXISTS_SQL, &index).await? {
            SearchIndexState::Active
        } else {
            SearchIndexState::Dropped
        };
        self.tables.set_search_fields(table, fields, state)
    }

    fn set_conflict_fields(&mut self, table: &str, fields: &[&str]) -> DbResult<()> {
        self.tables.set_conflict_fields(table, fields)
    }

    async fn setup_search_index(&mut self, table: &str, fields: &[&str]) -> DbResult<()> {
        validate_identifier(table)?;
        let owned: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        // Validate everything before touching the existing index.
        schema::create_search_index_sql(table, &owned)?;

        self.drop_search_indexes(table).await?;
        self.create_search_indexes(table, &owned).await?;
        self.tables
            .set_search_fields(table, fields, SearchIndexState::Active)?;
        info!(table, fields = ?fields, "Search index set up");
        Ok(())
    }

    async fn drop_search_index(&mut self, table: &str) -> DbResult<()> {
        self.tables.check_drop(table)?;
        self.drop_search_indexes(table).await?;
        self.tables.set_search_state(table, SearchIndexState::Dropped);
        info!(table, "Search index dropped");
        Ok(())
    }

    async fn remove_search_index(&mut self, table: &str) -> DbResult<()> {
        self.tables.check_remove(table)?;
        self.drop_search_indexes(table).await?;
        self.tables.set_search_state(table, SearchIndexState::Absent);
        info!(table, "Search index removed");
        Ok(())
    }

    async fn restore_search_index(&mut self, table: &str) -> DbResult<()> {
        self.tables.check_restore(table)?;
        let fields = self.tables.search_fields(table)?.to_vec();
        self.create_search_indexes(table, &fields).await?;
        self.tables.set_search_state(table, SearchIndexState::Active);
        info!(table, "Search index restored");
        Ok(())
    }

    fn search_index_state(&self, table: &str) -> SearchIndexState {
        self.tables.search_state(table)
    }

    async fn insert(&mut self, table: &str, rows: &[Record]) -> DbResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.write_chunks(table, rows, InsertStatement::new(table))
            .await?;
        Ok(())
    }

    async fn insert_with_returning(
        &mut self,
        table: &str,
        rows: &[Record],
        returning: &[&str],
    ) -> DbResult<Vec<Record>> {
        if returning.is_empty() {
            return Err(DbError::invalid_query("No fields to return"));
        }
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let returned = self
            .write_chunks(table, rows, InsertStatement::new(table).returning(returning))
            .await?;
        returned
            .iter()
            .map(|row| decode_record(row, &self.types, true))
            .collect()
    }

    async fn upsert(
        &mut self,
        table: &str,
        rows: &[Record],
        replace_fields: &[&str],
    ) -> DbResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let conflict_fields = self.tables.conflict_fields(table)?.to_vec();
        let statement = InsertStatement::new(table).on_conflict(OnConflict {
            conflict_fields: &conflict_fields,
            replace_fields,
        });
        self.write_chunks(table, rows, statement).await?;
        Ok(())
    }

    async fn select(&mut self, table: &str, conditions: &Conditions) -> DbResult<Vec<Record>> {
        let search_fields = self.search_fields_for(table, conditions)?;
        let compiled = self.compiler.compile(conditions, &search_fields)?;
        let sql = schema::select_sql(table, &compiled.suffix())?;
        let rows = self.fetch(&sql, &compiled.params).await?;
        rows.iter()
            .map(|row| decode_record(row, &self.types, false))
            .collect()
    }

    async fn view(
        &mut self,
        table: &str,
        conditions: &Conditions,
    ) -> DbResult<Vec<Box<dyn ViewRecord>>> {
        let search_fields = self.search_fields_for(table, conditions)?;
        let compiled = self.compiler.compile(conditions, &search_fields)?;
        let sql = schema::select_sql(table, &compiled.suffix())?;
        let rows = self.fetch(&sql, &compiled.params).await?;
        Ok(rows
            .into_iter()
            .map(|row| Box::new(PgViewRecord::new(row, Arc::clone(&self.types))) as Box<dyn ViewRecord>)
            .collect())
    }

    async fn remove(&mut self, table: &str, conditions: &Conditions) -> DbResult<u64> {
        let search_fields = self.search_fields_for(table, conditions)?;
        let compiled = self.compiler.compile_filter(conditions, &search_fields)?;
        let sql = schema::delete_sql(table, &compiled.where_clause)?;
        self.execute(&sql, &compiled.params).await
    }

    async fn count(&mut self, table: &str, conditions: &Conditions) -> DbResult<u32> {
        let search_fields = self.search_fields_for(table, conditions)?;
        let compiled = self.compiler.compile_filter(conditions, &search_fields)?;
        let sql = schema::count_sql(table, &compiled.where_clause)?;
        let rows = self.fetch(&sql, &compiled.params).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.try_get(0).map_err(map_sqlx_error)?,
            None => 0,
        };
        u32::try_from(count)
            .map_err(|_| DbError::data_conversion(format!("Row count {} exceeds u32", count)))
    }
}
