pub mod backend;
pub mod bulk;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod pool;
pub mod transaction;
pub mod utils;

// Re-export commonly used types for easier access
pub use backend::{DatabaseType, DbInterface, DbInterfaceFactory, PgConnectParams, SearchIndexState};
pub use bulk::bulk_insert;
pub use config::DatabaseConfig;
pub use error::{decode_error, DbError, DbErrorCode, DbResult};
pub use models::{Conditions, Field, FieldValue, Identifier, Record, SqlType, ViewRecord};
pub use pool::DbInterfacePool;
pub use transaction::{TransactionManager, TransactionScope};
