//! Storage engines behind [`DbInterface`](crate::backend::DbInterface).
//!
//! ```text
//! filter.rs / settings.rs   engine-neutral condition compiler and table registry
//!     ├── postgres/         PostgreSQL engine
//!     └── mock.rs           in-memory engine for tests
//! ```

pub mod config;
pub mod filter;
pub mod mock;
pub mod postgres;
pub mod settings;

pub use config::PgConnectParams;
pub use mock::MockDbClient;
pub use postgres::PqxxClient;
