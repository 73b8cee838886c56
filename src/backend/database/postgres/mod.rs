//! PostgreSQL engine.

pub mod backend_impl;
pub mod filter_impl;
pub mod schema;
pub mod type_cache;
pub mod view_impl;

pub use backend_impl::PqxxClient;
pub use filter_impl::PostgresConditionCompiler;
pub use type_cache::TypeOidCache;
pub use view_impl::PgViewRecord;
