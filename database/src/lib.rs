pub mod db_connection_pool;
pub mod tables;

pub use db_connection_pool::DbConnection;
pub use db_connection_pool::DbConnectionPool;
pub use db_connection_pool::ping_database;
pub use db_connection_pool::run_pending_migrations;

/// A diesel error that happened while talking to PostgreSQL
#[derive(Debug, PartialEq, thiserror::Error)]
#[error(transparent)]
pub struct DatabaseError(#[from] pub diesel::result::Error);
