pub mod connection;
pub mod models;
pub mod service;

pub use connection::{get_connection, in_memory, DbPool};
pub use models::*;

use duckdb::Connection;
use std::sync::MutexGuard;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database Error: {0}")]
    Db(#[from] duckdb::Error),
    #[error("Database lock poisoned")]
    Poisoned,
}

/// Locks the shared connection. Callers must release the guard before the
/// next `.await`.
pub fn lock(pool: &DbPool) -> Result<MutexGuard<'_, Connection>, StoreError> {
    pool.lock().map_err(|_| StoreError::Poisoned)
}
