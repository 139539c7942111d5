//! Database layer
//!
//! Storage for link sessions, devices, users and access tokens on SQLite
//! (default, single-binary deployment) or MySQL. Repositories dispatch on
//! `DatabasePool::driver()`.
//!
//! # Usage
//!
//! ```ignore
//! use qrlink::config::DatabaseConfig;
//! use qrlink::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};

/// Run a store operation with an upper bound on its duration.
///
/// An elapsed timeout is reported as an ordinary storage error so callers
/// treat it like any other transient infrastructure fault.
pub async fn bounded<T, F>(limit: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("Store operation timed out after {:?}", limit)),
    }
}

/// Whether `err` was caused by a UNIQUE constraint rejecting a write.
///
/// Looks through `anyhow` context layers for the underlying `sqlx::Error`.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}
