//! Device repository
//!
//! Database operations for linked devices.
//!
//! This module provides:
//! - `DeviceRepository` trait defining the interface for device data access
//! - `SqlxDeviceRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Device;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Device repository trait
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Insert a new device. Fails if the linking session already produced one.
    async fn create(&self, device: &Device) -> Result<Device>;

    /// List all devices of a user, oldest first
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Device>>;

    /// Get a device by public id, scoped to its owner
    async fn get_for_user(&self, user_id: i64, device_id: &str) -> Result<Option<Device>>;

    /// Get the device a linking session produced, if any
    async fn get_by_session(&self, session_id: &str) -> Result<Option<Device>>;

    /// Revoke a device. Already revoked devices are returned unchanged.
    async fn revoke(
        &self,
        user_id: i64,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Device>>;
}

/// SQLx-based device repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxDeviceRepository {
    pool: DynDatabasePool,
}

impl SqlxDeviceRepository {
    /// Create a new SQLx device repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn DeviceRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl DeviceRepository for SqlxDeviceRepository {
    async fn create(&self, device: &Device) -> Result<Device> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_device_sqlite(self.pool.sqlite_pool()?, device).await,
            DatabaseDriver::Mysql => create_device_mysql(self.pool.mysql_pool()?, device).await,
        }
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Device>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_devices_sqlite(self.pool.sqlite_pool()?, user_id).await,
            DatabaseDriver::Mysql => list_devices_mysql(self.pool.mysql_pool()?, user_id).await,
        }
    }

    async fn get_for_user(&self, user_id: i64, device_id: &str) -> Result<Option<Device>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_device_sqlite(self.pool.sqlite_pool()?, user_id, device_id).await
            }
            DatabaseDriver::Mysql => {
                get_device_mysql(self.pool.mysql_pool()?, user_id, device_id).await
            }
        }
    }

    async fn get_by_session(&self, session_id: &str) -> Result<Option<Device>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_device_by_session_sqlite(self.pool.sqlite_pool()?, session_id).await
            }
            DatabaseDriver::Mysql => {
                get_device_by_session_mysql(self.pool.mysql_pool()?, session_id).await
            }
        }
    }

    async fn revoke(
        &self,
        user_id: i64,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Device>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite_pool()?;
                revoke_device_sqlite(pool, user_id, device_id, now).await?;
                get_device_sqlite(pool, user_id, device_id).await
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql_pool()?;
                revoke_device_mysql(pool, user_id, device_id, now).await?;
                get_device_mysql(pool, user_id, device_id).await
            }
        }
    }
}

const INSERT_DEVICE: &str = r#"
    INSERT INTO devices (device_id, user_id, device_name, linked_via_session_id, created_at, last_active, is_active, revoked_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_BY_USER: &str = r#"
    SELECT id, device_id, user_id, device_name, linked_via_session_id, created_at, last_active, is_active, revoked_at
    FROM devices
    WHERE user_id = ?
    ORDER BY created_at ASC, id ASC
"#;

const SELECT_ONE: &str = r#"
    SELECT id, device_id, user_id, device_name, linked_via_session_id, created_at, last_active, is_active, revoked_at
    FROM devices
    WHERE user_id = ? AND device_id = ?
"#;

const SELECT_BY_SESSION: &str = r#"
    SELECT id, device_id, user_id, device_name, linked_via_session_id, created_at, last_active, is_active, revoked_at
    FROM devices
    WHERE linked_via_session_id = ?
"#;

// Only the first revocation stamps revoked_at
const REVOKE: &str = r#"
    UPDATE devices
    SET is_active = ?, revoked_at = ?
    WHERE user_id = ? AND device_id = ? AND is_active = ?
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_device_sqlite(pool: &SqlitePool, device: &Device) -> Result<Device> {
    let result = sqlx::query(INSERT_DEVICE)
        .bind(&device.device_id)
        .bind(device.user_id)
        .bind(&device.device_name)
        .bind(&device.linked_via_session_id)
        .bind(device.created_at)
        .bind(device.last_active)
        .bind(device.is_active)
        .bind(device.revoked_at)
        .execute(pool)
        .await
        .context("Failed to create device")?;

    Ok(Device {
        id: result.last_insert_rowid(),
        ..device.clone()
    })
}

async fn list_devices_sqlite(pool: &SqlitePool, user_id: i64) -> Result<Vec<Device>> {
    let rows = sqlx::query(SELECT_BY_USER)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("Failed to list devices")?;

    rows.iter().map(row_to_device_sqlite).collect()
}

async fn get_device_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    device_id: &str,
) -> Result<Option<Device>> {
    let row = sqlx::query(SELECT_ONE)
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get device")?;

    row.as_ref().map(row_to_device_sqlite).transpose()
}

async fn get_device_by_session_sqlite(
    pool: &SqlitePool,
    session_id: &str,
) -> Result<Option<Device>> {
    let row = sqlx::query(SELECT_BY_SESSION)
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get device by session")?;

    row.as_ref().map(row_to_device_sqlite).transpose()
}

async fn revoke_device_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(REVOKE)
        .bind(false)
        .bind(now)
        .bind(user_id)
        .bind(device_id)
        .bind(true)
        .execute(pool)
        .await
        .context("Failed to revoke device")?;
    Ok(result.rows_affected())
}

fn row_to_device_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Device> {
    Ok(Device {
        id: row.get("id"),
        device_id: row.get("device_id"),
        user_id: row.get("user_id"),
        device_name: row.get("device_name"),
        linked_via_session_id: row.get("linked_via_session_id"),
        created_at: row.get("created_at"),
        last_active: row.get("last_active"),
        is_active: row.get("is_active"),
        revoked_at: row.get("revoked_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_device_mysql(pool: &MySqlPool, device: &Device) -> Result<Device> {
    let result = sqlx::query(INSERT_DEVICE)
        .bind(&device.device_id)
        .bind(device.user_id)
        .bind(&device.device_name)
        .bind(&device.linked_via_session_id)
        .bind(device.created_at)
        .bind(device.last_active)
        .bind(device.is_active)
        .bind(device.revoked_at)
        .execute(pool)
        .await
        .context("Failed to create device")?;

    Ok(Device {
        id: result.last_insert_id() as i64,
        ..device.clone()
    })
}

async fn list_devices_mysql(pool: &MySqlPool, user_id: i64) -> Result<Vec<Device>> {
    let rows = sqlx::query(SELECT_BY_USER)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("Failed to list devices")?;

    rows.iter().map(row_to_device_mysql).collect()
}

async fn get_device_mysql(
    pool: &MySqlPool,
    user_id: i64,
    device_id: &str,
) -> Result<Option<Device>> {
    let row = sqlx::query(SELECT_ONE)
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get device")?;

    row.as_ref().map(row_to_device_mysql).transpose()
}

async fn get_device_by_session_mysql(
    pool: &MySqlPool,
    session_id: &str,
) -> Result<Option<Device>> {
    let row = sqlx::query(SELECT_BY_SESSION)
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get device by session")?;

    row.as_ref().map(row_to_device_mysql).transpose()
}

async fn revoke_device_mysql(
    pool: &MySqlPool,
    user_id: i64,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(REVOKE)
        .bind(false)
        .bind(now)
        .bind(user_id)
        .bind(device_id)
        .bind(true)
        .execute(pool)
        .await
        .context("Failed to revoke device")?;
    Ok(result.rows_affected())
}

fn row_to_device_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Device> {
    Ok(Device {
        id: row.get("id"),
        device_id: row.get("device_id"),
        user_id: row.get("user_id"),
        device_name: row.get("device_name"),
        linked_via_session_id: row.get("linked_via_session_id"),
        created_at: row.get("created_at"),
        last_active: row.get("last_active"),
        is_active: row.get("is_active"),
        revoked_at: row.get("revoked_at"),
    })
}
