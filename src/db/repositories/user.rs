//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::User;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by username
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Get user by email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(self.pool.sqlite_pool()?, user).await,
            DatabaseDriver::Mysql => create_user_mysql(self.pool.mysql_pool()?, user).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        self.find(UserKey::Id(id)).await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find(UserKey::Username(username)).await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find(UserKey::Email(email)).await
    }
}

impl SqlxUserRepository {
    async fn find(&self, key: UserKey<'_>) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => find_user_sqlite(self.pool.sqlite_pool()?, key).await,
            DatabaseDriver::Mysql => find_user_mysql(self.pool.mysql_pool()?, key).await,
        }
    }
}

/// Unique column a user can be looked up by
#[derive(Debug, Clone, Copy)]
enum UserKey<'a> {
    Id(i64),
    Username(&'a str),
    Email(&'a str),
}

impl UserKey<'_> {
    fn select_sql(&self) -> &'static str {
        match self {
            UserKey::Id(_) => {
                "SELECT id, username, email, password_hash, created_at, is_active FROM users WHERE id = ?"
            }
            UserKey::Username(_) => {
                "SELECT id, username, email, password_hash, created_at, is_active FROM users WHERE username = ?"
            }
            UserKey::Email(_) => {
                "SELECT id, username, email, password_hash, created_at, is_active FROM users WHERE email = ?"
            }
        }
    }
}

const INSERT_USER: &str = r#"
    INSERT INTO users (username, email, password_hash, created_at, is_active)
    VALUES (?, ?, ?, ?, ?)
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let result = sqlx::query(INSERT_USER)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.is_active)
        .execute(pool)
        .await
        .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_rowid(),
        ..user.clone()
    })
}

async fn find_user_sqlite(pool: &SqlitePool, key: UserKey<'_>) -> Result<Option<User>> {
    let query = sqlx::query(key.select_sql());
    let query = match key {
        UserKey::Id(id) => query.bind(id),
        UserKey::Username(value) | UserKey::Email(value) => query.bind(value),
    };
    let row = query
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get user by {:?}", key))?;

    Ok(row.map(|row| User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        is_active: row.get("is_active"),
    }))
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let result = sqlx::query(INSERT_USER)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.is_active)
        .execute(pool)
        .await
        .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_id() as i64,
        ..user.clone()
    })
}

async fn find_user_mysql(pool: &MySqlPool, key: UserKey<'_>) -> Result<Option<User>> {
    let query = sqlx::query(key.select_sql());
    let query = match key {
        UserKey::Id(id) => query.bind(id),
        UserKey::Username(value) | UserKey::Email(value) => query.bind(value),
    };
    let row = query
        .fetch_optional(pool)
        .await
        .with_context(|| format!("Failed to get user by {:?}", key))?;

    Ok(row.map(|row| User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        is_active: row.get("is_active"),
    }))
}
