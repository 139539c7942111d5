//! Access token repository
//!
//! Database operations for login bearer tokens.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::AccessToken;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Access token repository trait
#[async_trait]
pub trait AccessTokenRepository: Send + Sync {
    /// Store a newly issued token
    async fn create(&self, token: &AccessToken) -> Result<()>;

    /// Get a token by its value
    async fn get(&self, token: &str) -> Result<Option<AccessToken>>;

    /// Delete a token
    async fn delete(&self, token: &str) -> Result<()>;

    /// Delete tokens that expired at or before `now`
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based access token repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxAccessTokenRepository {
    pool: DynDatabasePool,
}

impl SqlxAccessTokenRepository {
    /// Create a new SQLx access token repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AccessTokenRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AccessTokenRepository for SqlxAccessTokenRepository {
    async fn create(&self, token: &AccessToken) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_token_sqlite(self.pool.sqlite_pool()?, token).await,
            DatabaseDriver::Mysql => create_token_mysql(self.pool.mysql_pool()?, token).await,
        }
    }

    async fn get(&self, token: &str) -> Result<Option<AccessToken>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_token_sqlite(self.pool.sqlite_pool()?, token).await,
            DatabaseDriver::Mysql => get_token_mysql(self.pool.mysql_pool()?, token).await,
        }
    }

    async fn delete(&self, token: &str) -> Result<()> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(DELETE_TOKEN)
                    .bind(token)
                    .execute(self.pool.sqlite_pool()?)
                    .await
                    .context("Failed to delete access token")?
                    .rows_affected()
            }
            DatabaseDriver::Mysql => {
                sqlx::query(DELETE_TOKEN)
                    .bind(token)
                    .execute(self.pool.mysql_pool()?)
                    .await
                    .context("Failed to delete access token")?
                    .rows_affected()
            }
        };
        tracing::debug!(affected, "Deleted access token");
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(DELETE_EXPIRED)
                .bind(now)
                .execute(self.pool.sqlite_pool()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query(DELETE_EXPIRED)
                .bind(now)
                .execute(self.pool.mysql_pool()?)
                .await
                .map(|r| r.rows_affected()),
        };
        result.context("Failed to delete expired access tokens")
    }
}

const INSERT_TOKEN: &str =
    "INSERT INTO access_tokens (token, user_id, issued_at, expires_at) VALUES (?, ?, ?, ?)";

const SELECT_TOKEN: &str =
    "SELECT token, user_id, issued_at, expires_at FROM access_tokens WHERE token = ?";

const DELETE_TOKEN: &str = "DELETE FROM access_tokens WHERE token = ?";

const DELETE_EXPIRED: &str = "DELETE FROM access_tokens WHERE expires_at <= ?";

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_token_sqlite(pool: &SqlitePool, token: &AccessToken) -> Result<()> {
    sqlx::query(INSERT_TOKEN)
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .execute(pool)
        .await
        .context("Failed to create access token")?;
    Ok(())
}

async fn get_token_sqlite(pool: &SqlitePool, token: &str) -> Result<Option<AccessToken>> {
    let row = sqlx::query(SELECT_TOKEN)
        .bind(token)
        .fetch_optional(pool)
        .await
        .context("Failed to get access token")?;

    Ok(row.map(|row| AccessToken {
        token: row.get("token"),
        user_id: row.get("user_id"),
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
    }))
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_token_mysql(pool: &MySqlPool, token: &AccessToken) -> Result<()> {
    sqlx::query(INSERT_TOKEN)
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .execute(pool)
        .await
        .context("Failed to create access token")?;
    Ok(())
}

async fn get_token_mysql(pool: &MySqlPool, token: &str) -> Result<Option<AccessToken>> {
    let row = sqlx::query(SELECT_TOKEN)
        .bind(token)
        .fetch_optional(pool)
        .await
        .context("Failed to get access token")?;

    Ok(row.map(|row| AccessToken {
        token: row.get("token"),
        user_id: row.get("user_id"),
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::User;
    use chrono::Duration;

    async fn setup() -> (SqlxAccessTokenRepository, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let user = SqlxUserRepository::new(pool.clone())
            .create(&User::new("bob".into(), "bob@example.com".into(), "h".into(), Utc::now()))
            .await
            .expect("Failed to create user");
        (SqlxAccessTokenRepository::new(pool), user.id)
    }

    fn token(value: &str, user_id: i64, expires_at: DateTime<Utc>) -> AccessToken {
        AccessToken {
            token: value.to_string(),
            user_id,
            issued_at: expires_at - Duration::hours(1),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();
        repo.create(&token("tok", user_id, now + Duration::hours(1)))
            .await
            .expect("Failed to create token");

        let found = repo.get("tok").await.unwrap().expect("Token not found");
        assert_eq!(found.user_id, user_id);

        repo.delete("tok").await.unwrap();
        assert!(repo.get("tok").await.unwrap().is_none());
        // Deleting twice is harmless
        repo.delete("tok").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();
        repo.create(&token("old", user_id, now - Duration::minutes(1)))
            .await
            .unwrap();
        repo.create(&token("new", user_id, now + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(repo.delete_expired(now).await.unwrap(), 1);
        assert!(repo.get("old").await.unwrap().is_none());
        assert!(repo.get("new").await.unwrap().is_some());
    }
}
