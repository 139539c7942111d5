//! Link session store
//!
//! Durable keyed storage for link sessions.
//!
//! This module provides:
//! - `SessionStore` trait defining the storage contract
//! - `SqlxSessionStore` implementing it for SQLite and MySQL
//!
//! `compare_and_swap` is the only way a session changes state after
//! creation. It is one conditional `UPDATE` whose affected-row count decides
//! the outcome, so two racing scanners can never both win.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{LinkSession, SessionPatch, SessionStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Link session store trait
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a newly issued session
    async fn put(&self, session: &LinkSession) -> Result<()>;

    /// Get a session by id.
    ///
    /// Returns `None` when the session is absent or no longer visible at
    /// `now` (see [`LinkSession::is_visible`]).
    async fn get(&self, id: &str, now: DateTime<Utc>) -> Result<Option<LinkSession>>;

    /// Atomically move a session from `expected` to `new`, applying `patch`.
    ///
    /// Returns `false`, with no side effects, when the session is missing,
    /// not in `expected`, past its deadline, or when `expected -> new` is not
    /// a forward transition.
    async fn compare_and_swap(
        &self,
        id: &str,
        expected: SessionStatus,
        new: SessionStatus,
        patch: SessionPatch,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark pending sessions whose deadline passed as expired
    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Physically delete sessions whose deadline is before `cutoff`
    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based session store
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionStore {
    pool: DynDatabasePool,
    grace: Duration,
}

impl SqlxSessionStore {
    /// Create a new store. Consumed sessions stay readable for `grace` past
    /// their deadline.
    pub fn new(pool: DynDatabasePool, grace: Duration) -> Self {
        Self { pool, grace }
    }

    /// Create a boxed store for use with dependency injection
    pub fn boxed(pool: DynDatabasePool, grace: Duration) -> Arc<dyn SessionStore> {
        Arc::new(Self::new(pool, grace))
    }

    /// Earliest `expires_at` a session in `status` may have to still be live
    fn live_horizon(&self, status: SessionStatus, now: DateTime<Utc>) -> DateTime<Utc> {
        if status.is_consumed() {
            now - self.grace
        } else {
            now
        }
    }
}

#[async_trait]
impl SessionStore for SqlxSessionStore {
    async fn put(&self, session: &LinkSession) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => put_session_sqlite(self.pool.sqlite_pool()?, session).await,
            DatabaseDriver::Mysql => put_session_mysql(self.pool.mysql_pool()?, session).await,
        }
    }

    async fn get(&self, id: &str, now: DateTime<Utc>) -> Result<Option<LinkSession>> {
        let session = match self.pool.driver() {
            DatabaseDriver::Sqlite => get_session_sqlite(self.pool.sqlite_pool()?, id).await?,
            DatabaseDriver::Mysql => get_session_mysql(self.pool.mysql_pool()?, id).await?,
        };
        Ok(session.filter(|s| s.is_visible(now, self.grace)))
    }

    async fn compare_and_swap(
        &self,
        id: &str,
        expected: SessionStatus,
        new: SessionStatus,
        patch: SessionPatch,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !expected.can_transition_to(new) {
            tracing::warn!(
                session_id = id,
                %expected,
                %new,
                "Rejected backward session transition"
            );
            return Ok(false);
        }

        let swap = Swap {
            id,
            expected,
            new,
            patch: &patch,
            now,
            horizon: self.live_horizon(expected, now),
        };
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => swap_sqlite(self.pool.sqlite_pool()?, &swap).await?,
            DatabaseDriver::Mysql => swap_mysql(self.pool.mysql_pool()?, &swap).await?,
        };
        Ok(affected == 1)
    }

    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => mark_expired_sqlite(self.pool.sqlite_pool()?, now).await,
            DatabaseDriver::Mysql => mark_expired_mysql(self.pool.mysql_pool()?, now).await,
        }
    }

    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_stale_sqlite(self.pool.sqlite_pool()?, cutoff).await,
            DatabaseDriver::Mysql => delete_stale_mysql(self.pool.mysql_pool()?, cutoff).await,
        }
    }
}

/// Arguments of one conditional update
struct Swap<'a> {
    id: &'a str,
    expected: SessionStatus,
    new: SessionStatus,
    patch: &'a SessionPatch,
    now: DateTime<Utc>,
    horizon: DateTime<Utc>,
}

const INSERT_SESSION: &str = r#"
    INSERT INTO link_sessions (id, status, claimant_user_id, device_name, created_at, expires_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_SESSION: &str = r#"
    SELECT id, status, claimant_user_id, device_name, created_at, expires_at, updated_at
    FROM link_sessions
    WHERE id = ?
"#;

const SWAP_STATUS: &str = r#"
    UPDATE link_sessions
    SET status = ?, claimant_user_id = COALESCE(?, claimant_user_id), updated_at = ?
    WHERE id = ? AND status = ? AND expires_at > ?
"#;

const MARK_EXPIRED: &str = r#"
    UPDATE link_sessions
    SET status = 'expired', updated_at = ?
    WHERE status = 'pending' AND expires_at <= ?
"#;

const DELETE_STALE: &str = "DELETE FROM link_sessions WHERE expires_at < ?";

// ============================================================================
// SQLite implementations
// ============================================================================

async fn put_session_sqlite(pool: &SqlitePool, session: &LinkSession) -> Result<()> {
    sqlx::query(INSERT_SESSION)
        .bind(&session.id)
        .bind(session.status.to_string())
        .bind(session.claimant_user_id)
        .bind(&session.device_name)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.updated_at)
        .execute(pool)
        .await
        .context("Failed to store link session")?;
    Ok(())
}

async fn get_session_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<LinkSession>> {
    let row = sqlx::query(SELECT_SESSION)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get link session")?;

    row.map(|row| row_to_session_sqlite(&row)).transpose()
}

async fn swap_sqlite(pool: &SqlitePool, swap: &Swap<'_>) -> Result<u64> {
    let result = sqlx::query(SWAP_STATUS)
        .bind(swap.new.to_string())
        .bind(swap.patch.claimant_user_id)
        .bind(swap.now)
        .bind(swap.id)
        .bind(swap.expected.to_string())
        .bind(swap.horizon)
        .execute(pool)
        .await
        .context("Failed to swap link session status")?;
    Ok(result.rows_affected())
}

async fn mark_expired_sqlite(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(MARK_EXPIRED)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to mark expired link sessions")?;
    Ok(result.rows_affected())
}

async fn delete_stale_sqlite(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(DELETE_STALE)
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to delete stale link sessions")?;
    Ok(result.rows_affected())
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<LinkSession> {
    let status: String = row.get("status");
    Ok(LinkSession {
        id: row.get("id"),
        status: status.parse()?,
        claimant_user_id: row.get("claimant_user_id"),
        device_name: row.get("device_name"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn put_session_mysql(pool: &MySqlPool, session: &LinkSession) -> Result<()> {
    sqlx::query(INSERT_SESSION)
        .bind(&session.id)
        .bind(session.status.to_string())
        .bind(session.claimant_user_id)
        .bind(&session.device_name)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.updated_at)
        .execute(pool)
        .await
        .context("Failed to store link session")?;
    Ok(())
}

async fn get_session_mysql(pool: &MySqlPool, id: &str) -> Result<Option<LinkSession>> {
    let row = sqlx::query(SELECT_SESSION)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get link session")?;

    row.map(|row| row_to_session_mysql(&row)).transpose()
}

async fn swap_mysql(pool: &MySqlPool, swap: &Swap<'_>) -> Result<u64> {
    let result = sqlx::query(SWAP_STATUS)
        .bind(swap.new.to_string())
        .bind(swap.patch.claimant_user_id)
        .bind(swap.now)
        .bind(swap.id)
        .bind(swap.expected.to_string())
        .bind(swap.horizon)
        .execute(pool)
        .await
        .context("Failed to swap link session status")?;
    Ok(result.rows_affected())
}

async fn mark_expired_mysql(pool: &MySqlPool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(MARK_EXPIRED)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to mark expired link sessions")?;
    Ok(result.rows_affected())
}

async fn delete_stale_mysql(pool: &MySqlPool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(DELETE_STALE)
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to delete stale link sessions")?;
    Ok(result.rows_affected())
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<LinkSession> {
    let status: String = row.get("status");
    Ok(LinkSession {
        id: row.get("id"),
        status: status.parse()?,
        claimant_user_id: row.get("claimant_user_id"),
        device_name: row.get("device_name"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn setup_store() -> SqlxSessionStore {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxSessionStore::new(pool, Duration::seconds(600))
    }

    fn pending(id: &str) -> LinkSession {
        LinkSession::new(id.to_string(), Some("Desk".into()), t0(), Duration::seconds(120))
    }

    async fn claim(store: &SqlxSessionStore, id: &str, user_id: i64, now: DateTime<Utc>) -> bool {
        let patch = SessionPatch::claimed_by(user_id);
        store
            .compare_and_swap(id, SessionStatus::Pending, SessionStatus::Claimed, patch, now)
            .await
            .unwrap()
    }

    /// Stored row, ignoring visibility
    async fn raw(store: &SqlxSessionStore, id: &str) -> Option<LinkSession> {
        get_session_sqlite(store.pool.sqlite_pool().unwrap(), id).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = setup_store().await;
        let session = pending("s1");
        store.put(&session).await.expect("Failed to put session");

        let found = store
            .get("s1", t0())
            .await
            .expect("Failed to get session")
            .expect("Session not found");
        assert_eq!(found, session);
    }

    #[tokio::test]
    async fn test_get_unknown_returns_none() {
        let store = setup_store().await;
        assert!(store.get("missing", t0()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_pending_session_is_invisible() {
        let store = setup_store().await;
        store.put(&pending("s1")).await.unwrap();

        let at_deadline = t0() + Duration::seconds(120);
        assert!(store.get("s1", at_deadline).await.unwrap().is_none());
        assert!(store.get("s1", at_deadline - Duration::seconds(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cas_claims_once() {
        let store = setup_store().await;
        store.put(&pending("s1")).await.unwrap();
        let now = t0() + Duration::seconds(10);

        let first = claim(&store, "s1", 7, now).await;
        let second = claim(&store, "s1", 8, now).await;

        assert!(first);
        assert!(!second);

        let session = store.get("s1", now).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Claimed);
        assert_eq!(session.claimant_user_id, Some(7));
        assert_eq!(session.updated_at, now);
    }

    #[tokio::test]
    async fn test_cas_fails_after_deadline_without_side_effects() {
        let store = setup_store().await;
        store.put(&pending("s1")).await.unwrap();
        let late = t0() + Duration::seconds(121);

        assert!(!claim(&store, "s1", 7, late).await);

        let stored = raw(&store, "s1").await.unwrap();
        assert_eq!(stored.status, SessionStatus::Pending);
        assert_eq!(stored.claimant_user_id, None);
    }

    #[tokio::test]
    async fn test_cas_rejects_backward_transition() {
        let store = setup_store().await;
        store.put(&pending("s1")).await.unwrap();
        let now = t0() + Duration::seconds(1);

        assert!(claim(&store, "s1", 1, now).await);
        let patch = SessionPatch::none();
        assert!(!store
            .compare_and_swap("s1", SessionStatus::Claimed, SessionStatus::Pending, patch, now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_completion_keeps_claimant() {
        let store = setup_store().await;
        store.put(&pending("s1")).await.unwrap();
        let now = t0() + Duration::seconds(119);

        assert!(claim(&store, "s1", 3, now).await);
        // Completion may land just past the claim deadline
        let after_deadline = t0() + Duration::seconds(121);
        let patch = SessionPatch::none();
        assert!(store
            .compare_and_swap(
                "s1",
                SessionStatus::Claimed,
                SessionStatus::Completed,
                patch,
                after_deadline,
            )
            .await
            .unwrap());

        let session = store.get("s1", after_deadline).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.claimant_user_id, Some(3));
    }

    #[tokio::test]
    async fn test_mark_expired_and_delete_stale() {
        let store = setup_store().await;
        store.put(&pending("stale")).await.unwrap();
        let fresh = LinkSession::new(
            "fresh".into(),
            None,
            t0() + Duration::seconds(300),
            Duration::seconds(120),
        );
        store.put(&fresh).await.unwrap();

        let now = t0() + Duration::seconds(200);
        assert_eq!(store.mark_expired(now).await.unwrap(), 1);

        let stale = raw(&store, "stale").await.unwrap();
        assert_eq!(stale.status, SessionStatus::Expired);

        // Nothing is old enough to delete yet
        assert_eq!(store.delete_stale(now - Duration::seconds(600)).await.unwrap(), 0);

        let much_later = t0() + Duration::seconds(900);
        assert_eq!(store.delete_stale(much_later - Duration::seconds(600)).await.unwrap(), 1);
        assert!(raw(&store, "stale").await.is_none());
        assert!(raw(&store, "fresh").await.is_some());
    }
}
