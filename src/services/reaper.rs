//! Background sweep of stale link sessions and access tokens
//!
//! Expiry is decided lazily at read time; the reaper only reclaims space.
//! Sessions are deleted once `grace` has passed since their deadline, so
//! replayed scans of consumed sessions are still answered as already claimed
//! until then.

use crate::db::bounded;
use crate::db::repositories::SessionStore;
use crate::services::account::AccountService;
use crate::services::clock::DynClock;
use chrono::Duration;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Counts from one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_expired: u64,
    pub sessions_deleted: u64,
    pub tokens_deleted: u64,
}

/// Periodic cleanup task
pub struct SessionReaper {
    store: Arc<dyn SessionStore>,
    accounts: Arc<AccountService>,
    clock: DynClock,
    grace: Duration,
    store_timeout: std::time::Duration,
}

impl SessionReaper {
    pub fn new(
        store: Arc<dyn SessionStore>,
        accounts: Arc<AccountService>,
        clock: DynClock,
        grace: Duration,
        store_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            accounts,
            clock,
            grace,
            store_timeout,
        }
    }

    /// Run one sweep. Each step is attempted even if an earlier one failed.
    pub async fn run_once(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        match bounded(self.store_timeout, self.store.mark_expired(now)).await {
            Ok(n) => report.sessions_expired = n,
            Err(e) => tracing::warn!(error = %e, "Failed to mark expired link sessions"),
        }

        match bounded(self.store_timeout, self.store.delete_stale(now - self.grace)).await {
            Ok(n) => report.sessions_deleted = n,
            Err(e) => tracing::warn!(error = %e, "Failed to delete stale link sessions"),
        }

        match self.accounts.cleanup_expired_tokens().await {
            Ok(n) => report.tokens_deleted = n,
            Err(e) => tracing::warn!(error = %e, "Failed to clean up expired access tokens"),
        }

        tracing::debug!(
            expired = report.sessions_expired,
            deleted = report.sessions_deleted,
            tokens = report.tokens_deleted,
            "Sweep finished"
        );
        report
    }

    /// Run sweeps forever on `interval`
    pub fn spawn(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
