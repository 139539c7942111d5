//! Link handshake
//!
//! Consumes an authenticated scan of a link session and turns it into a
//! device. A session moves `Pending -> Claimed -> Completed`, and only the
//! store's compare-and-swap decides who wins the claim: at most one scan per
//! session ever succeeds.
//!
//! A claim whose device was never written stays `Claimed`. Once it has been
//! idle for two store timeouts the claimant may scan again to finish it.

use crate::db::bounded;
use crate::db::repositories::SessionStore;
use crate::models::{AuthClaim, Device, LinkSession, SessionPatch, SessionStatus};
use crate::services::clock::DynClock;
use crate::services::device_registry::DeviceRegistry;
use crate::services::error::LinkError;
use std::sync::Arc;
use std::time::Duration;

/// Scan/cancel/status state machine over the session store
pub struct LinkHandshake {
    store: Arc<dyn SessionStore>,
    registry: Arc<DeviceRegistry>,
    clock: DynClock,
    store_timeout: Duration,
    claim_stall: chrono::Duration,
}

impl LinkHandshake {
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: Arc<DeviceRegistry>,
        clock: DynClock,
        store_timeout: Duration,
    ) -> Self {
        let claim_stall = chrono::Duration::from_std(store_timeout * 2)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));
        Self {
            store,
            registry,
            clock,
            store_timeout,
            claim_stall,
        }
    }

    /// Claim `session_id` for the authenticated user and create their device.
    ///
    /// Fails with `SessionExpiredOrUnknown` for unknown, expired or cancelled
    /// sessions and with `SessionAlreadyClaimed` when any other scan got
    /// there first, including a retry of this very call. The one exception is
    /// the claimant retrying a stalled claim that has no device yet.
    pub async fn scan(&self, session_id: &str, claim: AuthClaim) -> Result<Device, LinkError> {
        let session = self.load(session_id).await?;
        match session.status {
            SessionStatus::Pending => {}
            SessionStatus::Claimed if self.is_stalled_claim(&session, &claim) => {
                return self.resume(&session, claim).await
            }
            SessionStatus::Claimed | SessionStatus::Completed => {
                return Err(LinkError::SessionAlreadyClaimed)
            }
            SessionStatus::Expired | SessionStatus::Cancelled => {
                return Err(LinkError::SessionExpiredOrUnknown)
            }
        }

        let claimed = self
            .swap(
                session_id,
                SessionStatus::Pending,
                SessionStatus::Claimed,
                SessionPatch::claimed_by(claim.user_id),
            )
            .await?;
        if !claimed {
            tracing::debug!(session_id, user_id = claim.user_id, "Lost claim race");
            return Err(LinkError::SessionAlreadyClaimed);
        }
        tracing::info!(session_id, user_id = claim.user_id, "Claimed link session");

        let device = match self
            .registry
            .register(claim.user_id, session.device_name.as_deref(), session_id)
            .await
        {
            Ok(device) => device,
            // The insert may have committed before the error surfaced
            Err(e) => match self.registry.find_by_session(claim.user_id, session_id).await {
                Ok(Some(device)) => device,
                _ => {
                    tracing::warn!(
                        session_id,
                        user_id = claim.user_id,
                        error = %e,
                        "Claimed session has no device"
                    );
                    return Err(e);
                }
            },
        };

        self.complete(session_id, &device).await;
        Ok(device)
    }

    fn is_stalled_claim(&self, session: &LinkSession, claim: &AuthClaim) -> bool {
        session.claimant_user_id == Some(claim.user_id)
            && self.clock.now() - session.updated_at >= self.claim_stall
    }

    /// Finish a claim an earlier scan of the same user left without a device
    async fn resume(&self, session: &LinkSession, claim: AuthClaim) -> Result<Device, LinkError> {
        let session_id = session.id.as_str();
        if let Some(device) = self.registry.find_by_session(claim.user_id, session_id).await? {
            self.complete(session_id, &device).await;
            return Err(LinkError::SessionAlreadyClaimed);
        }

        tracing::info!(session_id, user_id = claim.user_id, "Resuming stalled claim");
        match self
            .registry
            .register(claim.user_id, session.device_name.as_deref(), session_id)
            .await
        {
            Ok(device) => {
                self.complete(session_id, &device).await;
                Ok(device)
            }
            Err(e) => match self.registry.find_by_session(claim.user_id, session_id).await {
                // Another resume wrote it
                Ok(Some(device)) => {
                    self.complete(session_id, &device).await;
                    Err(LinkError::SessionAlreadyClaimed)
                }
                _ => Err(e),
            },
        }
    }

    /// Move a claimed session to completed. The device stands either way.
    async fn complete(&self, session_id: &str, device: &Device) {
        let completed = self
            .swap(
                session_id,
                SessionStatus::Claimed,
                SessionStatus::Completed,
                SessionPatch::none(),
            )
            .await;
        match completed {
            Ok(true) => tracing::info!(session_id, "Completed link session"),
            Ok(false) => tracing::error!(
                session_id,
                device_id = %device.device_id,
                "Invariant violation: claimed session could not be completed"
            ),
            Err(e) => tracing::error!(
                session_id,
                device_id = %device.device_id,
                error = %e,
                "Invariant violation: failed to complete claimed session"
            ),
        }
    }

    /// Abandon a pending session. Cancelling twice succeeds.
    pub async fn cancel(&self, session_id: &str) -> Result<(), LinkError> {
        let session = self.load(session_id).await?;
        match session.status {
            SessionStatus::Cancelled => return Ok(()),
            SessionStatus::Claimed | SessionStatus::Completed => {
                return Err(LinkError::SessionAlreadyClaimed)
            }
            SessionStatus::Expired => return Err(LinkError::SessionExpiredOrUnknown),
            SessionStatus::Pending => {}
        }

        let cancelled = self
            .swap(
                session_id,
                SessionStatus::Pending,
                SessionStatus::Cancelled,
                SessionPatch::none(),
            )
            .await?;
        if cancelled {
            tracing::info!(session_id, "Cancelled link session");
            return Ok(());
        }

        // Raced with a scan, a concurrent cancel, or the deadline
        match self.load(session_id).await?.status {
            SessionStatus::Cancelled => Ok(()),
            SessionStatus::Claimed | SessionStatus::Completed => {
                Err(LinkError::SessionAlreadyClaimed)
            }
            _ => Err(LinkError::SessionExpiredOrUnknown),
        }
    }

    /// Current state of a session, for the issuing client to poll
    pub async fn status(&self, session_id: &str) -> Result<LinkSession, LinkError> {
        self.load(session_id).await
    }

    async fn load(&self, session_id: &str) -> Result<LinkSession, LinkError> {
        bounded(self.store_timeout, self.store.get(session_id, self.clock.now()))
            .await?
            .ok_or(LinkError::SessionExpiredOrUnknown)
    }

    async fn swap(
        &self,
        session_id: &str,
        expected: SessionStatus,
        new: SessionStatus,
        patch: SessionPatch,
    ) -> Result<bool, LinkError> {
        let now = self.clock.now();
        Ok(bounded(
            self.store_timeout,
            self.store.compare_and_swap(session_id, expected, new, patch, now),
        )
        .await?)
    }
}
