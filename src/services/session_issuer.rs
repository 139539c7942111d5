//! Session issuer
//!
//! Mints new link sessions for clients that want to be linked and hands back
//! the payload they render as a QR code.

use crate::config::LinkConfig;
use crate::db::bounded;
use crate::db::repositories::SessionStore;
use crate::models::{normalize_device_name, LinkSession, QrPayload};
use crate::services::clock::DynClock;
use crate::services::error::LinkError;
use anyhow::anyhow;
use chrono::Duration;
use data_encoding::BASE64URL_NOPAD;
use std::sync::Arc;

/// Random bytes in a session id (128 bits)
const SESSION_ID_BYTES: usize = 16;

/// A freshly issued session and its QR payload
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: LinkSession,
    pub payload: QrPayload,
}

/// Creates link sessions
pub struct SessionIssuer {
    store: Arc<dyn SessionStore>,
    clock: DynClock,
    ttl: Duration,
    store_timeout: std::time::Duration,
}

impl SessionIssuer {
    pub fn new(store: Arc<dyn SessionStore>, clock: DynClock, config: &LinkConfig) -> Self {
        Self {
            store,
            clock,
            ttl: config.session_ttl(),
            store_timeout: config.store_timeout(),
        }
    }

    /// Issue an anonymous session
    pub async fn create_session(&self) -> Result<IssuedSession, LinkError> {
        self.create_session_for(None).await
    }

    /// Issue a session carrying the requesting client's name.
    ///
    /// The only side effect is the store write; a failed write is returned
    /// as `Storage` and not retried.
    pub async fn create_session_for(
        &self,
        device_name: Option<String>,
    ) -> Result<IssuedSession, LinkError> {
        let id = generate_session_id()?;
        let device_name = normalize_device_name(device_name.as_deref());
        let session = LinkSession::new(id, device_name, self.clock.now(), self.ttl);

        bounded(self.store_timeout, self.store.put(&session)).await?;

        tracing::info!(
            session_id = %session.id,
            expires_at = %session.expires_at,
            "Issued link session"
        );

        let payload = session.qr_payload();
        Ok(IssuedSession { session, payload })
    }
}

/// Generate a URL-safe session id from 128 bits of OS randomness
pub fn generate_session_id() -> anyhow::Result<String> {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    getrandom::fill(&mut bytes).map_err(|e| anyhow!("Failed to gather randomness: {}", e))?;
    Ok(BASE64URL_NOPAD.encode(&bytes))
}
