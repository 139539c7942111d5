//! Link session model
//!
//! A link session is the short-lived token a requesting client renders as a
//! QR code. It moves forward only: `Pending -> Claimed -> Completed`, with
//! `Pending -> Cancelled` and `Pending -> Expired` as the other exits.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a link session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Issued, waiting for a scan
    Pending,
    /// Won by exactly one scanner, device being created
    Claimed,
    /// Device created, session consumed
    Completed,
    /// Marked by the reaper after `expires_at` passed unclaimed
    Expired,
    /// Abandoned by the requesting client
    Cancelled,
}

impl SessionStatus {
    /// Whether a scanner has already consumed the session
    pub fn is_consumed(&self) -> bool {
        matches!(self, SessionStatus::Claimed | SessionStatus::Completed)
    }

    /// Whether `next` is a legal forward step from this status
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::Claimed)
                | (SessionStatus::Pending, SessionStatus::Cancelled)
                | (SessionStatus::Pending, SessionStatus::Expired)
                | (SessionStatus::Claimed, SessionStatus::Completed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Claimed => write!(f, "claimed"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Expired => write!(f, "expired"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SessionStatus::Pending),
            "claimed" => Ok(SessionStatus::Claimed),
            "completed" => Ok(SessionStatus::Completed),
            "expired" => Ok(SessionStatus::Expired),
            "cancelled" => Ok(SessionStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid session status: {}", s)),
        }
    }
}

/// A pending (or consumed) device-link attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSession {
    /// Opaque session id (128 random bits, base64url)
    pub id: String,
    /// Current lifecycle state
    pub status: SessionStatus,
    /// User that claimed the session, set by the claim transition
    pub claimant_user_id: Option<i64>,
    /// Name the requesting client gave itself
    pub device_name: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Claim deadline
    pub expires_at: DateTime<Utc>,
    /// Last transition timestamp
    pub updated_at: DateTime<Utc>,
}

impl LinkSession {
    /// Create a new pending session issued at `now` and valid for `ttl`
    pub fn new(
        id: String,
        device_name: Option<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            status: SessionStatus::Pending,
            claimant_user_id: None,
            device_name,
            created_at: now,
            expires_at: now + ttl,
            updated_at: now,
        }
    }

    /// Check if the claim deadline has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether reads should still see this session.
    ///
    /// Unconsumed sessions vanish at `expires_at`. Consumed sessions stay
    /// visible for `grace` longer so a replayed scan is reported as already
    /// claimed rather than unknown.
    pub fn is_visible(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        if self.status.is_consumed() {
            now < self.expires_at + grace
        } else {
            !self.is_expired(now)
        }
    }

    /// Payload to encode into the QR code
    pub fn qr_payload(&self) -> QrPayload {
        QrPayload {
            session_id: self.id.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Data carried by the QR code.
///
/// `expires_at` is informational for the scanning client; the server never
/// reads it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrPayload {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

impl QrPayload {
    /// Compact JSON text for the QR code
    pub fn encode(&self) -> String {
        serde_json::json!({
            "session_id": self.session_id,
            "expires_at": self.expires_at.to_rfc3339(),
        })
        .to_string()
    }
}

/// Field changes applied together with a status swap
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub claimant_user_id: Option<i64>,
}

impl SessionPatch {
    /// Patch that changes nothing beyond the status
    pub fn none() -> Self {
        Self::default()
    }

    /// Patch recording the claiming user
    pub fn claimed_by(user_id: i64) -> Self {
        Self {
            claimant_user_id: Some(user_id),
        }
    }
}
