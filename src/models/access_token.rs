//! Access token model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque bearer token issued at login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// Token value (UUID v4)
    pub token: String,
    /// Associated user ID
    pub user_id: i64,
    /// Issue timestamp
    pub issued_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Check if the token has expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Authenticated identity carried by this token
    pub fn claim(&self) -> AuthClaim {
        AuthClaim {
            user_id: self.user_id,
            issued_at: self.issued_at,
        }
    }
}

/// Per-request authenticated identity, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthClaim {
    pub user_id: i64,
    pub issued_at: DateTime<Utc>,
}
