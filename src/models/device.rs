//! Device model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name used when the requesting client did not describe itself
pub const DEFAULT_DEVICE_NAME: &str = "Linked device";

/// Maximum stored length of a device name, in characters
pub const MAX_DEVICE_NAME_LEN: usize = 100;

/// A client linked to a user account through a QR handshake.
///
/// Revocation is terminal: once `is_active` is false it never flips back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Row id (set by the database)
    pub id: i64,
    /// Public identifier (UUID v4)
    pub device_id: String,
    /// Owning user
    pub user_id: i64,
    /// Display name
    pub device_name: String,
    /// Session that produced this device
    pub linked_via_session_id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last time the device was seen
    pub last_active: DateTime<Utc>,
    /// False once revoked
    pub is_active: bool,
    /// Revocation timestamp
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Create a new active device with a freshly generated id
    pub fn new(
        user_id: i64,
        device_name: String,
        linked_via_session_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            device_id: Uuid::new_v4().to_string(),
            user_id,
            device_name,
            linked_via_session_id,
            created_at: now,
            last_active: now,
            is_active: true,
            revoked_at: None,
        }
    }

    /// Check if the device has been revoked
    pub fn is_revoked(&self) -> bool {
        !self.is_active
    }
}

/// Normalize a client-supplied device name.
///
/// Blank names become `None`; others are trimmed and capped at
/// [`MAX_DEVICE_NAME_LEN`] characters.
pub fn normalize_device_name(name: Option<&str>) -> Option<String> {
    let trimmed = name?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_DEVICE_NAME_LEN).collect())
}
