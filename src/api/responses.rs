//! Shared API response types
//!
//! Wire shapes returned by more than one endpoint.

use serde::{Deserialize, Serialize};

use crate::models::{Device, User};

/// Device as seen by clients
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub id: i64,
    pub device_id: String,
    pub device_name: String,
    pub created_at: String,
    pub last_active: String,
    pub is_active: bool,
}

impl From<Device> for DeviceResponse {
    fn from(device: Device) -> Self {
        Self {
            id: device.id,
            device_id: device.device_id,
            device_name: device.device_name,
            created_at: device.created_at.to_rfc3339(),
            last_active: device.last_active.to_rfc3339(),
            is_active: device.is_active,
        }
    }
}

/// Account as seen by clients (never includes the password hash)
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: String,
    pub is_active: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            created_at: user.created_at.to_rfc3339(),
            is_active: user.is_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_device_response_fields() {
        let device = Device::new(3, "Tablet".into(), "sess".into(), Utc::now());
        let json = serde_json::to_value(DeviceResponse::from(device.clone())).unwrap();

        assert_eq!(json["device_id"], device.device_id);
        assert_eq!(json["device_name"], "Tablet");
        assert_eq!(json["is_active"], true);
        assert!(json.get("user_id").is_none());
        assert!(json.get("linked_via_session_id").is_none());
    }
}
