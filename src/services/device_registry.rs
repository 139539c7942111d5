//! Device registry
//!
//! Durable record of the devices linked to each user.

use crate::db::bounded;
use crate::db::repositories::DeviceRepository;
use crate::models::{Device, DEFAULT_DEVICE_NAME};
use crate::services::clock::DynClock;
use crate::services::error::LinkError;
use std::sync::Arc;
use std::time::Duration;

/// Linked device registry
pub struct DeviceRegistry {
    repo: Arc<dyn DeviceRepository>,
    clock: DynClock,
    store_timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(repo: Arc<dyn DeviceRepository>, clock: DynClock, store_timeout: Duration) -> Self {
        Self {
            repo,
            clock,
            store_timeout,
        }
    }

    /// Create an active device for `user_id`, linked through `session_id`.
    ///
    /// Names are not deduplicated; a missing name becomes
    /// [`DEFAULT_DEVICE_NAME`].
    pub async fn register(
        &self,
        user_id: i64,
        device_name: Option<&str>,
        session_id: &str,
    ) -> Result<Device, LinkError> {
        let name = device_name.unwrap_or(DEFAULT_DEVICE_NAME).to_string();
        let device = Device::new(user_id, name, session_id.to_string(), self.clock.now());

        let created = bounded(self.store_timeout, self.repo.create(&device)).await?;
        tracing::info!(
            user_id,
            device_id = %created.device_id,
            session_id,
            "Registered device"
        );
        Ok(created)
    }

    /// All devices of `user_id`, oldest first, revoked ones included
    pub async fn list(&self, user_id: i64) -> Result<Vec<Device>, LinkError> {
        Ok(bounded(self.store_timeout, self.repo.list_by_user(user_id)).await?)
    }

    /// Get one device owned by `user_id`
    pub async fn get(&self, user_id: i64, device_id: &str) -> Result<Device, LinkError> {
        bounded(self.store_timeout, self.repo.get_for_user(user_id, device_id))
            .await?
            .ok_or(LinkError::NotFound)
    }

    /// The device `session_id` produced for `user_id`, if it committed
    pub async fn find_by_session(
        &self,
        user_id: i64,
        session_id: &str,
    ) -> Result<Option<Device>, LinkError> {
        let device = bounded(self.store_timeout, self.repo.get_by_session(session_id)).await?;
        Ok(device.filter(|d| d.user_id == user_id))
    }

    /// Deactivate a device. Revoking twice returns the same terminal state.
    pub async fn revoke(&self, user_id: i64, device_id: &str) -> Result<Device, LinkError> {
        let device = bounded(
            self.store_timeout,
            self.repo.revoke(user_id, device_id, self.clock.now()),
        )
        .await?
        .ok_or(LinkError::NotFound)?;

        tracing::info!(user_id, device_id, "Revoked device");
        Ok(device)
    }
}
