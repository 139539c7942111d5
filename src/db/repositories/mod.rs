//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles persistence for a specific entity.

pub mod access_token;
pub mod device;
pub mod link_session;
pub mod user;

pub use access_token::{AccessTokenRepository, SqlxAccessTokenRepository};
pub use device::{DeviceRepository, SqlxDeviceRepository};
pub use link_session::{SessionStore, SqlxSessionStore};
pub use user::{SqlxUserRepository, UserRepository};
