//! Data models
//!
//! This module contains the data structures used throughout qrlink:
//! - Link sessions and the QR payload they render to
//! - Linked devices
//! - Users, access tokens and the per-request auth claim

mod access_token;
mod device;
mod link_session;
mod user;

pub use access_token::{AccessToken, AuthClaim};
pub use device::{normalize_device_name, Device, DEFAULT_DEVICE_NAME, MAX_DEVICE_NAME_LEN};
pub use link_session::{LinkSession, QrPayload, SessionPatch, SessionStatus};
pub use user::User;
