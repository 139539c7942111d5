//! Services layer - Business logic
//!
//! This module contains the device-linking services:
//! - Issuing link sessions and their QR payloads
//! - The scan handshake that turns a session into a device
//! - The per-user device registry
//! - Accounts and bearer tokens
//! - The background reaper

pub mod account;
pub mod clock;
pub mod device_registry;
pub mod error;
pub mod handshake;
pub mod password;
pub mod reaper;
pub mod session_issuer;

pub use account::{AccountError, AccountService, LoginInput, RegisterInput};
pub use clock::{Clock, DynClock, ManualClock, SystemClock};
pub use device_registry::DeviceRegistry;
pub use error::LinkError;
pub use handshake::LinkHandshake;
pub use password::{hash_password, verify_password};
pub use reaper::{SessionReaper, SweepReport};
pub use session_issuer::{generate_session_id, IssuedSession, SessionIssuer};
