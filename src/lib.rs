//! qrlink - QR-based device linking
//!
//! A client asks for a short-lived link session and shows it as a QR code.
//! A signed-in user scans the code, which registers the client as one of
//! that user's devices. Each session can be consumed at most once.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
