//! LocalGuard - offline access control and tamper evidence for local state
//!
//! This crate provides:
//! - Device-bound encryption of persisted state (AES-256-GCM)
//! - A static role/permission model with route and action guards
//! - A hash-chained, bounded audit ledger
//! - Absolute session timeout and offline login lockout with background monitors
//! - Application state with explicit construction order and teardown

pub mod app;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod paths;
pub mod security;

pub use app::App;
pub use config::Config;
