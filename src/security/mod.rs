//! Security core for LocalGuard.
//!
//! See [`localguard`] for the module overview, architecture diagram,
//! and public API documentation.

mod audit;
mod backend;
mod error;
mod guard;
mod identity;
mod keys;
mod localguard;
mod notify;
mod offline;
mod permissions;
mod session;
mod store;
mod ticker;

// The localguard.rs facade controls the entire public API surface.
pub use self::localguard::*;
