//! NataCare Guard Library
//!
//! Security policy service for the NataCare project management app: sign-in
//! rate limiting, role-based access control, input sanitization and password
//! rules, exposed over a small JSON API.

pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use config::GuardConfig;
pub use error::{GuardError, Result};
pub use http::{AppState, GuardServer};
pub use lifecycle::Shutdown;
