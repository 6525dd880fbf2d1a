//! Security policy subsystem.
//!
//! # Data Flow
//! ```text
//! Sign-in flow:
//!     → rate_limit.rs (count attempt, block after too many)
//!     → password.rs (strength and composition rules on registration/reset)
//!
//! Every request:
//!     → rate_limit.rs (per-client API throttle)
//!     → rbac.rs (role → permission lookup, project ownership)
//!     → sanitize.rs (HTML, URL, filename, CSV, email and search input)
//! ```
//!
//! # Design Decisions
//! - Fail closed: unknown roles, actions and URL schemes are rejected
//! - Counters are in-memory and per process
//! - No trust in client input

pub mod password;
pub mod rate_limit;
pub mod rbac;
pub mod sanitize;

pub use password::{PasswordContext, PasswordPolicy, PasswordReport};
pub use rate_limit::{ActionType, RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use rbac::{AccessPolicy, Permission, Principal, ProjectAccess, Role};
pub use sanitize::{SanitizeKind, Sanitizer};
