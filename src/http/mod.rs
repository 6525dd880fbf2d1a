//! HTTP service subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID)
//!     → middleware/ (per-client API throttle)
//!     → handlers.rs (policy calls)
//!     → response.rs (GuardError → JSON error body)
//! ```

pub mod handlers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeGuardRequestId, X_REQUEST_ID};
pub use server::{build_router, AppState, GuardServer, Runtime};
