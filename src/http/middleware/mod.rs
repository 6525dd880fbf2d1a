//! Request middleware.

pub mod rate_limit;
pub mod service_auth;

pub use rate_limit::api_rate_limit_middleware;
pub use service_auth::service_auth_middleware;
