//! Network layer.
//!
//! Plain TCP listeners are bound in `main`; this module covers the optional
//! TLS termination used by `GuardServer::run_tls`.

pub mod tls;

pub use tls::load_tls_config;
