//! Rust client for the NataCare Guard API.

mod client;

pub use client::{
    ApiError, Error, GuardClient, PasswordCheck, Project, RateLimitStatus, RolePermissions,
    Sanitized, User,
};
