//! # gatehouse_core
//!
//! Authentication and authorization core for an administrative backend:
//! HS256 access/refresh token pairs, a revocation list, per-origin
//! brute-force lockout and a RESTful-then-RBAC authorization engine.
//!
//! Services take their storage as trait objects (see [`store`]); an
//! in-memory and a PostgreSQL backend ship with the crate.

pub mod auth;
pub mod authz;
pub mod clock;
pub mod config;
pub mod maintenance;
pub mod migrate;
pub mod models;
pub mod store;

pub use auth::session::{Authenticator, LoginOutcome, LoginRequest, LogoutOutcome};
pub use auth::{AuthError, Outcome};
pub use authz::{AuthorizationEngine, AuthzError};
pub use config::{AuthConfig, ConfigError};
pub use store::{Repositories, StorageError};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
