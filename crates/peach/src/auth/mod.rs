//! Authentication module.
//!
//! Resolves the calling user for every API request:
//! - HS256 JWT validation (production)
//! - Dev bypass mode with configured test users

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::Claims;
pub use config::{AuthConfig, ConfigValidationError, DevUser};
pub use error::AuthError;
pub use middleware::{AuthState, CurrentUser, auth_middleware};
