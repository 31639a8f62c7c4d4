//! Authentication configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_SECRET_LEN: usize = 32;

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable development mode (accept `dev:<user>` tokens).
    pub dev_mode: bool,

    /// JWT secret for HS256. Supports `env:VAR_NAME`.
    /// REQUIRED when dev_mode is false.
    pub jwt_secret: Option<String>,

    /// Development users (only used in dev mode).
    pub dev_users: Vec<DevUser>,

    /// Browser origins allowed to call the API.
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            jwt_secret: None,
            dev_users: Vec::new(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl AuthConfig {
    /// Resolve the JWT secret, expanding `env:VAR_NAME` syntax.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        match &self.jwt_secret {
            None => Ok(None),
            Some(value) => {
                if let Some(var_name) = value.strip_prefix("env:") {
                    match std::env::var(var_name) {
                        Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                        Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                        Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
                    }
                } else {
                    Ok(Some(value.clone()))
                }
            }
        }
    }

    pub fn dev_user(&self, id: &str) -> Option<&DevUser> {
        self.dev_users.iter().find(|u| u.id == id)
    }

    /// Validate the configuration for the current mode.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.dev_mode {
            let secret = self
                .resolve_jwt_secret()?
                .ok_or(ConfigValidationError::MissingJwtSecret)?;
            if secret.len() < MIN_SECRET_LEN {
                return Err(ConfigValidationError::JwtSecretTooShort);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for user in &self.dev_users {
            if !seen.insert(user.id.as_str()) {
                return Err(ConfigValidationError::DuplicateDevUser(user.id.clone()));
            }
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error(
        "JWT secret is required when dev_mode is false. Set PEACH__AUTH__JWT_SECRET or auth.jwt_secret in config."
    )]
    MissingJwtSecret,

    #[error("JWT secret must be at least {MIN_SECRET_LEN} characters long.")]
    JwtSecretTooShort,

    #[error("environment variable '{0}' referenced by auth.jwt_secret is not set")]
    EnvVarNotFound(String),

    #[error("environment variable '{0}' referenced by auth.jwt_secret is empty")]
    EnvVarEmpty(String),

    #[error("dev user '{0}' is declared more than once")]
    DuplicateDevUser(String),
}

/// A user accepted through `dev:<id>` tokens, e.g. a student or instructor
/// id that already exists in the course tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevUser {
    pub id: String,
    pub name: String,
}
