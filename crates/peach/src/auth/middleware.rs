//! Authentication middleware.

use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::{debug, warn};
use std::sync::Arc;

use super::{AuthConfig, AuthError, Claims};

const TOKEN_LIFETIME_SECS: i64 = 3600 * 24;

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::MalformedAuthorization)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedAuthorization);
    }

    let token = parts.next().ok_or(AuthError::MalformedAuthorization)?;
    if parts.next().is_some() {
        return Err(AuthError::MalformedAuthorization);
    }

    Ok(token)
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "token" {
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    secret: Option<String>,
}

impl AuthState {
    /// Create new auth state from config.
    /// Resolves `env:VAR_NAME` syntax in jwt_secret at construction time.
    pub fn new(config: AuthConfig) -> Self {
        let secret = match config.resolve_jwt_secret() {
            Ok(secret) => secret,
            Err(e) => {
                warn!("Ignoring unusable JWT secret: {}", e);
                None
            }
        };

        Self {
            config: Arc::new(config),
            secret,
        }
    }

    pub fn is_dev_mode(&self) -> bool {
        self.config.dev_mode
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.config.allowed_origins
    }

    /// Validate a bearer token and return its claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        if self.config.dev_mode
            && let Some(user_id) = token.strip_prefix("dev:")
        {
            return self.dev_user_claims(user_id);
        }

        let secret = self
            .secret
            .as_ref()
            .ok_or(AuthError::NoSigningKey)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            warn!("JWT validation failed: {:?}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        Ok(token_data.claims)
    }

    fn dev_user_claims(&self, user_id: &str) -> Result<Claims, AuthError> {
        let user = self
            .config
            .dev_user(user_id)
            .ok_or_else(|| AuthError::UnknownDevUser(user_id.to_string()))?;

        let now = Utc::now().timestamp();
        Ok(Claims {
            sub: user.id.clone(),
            iss: Some("dev".to_string()),
            exp: now + TOKEN_LIFETIME_SECS,
            iat: Some(now),
            name: Some(user.name.clone()),
            preferred_username: Some(user.id.clone()),
        })
    }

    /// Issue a signed token for a user.
    pub fn generate_token(&self, user_id: &str, name: &str) -> Result<String, AuthError> {
        let secret = self
            .secret
            .as_ref()
            .ok_or(AuthError::NoSigningKey)?;

        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: Some("peach".to_string()),
            exp: now + TOKEN_LIFETIME_SECS,
            iat: Some(now),
            name: Some(name.to_string()),
            preferred_username: Some(user_id.to_string()),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::Encoding(e.to_string()))
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub claims: Claims,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    pub fn display_name(&self) -> &str {
        self.claims.display_name()
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)
    }
}

/// Authentication middleware.
///
/// Validates tokens and injects `CurrentUser` into request extensions.
/// Auth methods in priority order:
/// 1. Authorization: Bearer <token> header
/// 2. auth_token cookie
/// 3. token query parameter (browsers can't set headers on WebSockets)
/// 4. X-Dev-User header (dev mode only)
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let cookie_token = req
        .headers()
        .get(axum::http::header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookie_header| token_from_cookie_header(cookie_header, "auth_token"));

    let query_token = req.uri().query().and_then(token_from_query);

    let claims = if let Some(header) = auth_header {
        let token = bearer_token_from_header(header)?;
        auth.validate_token(token)?
    } else if let Some(token) = cookie_token {
        auth.validate_token(token)?
    } else if let Some(ref token) = query_token {
        auth.validate_token(token)?
    } else if auth.is_dev_mode() {
        let user_id = req
            .headers()
            .get("X-Dev-User")
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::MissingCredentials)?;
        debug!("Using dev user: {}", user_id);
        auth.validate_token(&format!("dev:{}", user_id))?
    } else {
        return Err(AuthError::MissingCredentials);
    };

    req.extensions_mut().insert(CurrentUser { claims });

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::field_reassign_with_default)]
mod tests {
    use super::*;
    use crate::auth::DevUser;

    fn dev_state() -> AuthState {
        let mut config = AuthConfig::default();
        config.dev_mode = true;
        config.dev_users = vec![DevUser {
            id: "dev".to_string(),
            name: "Developer".to_string(),
        }];
        config.jwt_secret = Some("test-secret-for-unit-tests-minimum-32-chars-long".to_string());
        AuthState::new(config)
    }

    #[test]
    fn test_bearer_token_from_header() {
        assert_eq!(bearer_token_from_header("Bearer abc.def").unwrap(), "abc.def");
        assert_eq!(bearer_token_from_header("bearer   t1").unwrap(), "t1");

        for case in ["", "Bearer", "Token something", "Bearer a b"] {
            assert!(bearer_token_from_header(case).is_err(), "{case} should fail");
        }
    }

    #[test]
    fn test_token_sources() {
        assert_eq!(
            token_from_cookie_header("theme=dark; auth_token=abc", "auth_token"),
            Some("abc")
        );
        assert_eq!(token_from_cookie_header("theme=dark", "auth_token"), None);
        assert_eq!(
            token_from_query("pid=1&token=dev%3Au1").as_deref(),
            Some("dev:u1")
        );
        assert_eq!(token_from_query("pid=1"), None);
    }

    #[test]
    fn test_generate_and_validate_token() {
        let state = dev_state();
        let token = state.generate_token("u42", "Student").unwrap();
        let claims = state.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "u42");
        assert_eq!(claims.display_name(), "Student");

        assert!(matches!(
            state.validate_token("not-a-jwt"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_dev_token_validation() {
        let state = dev_state();
        assert_eq!(state.validate_token("dev:dev").unwrap().sub, "dev");
        assert!(matches!(
            state.validate_token("dev:unknown"),
            Err(AuthError::UnknownDevUser(_))
        ));
    }

    #[test]
    fn test_dev_tokens_rejected_outside_dev_mode() {
        let mut config = AuthConfig::default();
        config.jwt_secret = Some("test-secret-for-unit-tests-minimum-32-chars-long".to_string());
        config.dev_users = vec![DevUser {
            id: "dev".to_string(),
            name: "Developer".to_string(),
        }];
        let state = AuthState::new(config);
        assert!(state.validate_token("dev:dev").is_err());
    }
}
