//! Request body extraction shared by the handlers.

use axum::{
    Form, Json,
    extract::{FromRequest, Query, Request},
    http::{Method, header::CONTENT_TYPE},
};
use serde::de::DeserializeOwned;

use crate::api::error::ApiError;

/// Accepts a JSON body, a urlencoded form body, or (for bodiless requests)
/// the query string.
#[derive(Debug, Clone)]
pub struct FormOrJson<T>(pub T);

impl<S, T> FromRequest<S> for FormOrJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase());

        match content_type.as_deref() {
            Some(ct) if ct.starts_with("application/json") => {
                let Json(value) = Json::<T>::from_request(req, state)
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                Ok(Self(value))
            }
            Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => {
                let Form(value) = Form::<T>::from_request(req, state)
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                Ok(Self(value))
            }
            None if *req.method() == Method::DELETE || *req.method() == Method::GET => {
                let Query(value) = Query::<T>::try_from_uri(req.uri())
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                Ok(Self(value))
            }
            other => Err(ApiError::bad_request(format!(
                "unsupported content type: {}",
                other.unwrap_or("none")
            ))),
        }
    }
}
