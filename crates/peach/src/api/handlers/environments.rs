//! Environment handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use log::info;
use serde::Serialize;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::environment::{
    CreateEnvironmentRequest, Environment, EnvironmentError, UpdateLayoutRequest,
};

use super::extract::FormOrJson;

/// Response of `POST /environment`.
#[derive(Debug, Serialize)]
pub struct CreateEnvironmentResponse {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_required: Option<bool>,
}

/// POST /environment
///
/// Returns the caller's environment for the assignment, provisioning it on
/// first access. Courses that require groups answer with a signal instead
/// of an error when the caller has none.
pub async fn create_environment(
    State(state): State<AppState>,
    user: CurrentUser,
    FormOrJson(request): FormOrJson<CreateEnvironmentRequest>,
) -> ApiResult<Json<CreateEnvironmentResponse>> {
    let resolution = match state
        .environments
        .resolve_or_create(&request.course_id, &request.assignment_id, user.id())
        .await
    {
        Ok(resolution) => resolution,
        Err(EnvironmentError::GroupRequired { course_id }) => {
            info!("User {} has no group in course {}", user.id(), course_id);
            return Ok(Json(CreateEnvironmentResponse {
                message: "Require group",
                environment_id: None,
                group_required: Some(true),
            }));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(CreateEnvironmentResponse {
        message: "Environment created successfully",
        environment_id: Some(resolution.environment.environment_id),
        group_required: None,
    }))
}

/// GET /environment/{env_id}
pub async fn get_environment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(environment_id): Path<String>,
) -> ApiResult<Json<Environment>> {
    let environment = state
        .environments
        .get_for_user(&environment_id, user.id())
        .await?;
    Ok(Json(environment))
}

/// PUT /environment/{env_id}/layout
pub async fn update_layout(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(environment_id): Path<String>,
    FormOrJson(request): FormOrJson<UpdateLayoutRequest>,
) -> ApiResult<Json<Environment>> {
    let environment = state
        .environments
        .update_layout(&environment_id, user.id(), &request.layout)
        .await?;
    Ok(Json(environment))
}
