//! Workspace file and directory handlers.

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::workspace::WorkspaceFiles;

use super::extract::FormOrJson;

#[derive(Debug, Deserialize)]
pub struct CreateFileRequest {
    /// Directory relative to the workspace root.
    #[serde(default)]
    pub file_path: String,
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
pub struct FilePathRequest {
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryPathRequest {
    pub directory_path: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub origin: String,
    pub destination: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

fn ok(message: &'static str) -> Json<MessageResponse> {
    Json(MessageResponse { message })
}

async fn workspace(state: &AppState, environment_id: &str, user: &CurrentUser) -> ApiResult<WorkspaceFiles> {
    let files = state
        .environments
        .workspace_for_user(environment_id, user.id())
        .await?;
    Ok(files)
}

/// POST /environment/{env_id}/file
pub async fn create_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(environment_id): Path<String>,
    FormOrJson(request): FormOrJson<CreateFileRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let files = workspace(&state, &environment_id, &user).await?;
    files
        .create_file(&request.file_path, &request.file_name)
        .await?;
    Ok(ok("File created successfully"))
}

/// PUT /environment/{env_id}/file
pub async fn move_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(environment_id): Path<String>,
    FormOrJson(request): FormOrJson<MoveRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let files = workspace(&state, &environment_id, &user).await?;
    files.move_file(&request.origin, &request.destination).await?;
    Ok(ok("File moved successfully"))
}

/// DELETE /environment/{env_id}/file
pub async fn delete_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(environment_id): Path<String>,
    FormOrJson(request): FormOrJson<FilePathRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let files = workspace(&state, &environment_id, &user).await?;
    files.delete_file(&request.file_path).await?;
    Ok(ok("File deleted successfully"))
}

/// POST /environment/{env_id}/directory
pub async fn create_directory(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(environment_id): Path<String>,
    FormOrJson(request): FormOrJson<DirectoryPathRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let files = workspace(&state, &environment_id, &user).await?;
    files.create_dir(&request.directory_path).await?;
    Ok(ok("Directory created successfully"))
}

/// PUT /environment/{env_id}/directory
pub async fn move_directory(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(environment_id): Path<String>,
    FormOrJson(request): FormOrJson<MoveRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let files = workspace(&state, &environment_id, &user).await?;
    files.move_dir(&request.origin, &request.destination).await?;
    Ok(ok("Directory moved successfully"))
}

/// DELETE /environment/{env_id}/directory
pub async fn delete_directory(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(environment_id): Path<String>,
    FormOrJson(request): FormOrJson<DirectoryPathRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let files = workspace(&state, &environment_id, &user).await?;
    files.delete_dir(&request.directory_path).await?;
    Ok(ok("Directory deleted successfully"))
}

/// GET /file/{env_id}/pdf?file_path=...
///
/// Streams a PDF from the workspace.
pub async fn get_pdf(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(environment_id): Path<String>,
    Query(query): Query<FilePathRequest>,
) -> ApiResult<Response> {
    if !query.file_path.to_ascii_lowercase().ends_with(".pdf") {
        return Err(ApiError::bad_request(format!(
            "{} is not a PDF file",
            query.file_path
        )));
    }

    let files = workspace(&state, &environment_id, &user).await?;
    let (file, len, path) = files.open(&query.file_path).await?;
    debug!("Streaming {} ({} bytes)", path.display(), len);

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', "'"))
        .unwrap_or_default();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", file_name),
            ),
        ],
        body,
    )
        .into_response())
}
