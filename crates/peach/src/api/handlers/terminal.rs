//! Terminal initiation handler.

use axum::{
    Json,
    extract::{Path, State},
};
use log::{info, warn};
use serde::Serialize;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::auth::CurrentUser;

#[derive(Debug, Serialize)]
pub struct InitTerminalResponse {
    pub message: &'static str,
    pub pid: String,
}

/// POST /terminal/{env_id}/init
pub async fn init_terminal(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(environment_id): Path<String>,
) -> ApiResult<Json<InitTerminalResponse>> {
    let environment = state
        .environments
        .get_for_user(&environment_id, user.id())
        .await?;

    let pid = state.terminal.init_terminal(&environment).await?;
    info!("Terminal {} started in environment {}", pid, environment_id);

    if let Err(e) = state.environments.touch(&environment_id).await {
        warn!("Failed to record activity on {}: {}", environment_id, e);
    }

    Ok(Json(InitTerminalResponse {
        message: "Terminal initialized successfully",
        pid,
    }))
}
