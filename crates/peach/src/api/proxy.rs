//! WebSocket endpoints relaying browser sessions to environment pods.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};
use log::{debug, info, warn};

use crate::auth::CurrentUser;
use crate::environment::EnvironmentError;
use crate::relay::{RelayChannel, relay};

use super::error::ApiResult;
use super::state::AppState;

/// GET /environment/{env_id}/wsurl/{*file_path}
///
/// File synchronization for one document, relayed to the pod's file-sync
/// server. Frames are passed through unchanged (binary in practice).
pub async fn file_sync_ws(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((environment_id, file_path)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    open_relay(
        state,
        &user,
        environment_id,
        RelayChannel::FileSync { path: file_path },
        ws,
    )
    .await
}

/// GET /terminal/{env_id}/{pid}
///
/// Interactive terminal relayed to the pod's terminal service.
pub async fn terminal_ws(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((environment_id, pid)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    open_relay(state, &user, environment_id, RelayChannel::Terminal { pid }, ws).await
}

async fn open_relay(
    state: AppState,
    user: &CurrentUser,
    environment_id: String,
    channel: RelayChannel,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let environment = state
        .environments
        .get_for_user(&environment_id, user.id())
        .await?;
    let address = environment
        .internal_address
        .as_deref()
        .ok_or_else(|| EnvironmentError::NotProvisioned(environment_id.clone()))?;
    let pod_url = channel.pod_url(address, state.template())?;

    state.environments.touch(&environment_id).await?;
    let guard = state.environments.activity().begin(&environment_id);
    let cancel = state.shutdown.child_token();
    let connect_timeout = state.connect_timeout();
    let environments = state.environments.clone();
    let kind = channel.name();
    let user_id = user.id().to_string();

    Ok(ws.on_upgrade(move |socket| async move {
        let _guard = guard;
        info!(
            "Opening {} relay for {} on environment {}",
            kind, user_id, environment_id
        );

        match relay(socket, &pod_url, connect_timeout, cancel).await {
            Ok(outcome) => info!(
                "{} relay on environment {} ended: {}",
                kind, environment_id, outcome
            ),
            Err(e) => warn!(
                "{} relay on environment {} failed: {}",
                kind, environment_id, e
            ),
        }

        if let Err(e) = environments.touch(&environment_id).await {
            debug!("Could not record activity on {}: {}", environment_id, e);
        }
    }))
}
