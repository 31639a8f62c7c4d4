use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct InitResponse {
    pub pid: String,
}

#[derive(Debug, Deserialize)]
pub struct AttachQuery {
    pub pid: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(attach))
        .route("/init", post(init))
        .route("/health", get(health))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Spawn a new shell and report its pid.
pub async fn init(State(state): State<AppState>) -> Response {
    match state.sessions.spawn() {
        Ok(session) => Json(InitResponse {
            pid: session.pid().to_string(),
        })
        .into_response(),
        Err(e) => {
            error!("Terminal init failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn attach(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<AttachQuery>,
) -> Response {
    ws.on_upgrade(move |socket| bridge(socket, state, query.pid))
}

async fn reject(mut socket: WebSocket, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}

/// Pump PTY output to the socket and socket text into the PTY until either
/// side ends. The shell does not outlive its socket.
async fn bridge(socket: WebSocket, state: AppState, pid: Option<String>) {
    let Some(pid) = pid.filter(|p| !p.is_empty()) else {
        reject(socket, "missing pid").await;
        return;
    };
    let Some(session) = state.sessions.get(&pid) else {
        debug!("Attach to unknown pid {}", pid);
        reject(socket, "unknown pid").await;
        return;
    };
    let Some(mut output) = session.take_output() else {
        debug!("pid {} already attached", pid);
        reject(socket, "already attached").await;
        return;
    };

    info!("Attached to shell {}", pid);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            chunk = output.recv() => match chunk {
                Some(data) => {
                    if sink.send(Message::Text(data.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: "shell exited".into(),
                        })))
                        .await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if !session.write(text.to_string()).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if !session.write(text).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.sessions.terminate(&pid);
}
