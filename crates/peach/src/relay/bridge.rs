//! Bidirectional frame forwarding.

use std::time::Duration;

use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TungsteniteCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::{RelayError, RelayOutcome, RelayState};

type PodSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_INTERNAL_ERROR: u16 = 1011;
const CLOSE_GOING_AWAY: u16 = 1001;

/// One way of ending a session, with the close frames owed to each side.
struct Ending {
    outcome: RelayOutcome,
    to_client: Option<AxumCloseFrame>,
    to_pod: Option<TungsteniteCloseFrame>,
}

fn log_transition(session: &str, from: RelayState, to: RelayState) {
    debug!("Relay {}: {} -> {}", session, from, to);
}

fn client_close(code: u16, reason: &str) -> AxumCloseFrame {
    AxumCloseFrame {
        code,
        reason: reason.into(),
    }
}

fn pod_close(code: u16, reason: &str) -> TungsteniteCloseFrame {
    TungsteniteCloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    }
}

/// Relay frames between `client` and the pod WebSocket at `pod_url`.
///
/// If the pod cannot be reached within `connect_timeout`, the client is sent
/// a close frame with code 1011 and the error is returned. Otherwise the
/// session runs until either side closes or `cancel` fires.
pub async fn relay(
    mut client: WebSocket,
    pod_url: &str,
    connect_timeout: Duration,
    cancel: CancellationToken,
) -> Result<RelayOutcome, RelayError> {
    let session = pod_url.to_string();
    debug!("Relay {}: {}", session, RelayState::Connecting);

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = client
                .send(AxumMessage::Close(Some(client_close(CLOSE_GOING_AWAY, "server shutting down"))))
                .await;
            log_transition(&session, RelayState::Connecting, RelayState::Closed);
            return Ok(RelayOutcome::Cancelled);
        }
        result = tokio::time::timeout(connect_timeout, connect_async(pod_url)) => result,
    };

    let pod = match connected {
        Ok(Ok((pod, _response))) => pod,
        Ok(Err(e)) => {
            return Err(fail_connect(
                client,
                &session,
                RelayError::Connect {
                    url: pod_url.to_string(),
                    message: e.to_string(),
                },
            )
            .await);
        }
        Err(_) => {
            return Err(fail_connect(
                client,
                &session,
                RelayError::ConnectTimeout {
                    url: pod_url.to_string(),
                    timeout: connect_timeout,
                },
            )
            .await);
        }
    };
    log_transition(&session, RelayState::Connecting, RelayState::Bridging);

    let (mut client_tx, mut client_rx) = client.split();
    let (mut pod_tx, mut pod_rx) = pod.split();

    // Whichever branch finishes first drops the other loop mid-flight.
    let ending = tokio::select! {
        ending = client_to_pod(&mut client_rx, &mut pod_tx) => ending,
        ending = pod_to_client(&mut pod_rx, &mut client_tx) => ending,
        _ = cancel.cancelled() => Ending {
            outcome: RelayOutcome::Cancelled,
            to_client: Some(client_close(CLOSE_GOING_AWAY, "server shutting down")),
            to_pod: Some(pod_close(CLOSE_GOING_AWAY, "server shutting down")),
        },
    };

    if let Some(frame) = ending.to_client {
        let _ = client_tx.send(AxumMessage::Close(Some(frame))).await;
    }
    let _ = client_tx.close().await;
    if let Some(frame) = ending.to_pod {
        let _ = pod_tx.send(TungsteniteMessage::Close(Some(frame))).await;
    }
    let _ = pod_tx.close().await;

    log_transition(&session, RelayState::Bridging, RelayState::Closed);
    info!("Relay {} ended: {}", session, ending.outcome);
    Ok(ending.outcome)
}

async fn fail_connect(mut client: WebSocket, session: &str, err: RelayError) -> RelayError {
    warn!("Relay {}: {}", session, err);
    let frame = client_close(CLOSE_INTERNAL_ERROR, "pod unreachable");
    let _ = client.send(AxumMessage::Close(Some(frame))).await;
    let _ = client.close().await;
    log_transition(session, RelayState::Connecting, RelayState::Closed);
    err
}

async fn client_to_pod(
    client_rx: &mut SplitStream<WebSocket>,
    pod_tx: &mut SplitSink<PodSocket, TungsteniteMessage>,
) -> Ending {
    while let Some(msg) = client_rx.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                return Ending {
                    outcome: RelayOutcome::ClientError(e.to_string()),
                    to_client: None,
                    to_pod: Some(pod_close(1000, "")),
                };
            }
        };
        let forward = match msg {
            AxumMessage::Text(text) => TungsteniteMessage::Text(text.to_string().into()),
            AxumMessage::Binary(data) => TungsteniteMessage::Binary(data),
            // Per hop; answered by each side's own stack.
            AxumMessage::Ping(_) | AxumMessage::Pong(_) => continue,
            AxumMessage::Close(frame) => {
                let to_pod = frame
                    .map(|f| pod_close(f.code, f.reason.as_str()))
                    .unwrap_or_else(|| pod_close(1000, ""));
                return Ending {
                    outcome: RelayOutcome::ClientClosed,
                    to_client: None,
                    to_pod: Some(to_pod),
                };
            }
        };
        if let Err(e) = pod_tx.send(forward).await {
            return Ending {
                outcome: RelayOutcome::PodError(e.to_string()),
                to_client: Some(client_close(CLOSE_INTERNAL_ERROR, "pod connection lost")),
                to_pod: None,
            };
        }
    }

    Ending {
        outcome: RelayOutcome::ClientClosed,
        to_client: None,
        to_pod: Some(pod_close(1000, "")),
    }
}

async fn pod_to_client(
    pod_rx: &mut SplitStream<PodSocket>,
    client_tx: &mut SplitSink<WebSocket, AxumMessage>,
) -> Ending {
    while let Some(msg) = pod_rx.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                return Ending {
                    outcome: RelayOutcome::PodError(e.to_string()),
                    to_client: Some(client_close(CLOSE_INTERNAL_ERROR, "pod connection lost")),
                    to_pod: None,
                };
            }
        };
        let forward = match msg {
            TungsteniteMessage::Text(text) => AxumMessage::Text(text.to_string().into()),
            TungsteniteMessage::Binary(data) => AxumMessage::Binary(data),
            TungsteniteMessage::Ping(_)
            | TungsteniteMessage::Pong(_)
            | TungsteniteMessage::Frame(_) => continue,
            TungsteniteMessage::Close(frame) => {
                let (code, reason) = match &frame {
                    Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                    None => (None, String::new()),
                };
                let to_client = client_close(code.unwrap_or(1000), &reason);
                return Ending {
                    outcome: RelayOutcome::PodClosed { code, reason },
                    to_client: Some(to_client),
                    to_pod: None,
                };
            }
        };
        if let Err(e) = client_tx.send(forward).await {
            return Ending {
                outcome: RelayOutcome::ClientError(e.to_string()),
                to_client: None,
                to_pod: Some(pod_close(CLOSE_GOING_AWAY, "client gone")),
            };
        }
    }

    Ending {
        outcome: RelayOutcome::PodClosed {
            code: None,
            reason: String::new(),
        },
        to_client: Some(client_close(CLOSE_INTERNAL_ERROR, "pod connection lost")),
        to_pod: None,
    }
}
