//! Websocket endpoint
//!
//! The route guard has already resolved the credential. The handshake binds
//! the connection to the resolved principal and hands the socket to the hub.

use crate::auth::{claimed_owner_id, Authenticated};
use crate::server::connections::ConnectionHandle;
use crate::server::error::ApiError;
use crate::server::hub::NotificationHub;
use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
    Extension,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SUBSCRIPTIONS_HEADER: &str = "subscriptions";

/// Pick the hub id for a resolved principal.
///
/// The store-resolved id wins. A token prefix that decodes to a different id
/// is rejected; one that does not decode at all is ignored.
pub fn bind_principal(auth: &Authenticated, token: Option<&str>) -> Result<i64, ApiError> {
    let resolved = auth.principal.id;

    match token.and_then(claimed_owner_id) {
        Some(claimed) if claimed != resolved => {
            warn!(
                resolved = resolved,
                claimed = claimed,
                "Token prefix disagrees with resolved principal"
            );
            Err(ApiError::Forbidden)
        }
        _ => Ok(resolved),
    }
}

pub async fn websocket_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let principal_id = bind_principal(&auth, token)?;

    let subscriptions = headers
        .get(SUBSCRIPTIONS_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| run_session(socket, hub, principal_id, subscriptions)))
}

/// Drive one admitted connection until disconnect or supersession
pub async fn run_session(
    socket: WebSocket,
    hub: Arc<NotificationHub>,
    principal_id: i64,
    subscriptions: Option<String>,
) {
    let (handle, mut rx) = hub.open(principal_id, subscriptions.as_deref());
    let conn_id = handle.conn_id();
    let ping_interval = hub.config().ping_interval;

    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.tick().await;

        loop {
            tokio::select! {
                queued = rx.recv() => {
                    let Some(msg) = queued else { break };
                    if sender.send(Message::Text(msg.payload.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sender.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = handle.closed() => {
                info!(principal_id = principal_id, conn_id = %conn_id, "Connection superseded");
                break;
            }
            frame = receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => reply(&hub, &handle, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => reply(&hub, &handle, text).await,
                Err(_) => warn!(conn_id = %conn_id, "Ignoring non UTF-8 binary frame"),
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                // Handled automatically by axum
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    let released = hub.release(&handle);
    debug!(
        principal_id = principal_id,
        conn_id = %conn_id,
        released = released,
        "WebSocket client disconnected"
    );
    send_task.abort();
}

async fn reply(hub: &NotificationHub, handle: &ConnectionHandle, text: &str) {
    let Some(response) = hub.handle_control(handle, text) else {
        return;
    };

    if let Err(e) = handle.send(&response).await {
        debug!(conn_id = %handle.conn_id(), error = %e, "Failed to queue reply");
    }
}
