//! Duplex Gateway
//!
//! WebSocket endpoint for downstream bot processes. A client authenticates with
//! `x-bot-appid` and `authorization` headers, claims a duplex slot, then receives
//! pushed events and sign requests and answers the latter with correlated replies.

pub mod protocol;
pub mod registry;

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Request, State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::api::{client_ip, header_str, AppState, BOT_ID_HEADER};
use crate::error::RelayError;
use crate::observability::redact;

pub use registry::{ConnectionRegistry, LiveConnection, SlotKey};

/// WebSocket upgrade handler.
///
/// Connections are authenticated before the upgrade; refused clients never
/// reach the registry.
#[instrument(skip_all)]
pub async fn handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    request: Request,
) -> Response {
    let headers = request.headers();
    let ip = client_ip(headers, request.extensions(), state.config.trust_real_ip);
    info!(ip = %ip, uri = %request.uri(), "New duplex connection request");

    if state.blacklist.contains(&ip) {
        warn!(ip = %ip, "Duplex connection from blacklisted IP refused");
        return StatusCode::FORBIDDEN.into_response();
    }

    let bot_id = header_str(headers, BOT_ID_HEADER);
    let secret = header_str(headers, AUTHORIZATION.as_str());

    let slot = match state.registry.authenticate(bot_id, secret) {
        Ok(slot) => slot,
        Err(e) => {
            warn!(ip = %ip, error = %e, "Duplex connection refused");
            let status = match e {
                RelayError::Auth(_) => StatusCode::UNAUTHORIZED,
                _ => StatusCode::FORBIDDEN,
            };
            return status.into_response();
        }
    };

    info!(
        bot_id = %slot.bot_id,
        slot = slot.index,
        ip = %ip,
        token = %secret.map(redact).unwrap_or_default(),
        "Duplex connection authenticated"
    );

    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| serve_connection(socket, registry, slot, ip))
}

/// Drive one attached connection until it closes or fails.
///
/// The slot is cleared as soon as the read side ends, before the write task is
/// stopped, so no dispatcher sees a dead connection as available.
pub async fn serve_connection(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    slot: SlotKey,
    ip: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let connection = LiveConnection::new(ip.clone(), tx);
    let connection_id = connection.id;
    registry.attach(slot.clone(), connection);
    info!(
        bot_id = %slot.bot_id,
        slot = slot.index,
        ip = %ip,
        connection_id = %connection_id,
        "Duplex connection attached"
    );

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut failure = None;
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                registry.route_inbound(connection_id, text.as_str());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    registry.detach(&slot, connection_id);
    // Dropping both halves closes the transport.
    writer.abort();

    match failure {
        Some(e) => error!(
            bot_id = %slot.bot_id,
            slot = slot.index,
            ip = %ip,
            error = %e,
            "Duplex connection failed, closed"
        ),
        None => info!(
            bot_id = %slot.bot_id,
            slot = slot.index,
            ip = %ip,
            "Duplex connection closed"
        ),
    }
}
