//! GET /api/actors/{kind}/{id}/connect: an actor's connection channel.
//!
//! Server → client: `{"type": "state_update", "state": …}` for every change
//! the actor broadcasts, and `{"type": "error", "message": …}` when a command
//! sent on this socket is rejected. The error goes to this socket only.
//!
//! Client → server: a reviewer command as a JSON text frame, delivered to the
//! actor's message handler as one serialized invocation. Commands must carry
//! an intervention token, either as a `token` field in the frame or as the
//! `?token=` the socket was opened with. A socket opened without one can
//! watch but not decide.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use holdfast_core::channel::ChannelMessage;
use holdfast_core::types::ActorKey;
use holdfast_core::{ActorStatus, HoldfastError};
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Upgrade to a WebSocket once the actor has passed its guard.
///
/// A locked actor, or a `?token=` that does not verify for this actor, is
/// refused here with a plain HTTP error instead of a socket.
pub async fn connect_actor(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response, AppError> {
    let key = app.host.actor_key(&kind, &id)?;
    let token = query.token.filter(|t| !t.is_empty());
    if let Some(token) = &token {
        app.host.verify_token(&key, token, Utc::now())?;
    }
    // Subscribe before waking the actor so nothing between the snapshot and
    // the first forwarded update is lost.
    let updates = BroadcastStream::new(app.hub.subscribe(&key));

    let host = app.host.clone();
    let connect_key = key.clone();
    let snapshot = tokio::task::spawn_blocking(move || host.connect(&connect_key))
        .await
        .map_err(AppError::join)??;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app, key, token, snapshot, updates)))
}

async fn handle_socket(
    socket: WebSocket,
    app: AppState,
    key: ActorKey,
    token: Option<String>,
    snapshot: ActorStatus,
    mut updates: BroadcastStream<ChannelMessage>,
) {
    tracing::info!(actor = %key, "connection opened");
    let (mut sender, mut receiver) = socket.split();

    let initial = match serde_json::to_value(&snapshot) {
        Ok(state) => ChannelMessage::StateUpdate { state },
        Err(e) => ChannelMessage::Error {
            message: e.to_string(),
        },
    };
    if send(&mut sender, &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ChannelMessage::Error { message: "binary frames are not supported".into() };
                        if send(&mut sender, &reply).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(actor = %key, error = %e, "connection read error");
                        break;
                    }
                };

                if let Err(e) = deliver(&app, &key, text, token.clone()).await {
                    tracing::debug!(actor = %key, error = %e, "command rejected");
                    let reply = ChannelMessage::Error { message: e.to_string() };
                    if send(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
            }
            update = updates.next() => {
                match update {
                    Some(Ok(message)) => {
                        if send(&mut sender, &message).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(count))) => {
                        tracing::warn!(actor = %key, missed = count, "subscriber lagged");
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!(actor = %key, "connection closed");
}

async fn deliver(
    app: &AppState,
    key: &ActorKey,
    text: String,
    token: Option<String>,
) -> Result<(), HoldfastError> {
    let host = app.host.clone();
    let key = key.clone();
    tokio::task::spawn_blocking(move || host.deliver_message(&key, &text, token.as_deref()))
        .await
        .map_err(|e| HoldfastError::Store(format!("task join error: {e}")))?
}

async fn send<S>(sender: &mut S, message: &ChannelMessage) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    sender.send(Message::Text(text.into())).await
}
