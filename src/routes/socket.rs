//! Push channel (`GET /socket`)
//!
//! ## Protocol
//!
//! Messages (client -> server):
//! - `{"event":"authenticate","token":"<jwt>"}` - bind this socket to a user
//! - `{"event":"ping"}` - keep-alive
//!
//! Messages (server -> client):
//! - `authenticated` - `{ userId }`
//! - `task-ending-soon` - `{ taskId, title, endTime, minutesRemaining }`
//! - `pong`
//! - `error` - `{ message }`
//!
//! A `?token=` query on the upgrade URL authenticates immediately. In dev
//! mode `authenticate` also accepts a bare `userId`.

use bson::oid::ObjectId;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use http_body_util::BodyExt;
use hyper::{Request, Response};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::response::BoxBody;
use crate::auth::jwt::extract_token_from_query;
use crate::auth::user_id_from_token;
use crate::notifier::{ClientMessage, ConnectionHandle, PushEvent};
use crate::server::AppState;
use crate::types::{PomodoroError, Result};

/// WebSocket type after upgrade
type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Handle the WebSocket upgrade for the push channel
pub fn upgrade<B>(state: Arc<AppState>, mut req: Request<B>) -> Result<Response<BoxBody>> {
    if !hyper_tungstenite::is_upgrade_request(&req) {
        return Err(PomodoroError::BadRequest("WebSocket upgrade required".into()));
    }

    let query_token = extract_token_from_query(req.uri().query(), "token");

    let (response, websocket) = hyper_tungstenite::upgrade(&mut req, None)
        .map_err(|e| PomodoroError::WebSocket(format!("Upgrade failed: {}", e)))?;

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                if let Err(e) = handle_connection(ws, state, query_token).await {
                    warn!("Push socket error: {}", e);
                }
            }
            Err(e) => {
                error!("WebSocket connection failed: {}", e);
            }
        }
    });

    Ok(response.map(|body| body.map_err(|never| match never {}).boxed()))
}

/// Per-socket state: the outbound handle and the user it is bound to
pub struct SocketSession {
    state: Arc<AppState>,
    handle: ConnectionHandle,
    user_id: Option<ObjectId>,
}

impl SocketSession {
    pub fn new(state: Arc<AppState>, handle: ConnectionHandle) -> Self {
        Self {
            state,
            handle,
            user_id: None,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.handle.id
    }

    pub fn user_id(&self) -> Option<ObjectId> {
        self.user_id
    }

    /// Handle one text frame; returns the direct reply, if any
    pub async fn on_text(&mut self, text: &str) -> Option<PushEvent> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping) => Some(PushEvent::Pong),
            Ok(ClientMessage::Authenticate { token, user_id }) => {
                Some(self.authenticate(token, user_id).await)
            }
            Err(e) => {
                debug!("Unrecognized socket message: {}", e);
                Some(PushEvent::error("Unrecognized message"))
            }
        }
    }

    /// Bind this socket to a user and register it for deadline pushes
    pub async fn authenticate(&mut self, token: Option<String>, raw_user_id: Option<String>) -> PushEvent {
        match self.resolve_user(token, raw_user_id).await {
            Ok(user_id) => {
                if self.user_id.is_some_and(|current| current != user_id) {
                    self.state.registry.deregister(self.handle.id);
                }
                self.state.registry.register(user_id, self.handle.clone());
                self.user_id = Some(user_id);
                info!(user_id = %user_id, connection_id = %self.handle.id, "Push socket authenticated");
                PushEvent::Authenticated {
                    user_id: user_id.to_hex(),
                }
            }
            Err(e) => PushEvent::error(e.to_string()),
        }
    }

    async fn resolve_user(&self, token: Option<String>, raw_user_id: Option<String>) -> Result<ObjectId> {
        let user_id = match (token, raw_user_id) {
            (Some(token), _) => user_id_from_token(&self.state.jwt, &token)?,
            (None, Some(raw)) if self.state.args.dev_mode => ObjectId::parse_str(raw.trim())
                .map_err(|_| PomodoroError::Unauthorized("Invalid user id".into()))?,
            _ => {
                return Err(PomodoroError::Unauthorized(
                    "Unauthorized request - No token provided".into(),
                ))
            }
        };

        if self.state.store.find_user(&user_id).await?.is_none() {
            return Err(PomodoroError::Unauthorized(
                "Invalid Access Token - User not found".into(),
            ));
        }
        Ok(user_id)
    }

    /// Drop this socket from the registry
    pub fn close(&self) {
        if let Some(user_id) = self.state.registry.deregister(self.handle.id) {
            info!(user_id = %user_id, "Push socket disconnected");
        }
    }
}

async fn handle_connection(
    ws: HyperWebSocket,
    state: Arc<AppState>,
    query_token: Option<String>,
) -> Result<()> {
    let (mut sender, mut receiver) = ws.split();
    let (handle, mut events) = ConnectionHandle::new();
    let mut session = SocketSession::new(state, handle);

    debug!(connection_id = %session.connection_id(), "Push socket connected");

    if let Some(token) = query_token {
        let reply = session.authenticate(Some(token), None).await;
        sender.send(WsMessage::Text(reply.to_json())).await?;
    }

    let result = pump(&mut sender, &mut receiver, &mut session, &mut events).await;
    session.close();
    result
}

/// Relay queued pushes out and client frames in until either side closes.
/// Any failed send ends the loop with that error.
async fn pump<S, R>(
    sender: &mut S,
    receiver: &mut R,
    session: &mut SocketSession,
    events: &mut UnboundedReceiver<PushEvent>,
) -> Result<()>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
    R: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            // Pushes queued by the notifier
            event = events.recv() => {
                let Some(event) = event else { return Ok(()) };
                sender.send(WsMessage::Text(event.to_json())).await?;
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(reply) = session.on_text(&text).await {
                            sender.send(WsMessage::Text(reply.to_json())).await?;
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        sender.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(e.into()),
                    _ => {}
                }
            }
        }
    }
}
