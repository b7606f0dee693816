//! # WebSocket Downstream
//!
//! `GET /ws?keys=Gold,Silver` upgrades to a WebSocket registered with the
//! [`Dispatcher`] for the listed keys.
//!
//! Client to server:
//! `{"subscribe":["Gold"]}` and/or `{"unsubscribe":["Silver"]}`.
//!
//! Server to client:
//! `{"type":"update","key":"Gold","value":"1950","serverTime":1700000000000}`
//! for every change, `{"type":"ack","keys":[..]}` with the full interest set
//! after each (un)subscribe, and `{"type":"error","message":..}` for frames
//! that could not be understood.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lib_quotes::core::{ClientId, Dispatcher};
use lib_quotes::ChangeEvent;

use super::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Comma separated initial interests.
    pub keys: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientMessage {
    #[serde(default)]
    subscribe: Vec<String>,
    #[serde(default)]
    unsubscribe: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerMessage<'a> {
    Update {
        key: &'a str,
        value: &'a str,
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    Ack {
        keys: Vec<String>,
    },
    Error {
        message: String,
    },
}

impl<'a> From<&'a ChangeEvent> for ServerMessage<'a> {
    fn from(event: &'a ChangeEvent) -> Self {
        ServerMessage::Update {
            key: &event.key,
            value: &event.value,
            server_time: event.server_time,
        }
    }
}

fn parse_keys(raw: Option<&str>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Applies one text frame from client `id` and returns the reply.
fn apply_client_frame(dispatcher: &Dispatcher, id: ClientId, text: &str) -> ServerMessage<'static> {
    let request: ClientMessage = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            return ServerMessage::Error {
                message: format!("expected {{\"subscribe\":[..]}} or {{\"unsubscribe\":[..]}}: {}", e),
            }
        }
    };

    if !request.subscribe.is_empty() {
        dispatcher.subscribe(id, &request.subscribe);
    }
    if !request.unsubscribe.is_empty() {
        dispatcher.unsubscribe(id, &request.unsubscribe);
    }
    ServerMessage::Ack {
        keys: dispatcher.interests(id).unwrap_or_default(),
    }
}

/// Upgrades the connection and hands it to the session loop.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let keys = parse_keys(params.keys.as_deref());
    let dispatcher = Arc::clone(&state.dispatcher);
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, keys))
}

async fn handle_socket(socket: WebSocket, dispatcher: Arc<Dispatcher>, keys: Vec<String>) {
    let (id, mut events) = dispatcher.add_client(keys);
    let (mut sink, mut stream) = socket.split();

    loop {
        let reply = tokio::select! {
            event = events.recv() => match event {
                Some(event) => encode(&ServerMessage::from(event.as_ref())),
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    encode(&apply_client_frame(&dispatcher, id, text.as_str()))
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("Client {} socket error: {}", id, e);
                    break;
                }
            },
        };

        let Some(reply) = reply else { continue };
        if sink.send(Message::Text(reply.into())).await.is_err() {
            break;
        }
    }

    dispatcher.remove_client(id);
    info!("Client {} disconnected", id);
}

fn encode(message: &ServerMessage<'_>) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Could not encode outgoing message: {}", e);
            None
        }
    }
}
