use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::api::SharedState;
use super::events::{DeskEvent, EventPayload, EventSource, Subscription};
use super::models::*;
use crate::errors::DeskError;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

const SUBSCRIBE_REQUEST: &str = "subscribe_to_tickets";

// ── WebSocket frame types ────────────────────────────────────────────

/// Frames pushed to clients. Every frame carries an `event` name and a
/// human-readable `message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WsFrame {
    Connected {
        message: String,
    },
    Subscribed {
        message: String,
    },
    TicketCreated {
        ticket: Ticket,
        source: EventSource,
        timestamp: DateTime<Utc>,
        message: String,
    },
    CommentCreated {
        comment: Comment,
        ticket_id: i64,
        ticket_title: String,
        source: EventSource,
        timestamp: DateTime<Utc>,
        message: String,
    },
    TicketUpdated {
        ticket: Ticket,
        previous_status: TicketStatus,
        source: EventSource,
        timestamp: DateTime<Utc>,
        message: String,
    },
    TicketDeleted {
        ticket_id: i64,
        ticket_title: String,
        source: EventSource,
        timestamp: DateTime<Utc>,
        message: String,
    },
}

impl WsFrame {
    pub fn connected() -> Self {
        WsFrame::Connected {
            message: "Connected to BeanBotics Ticketing System".to_string(),
        }
    }

    pub fn subscribed() -> Self {
        WsFrame::Subscribed {
            message: "Subscribed to ticket updates".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, DeskError> {
        serde_json::to_string(self).map_err(|e| DeskError::Other(e.into()))
    }
}

impl From<&DeskEvent> for WsFrame {
    fn from(event: &DeskEvent) -> Self {
        let source = event.source;
        let timestamp = event.timestamp;
        match &event.payload {
            EventPayload::TicketCreated { ticket } => {
                let message = match source {
                    EventSource::Seed => format!("Random sample ticket created: {}", ticket.title),
                    _ => format!("New ticket created: {}", ticket.title),
                };
                WsFrame::TicketCreated {
                    ticket: ticket.clone(),
                    source,
                    timestamp,
                    message,
                }
            }
            EventPayload::CommentCreated {
                comment,
                ticket_title,
            } => WsFrame::CommentCreated {
                message: format!(
                    "New comment on ticket #{}: {}",
                    comment.ticket_id, ticket_title
                ),
                comment: comment.clone(),
                ticket_id: comment.ticket_id,
                ticket_title: ticket_title.clone(),
                source,
                timestamp,
            },
            EventPayload::TicketUpdated {
                ticket,
                previous_status,
            } => WsFrame::TicketUpdated {
                message: format!(
                    "Ticket #{} status changed from {} to {}",
                    ticket.id, previous_status, ticket.status
                ),
                ticket: ticket.clone(),
                previous_status: *previous_status,
                source,
                timestamp,
            },
            EventPayload::TicketDeleted {
                ticket_id,
                ticket_title,
            } => WsFrame::TicketDeleted {
                message: format!("Ticket deleted: #{} - {}", ticket_id, ticket_title),
                ticket_id: *ticket_id,
                ticket_title: ticket_title.clone(),
                source,
                timestamp,
            },
        }
    }
}

/// Whether a client text frame asks to subscribe. Accepts the bare event
/// name, `{"event": "subscribe_to_tickets"}` / `{"type": ...}`, or the
/// `["subscribe_to_tickets", ...]` array form used by socket.io-style clients.
pub fn is_subscribe_request(text: &str) -> bool {
    let text = text.trim();
    if text == SUBSCRIBE_REQUEST {
        return true;
    }
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => ["event", "type"]
            .iter()
            .any(|k| map.get(*k).and_then(|v| v.as_str()) == Some(SUBSCRIBE_REQUEST)),
        Ok(serde_json::Value::Array(items)) => {
            items.first().and_then(|v| v.as_str()) == Some(SUBSCRIBE_REQUEST)
        }
        _ => false,
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    // Subscribe before anything is sent so no event published after the
    // upgrade can be missed.
    let events = state.gateway.subscribe();
    let connection_id = Uuid::new_v4();
    let (sender, receiver) = socket.split();
    tracing::info!(%connection_id, subscribers = state.gateway.events().subscriber_count(), "websocket client connected");
    match run_socket_loop(sender, receiver, events).await {
        Ok(()) => tracing::info!(%connection_id, "websocket client disconnected"),
        Err(e) => tracing::debug!(%connection_id, error = %e, "websocket connection dropped"),
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &WsFrame,
) -> Result<(), DeskError> {
    let json = frame.to_json()?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| DeskError::Connectivity(e.to_string()))
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines event forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits with a connectivity error.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut events: Subscription,
) -> Result<(), DeskError> {
    send_frame(&mut sender, &WsFrame::connected()).await?;

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    let result = loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break Err(DeskError::Connectivity("pong timeout".to_string()));
                }
                if let Err(e) = sender.send(Message::Ping(Default::default())).await {
                    break Err(DeskError::Connectivity(e.to_string()));
                }
                awaiting_pong = true;
            }

            event = events.next_event() => {
                let Some(event) = event else {
                    break Ok(());
                };
                if let Err(e) = send_frame(&mut sender, &WsFrame::from(&event)).await {
                    break Err(e);
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if is_subscribe_request(text.as_str()) {
                            if let Err(e) = send_frame(&mut sender, &WsFrame::subscribed()).await {
                                break Err(e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(DeskError::Connectivity(e.to_string())),
                }
            }
        }
    };

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
    result
}
