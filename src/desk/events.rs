//! Domain events and the fan-out broadcaster that carries them.
//!
//! The broadcaster is a thin wrapper over `tokio::sync::broadcast`: each
//! subscriber owns a bounded ring of `capacity` events. A subscriber that
//! falls further behind loses the oldest events (and only its own); the
//! publisher never waits. Nothing is persisted or replayed.

use std::fmt;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::models::{Comment, Ticket, TicketStatus};

/// Default per-subscriber queue depth.
pub const DEFAULT_CAPACITY: usize = 256;

/// Which boundary caused a mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Ui,
    Api,
    Agent,
    Seed,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ui => "ui",
            Self::Api => "api",
            Self::Agent => "agent",
            Self::Seed => "seed",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    TicketCreated {
        ticket: Ticket,
    },
    CommentCreated {
        comment: Comment,
        ticket_title: String,
    },
    TicketUpdated {
        ticket: Ticket,
        previous_status: TicketStatus,
    },
    TicketDeleted {
        ticket_id: i64,
        ticket_title: String,
    },
}

/// An immutable notification describing one committed store mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeskEvent {
    pub payload: EventPayload,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
}

impl DeskEvent {
    pub fn new(payload: EventPayload, source: EventSource) -> Self {
        Self {
            payload,
            source,
            timestamp: Utc::now(),
        }
    }

    /// Wire name of the event, as used in WebSocket frames.
    pub fn name(&self) -> &'static str {
        match self.payload {
            EventPayload::TicketCreated { .. } => "ticket_created",
            EventPayload::CommentCreated { .. } => "comment_created",
            EventPayload::TicketUpdated { .. } => "ticket_updated",
            EventPayload::TicketDeleted { .. } => "ticket_deleted",
        }
    }

    pub fn ticket_id(&self) -> i64 {
        match &self.payload {
            EventPayload::TicketCreated { ticket } | EventPayload::TicketUpdated { ticket, .. } => {
                ticket.id
            }
            EventPayload::CommentCreated { comment, .. } => comment.ticket_id,
            EventPayload::TicketDeleted { ticket_id, .. } => *ticket_id,
        }
    }
}

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<DeskEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver to every live subscriber. Returns how many subscribers the
    /// event was queued for; zero subscribers is not an error.
    pub fn publish(&self, event: DeskEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's view of the event stream, starting at the moment it
/// subscribed. Dropping it disconnects the subscriber.
pub struct Subscription {
    rx: broadcast::Receiver<DeskEvent>,
}

impl Subscription {
    /// Wait for the next event in publish order. Returns `None` once the
    /// broadcaster is gone.
    ///
    /// Cancel-safe: dropping the future before it resolves loses nothing.
    pub async fn next_event(&mut self) -> Option<DeskEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged behind, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = DeskEvent> {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next_event().await.map(|event| (event, sub))
        })
    }
}
