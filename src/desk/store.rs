use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::models::*;
use crate::errors::DeskError;

/// In-memory ticket store.
///
/// Cloning yields another handle onto the same state. Every operation takes
/// the single store lock, so concurrent writers are serialized and id
/// assignment never collides. Callers outside this module should mutate
/// through `MutationGateway` so that each write is broadcast.
#[derive(Clone, Default)]
pub struct TicketStore {
    inner: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    tickets: BTreeMap<i64, Ticket>,
    last_ticket_id: i64,
    last_comment_id: i64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl StoreState {
    /// Wall-clock time clamped so it never runs backwards between writes.
    fn now(&mut self) -> DateTime<Utc> {
        let now = match self.last_timestamp {
            Some(last) => Utc::now().max(last),
            None => Utc::now(),
        };
        self.last_timestamp = Some(now);
        now
    }
}

fn require_text(field: &'static str, value: &str) -> Result<String, DeskError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DeskError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

impl TicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, DeskError> {
        self.inner.lock().map_err(|_| DeskError::LockPoisoned)
    }

    pub fn create_ticket(&self, new: NewTicket) -> Result<Ticket, DeskError> {
        let title = require_text("title", &new.title)?;
        let mut state = self.lock()?;
        state.last_ticket_id += 1;
        let ticket = Ticket {
            id: state.last_ticket_id,
            title,
            description: new.description,
            status: new.status,
            priority: new.priority,
            created_at: state.now(),
            comments: Vec::new(),
        };
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, DeskError> {
        Ok(self.lock()?.tickets.get(&id).cloned())
    }

    pub fn ticket_title(&self, id: i64) -> Result<Option<String>, DeskError> {
        Ok(self.lock()?.tickets.get(&id).map(|t| t.title.clone()))
    }

    /// Newest first; equal timestamps fall back to the higher id first.
    pub fn list_tickets(&self) -> Result<Vec<Ticket>, DeskError> {
        self.list_tickets_filtered(&TicketFilter::default())
    }

    pub fn list_tickets_filtered(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, DeskError> {
        let state = self.lock()?;
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(tickets)
    }

    pub fn add_comment(&self, ticket_id: i64, new: NewComment) -> Result<Comment, DeskError> {
        let author = require_text("author", &new.author)?;
        let message = require_text("message", &new.message)?;
        let mut state = self.lock()?;
        if !state.tickets.contains_key(&ticket_id) {
            return Err(DeskError::TicketNotFound { id: ticket_id });
        }
        state.last_comment_id += 1;
        let comment = Comment {
            id: state.last_comment_id,
            ticket_id,
            author,
            message,
            created_at: state.now(),
        };
        if let Some(ticket) = state.tickets.get_mut(&ticket_id) {
            ticket.comments.push(comment.clone());
        }
        Ok(comment)
    }

    pub fn update_status(&self, id: i64, status: TicketStatus) -> Result<Ticket, DeskError> {
        let mut state = self.lock()?;
        let ticket = state
            .tickets
            .get_mut(&id)
            .ok_or(DeskError::TicketNotFound { id })?;
        ticket.status = status;
        Ok(ticket.clone())
    }

    /// Remove a ticket together with its comments, returning what was removed.
    pub fn remove_ticket(&self, id: i64) -> Result<Option<Ticket>, DeskError> {
        Ok(self.lock()?.tickets.remove(&id))
    }

    /// Cascade delete. `false` when the ticket does not exist.
    pub fn delete_ticket(&self, id: i64) -> Result<bool, DeskError> {
        Ok(self.remove_ticket(id)?.is_some())
    }

    pub fn ticket_count(&self) -> Result<usize, DeskError> {
        Ok(self.lock()?.tickets.len())
    }

    pub fn comment_count(&self) -> Result<usize, DeskError> {
        Ok(self
            .lock()?
            .tickets
            .values()
            .map(|t| t.comments.len())
            .sum())
    }
}
