//! Typed error hierarchy for the ticket desk.
//!
//! `DeskError` is returned by the store, the mutation gateway and the agent
//! write-back path. Reasoning failures never leave the agent loop or the guide
//! selector; they are logged there and replaced by a default.

use thiserror::Error;

/// Errors from the ticket store, the gateway and the agent pipeline.
#[derive(Debug, Error)]
pub enum DeskError {
    #[error("Ticket {id} not found")]
    TicketNotFound { id: i64 },

    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Reasoning failed: {0}")]
    ReasoningFailure(String),

    #[error("Event transport unavailable: {0}")]
    Connectivity(String),

    #[error("Ticket store lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeskError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        DeskError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DeskError::TicketNotFound { .. })
    }
}
