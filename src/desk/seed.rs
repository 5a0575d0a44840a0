use rand::seq::IndexedRandom;

use super::events::EventSource;
use super::gateway::MutationGateway;
use super::models::*;
use crate::errors::DeskError;

/// A demo ticket. Status is kept as loose text and normalized on use.
#[derive(Debug, Clone, Copy)]
pub struct SampleTicket {
    pub title: &'static str,
    pub description: &'static str,
    pub status: &'static str,
    pub priority: &'static str,
}

pub const SAMPLE_TICKETS: [SampleTicket; 6] = [
    SampleTicket {
        title: "BB-X1 Robotic Arm Not Responding",
        description: "The robotic arm on our BB-X1 unit froze mid-pour during the morning rush. Error code E003 showing on display. Customer was waiting for a latte when it happened.",
        status: "open",
        priority: "high",
    },
    SampleTicket {
        title: "Grinder Motor Overcurrent Issues",
        description: "Getting repeated grinder motor overcurrent warnings. Happens about 3-4 times per day, usually during busy periods. Unit auto-recovers but causes delays.",
        status: "in-progress",
        priority: "medium",
    },
    SampleTicket {
        title: "Facial Recognition Not Working",
        description: "Customer preference recognition system seems broken. Regular customers not being recognized, having to manually input their usual orders.",
        status: "open",
        priority: "low",
    },
    SampleTicket {
        title: "Boiler Temperature Inconsistent",
        description: "Water temperature fluctuating between 85-95°C instead of maintaining steady 93°C. Affecting espresso quality and customer complaints increasing.",
        status: "open",
        priority: "high",
    },
    SampleTicket {
        title: "Milk Frother Creating Poor Foam",
        description: "Steam wand not creating proper microfoam for cappuccinos and lattes. Foam is too thick and separates quickly. Checked steam pressure - seems normal.",
        status: "closed",
        priority: "medium",
    },
    SampleTicket {
        title: "Bean Hopper Sensor Malfunction",
        description: "System showing \"insufficient beans\" error even when hopper is full. Sensor seems to be stuck or miscalibrated.",
        status: "open",
        priority: "medium",
    },
];

impl SampleTicket {
    pub fn to_new_ticket(&self) -> Result<NewTicket, DeskError> {
        let status = self
            .status
            .parse::<TicketStatus>()
            .map_err(|e| DeskError::validation("status", e))?;
        let priority = self
            .priority
            .parse::<Priority>()
            .map_err(|e| DeskError::validation("priority", e))?;
        Ok(NewTicket::new(self.title)
            .with_description(self.description)
            .with_status(status)
            .with_priority(priority))
    }
}

/// Replace every ticket with one randomly chosen sample.
pub fn seed(gateway: &MutationGateway) -> Result<Ticket, DeskError> {
    let sample = SAMPLE_TICKETS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(SAMPLE_TICKETS[0]);
    seed_with(gateway, &sample)
}

/// Delete all tickets (one `ticket_deleted` event each), then create `sample`.
pub fn seed_with(gateway: &MutationGateway, sample: &SampleTicket) -> Result<Ticket, DeskError> {
    let existing = gateway.store().list_tickets()?;
    let cleared = existing.len();
    for ticket in existing {
        match gateway.delete_ticket(ticket.id, EventSource::Seed) {
            Ok(_) => {}
            // Removed concurrently by another caller.
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    let ticket = gateway.create_ticket(sample.to_new_ticket()?, EventSource::Seed)?;
    tracing::info!(cleared, ticket_id = ticket.id, title = %ticket.title, "store seeded with sample ticket");
    Ok(ticket)
}
