use std::sync::{Arc, Mutex};

use super::events::{DeskEvent, EventBroadcaster, EventPayload, EventSource, Subscription};
use super::models::*;
use super::store::TicketStore;
use crate::errors::DeskError;

/// The single write path into the ticket store.
///
/// Each mutation runs under one commit lock: the store write happens first and
/// the matching event is published before the lock is released and before the
/// caller gets its result. A subscriber that sees an event can therefore
/// re-query the store and find the mutation, and the global event order is
/// the commit order. Failed writes publish nothing.
#[derive(Clone)]
pub struct MutationGateway {
    store: TicketStore,
    events: EventBroadcaster,
    commit: Arc<Mutex<()>>,
}

impl MutationGateway {
    pub fn new(store: TicketStore, events: EventBroadcaster) -> Self {
        Self {
            store,
            events,
            commit: Arc::new(Mutex::new(())),
        }
    }

    /// Read access. Writes must go through the gateway methods.
    pub fn store(&self) -> &TicketStore {
        &self.store
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    fn commit<T>(
        &self,
        source: EventSource,
        op: impl FnOnce(&TicketStore) -> Result<(T, EventPayload), DeskError>,
    ) -> Result<T, DeskError> {
        let _guard = self.commit.lock().map_err(|_| DeskError::LockPoisoned)?;
        let (value, payload) = op(&self.store)?;
        let event = DeskEvent::new(payload, source);
        let name = event.name();
        let ticket_id = event.ticket_id();
        let delivered = self.events.publish(event);
        tracing::debug!(event = name, ticket_id, %source, delivered, "event published");
        Ok(value)
    }

    pub fn create_ticket(&self, new: NewTicket, source: EventSource) -> Result<Ticket, DeskError> {
        let ticket = self.commit(source, |store| {
            let ticket = store.create_ticket(new)?;
            Ok((
                ticket.clone(),
                EventPayload::TicketCreated { ticket },
            ))
        })?;
        tracing::info!(ticket_id = ticket.id, priority = %ticket.priority, %source, "ticket created");
        Ok(ticket)
    }

    pub fn add_comment(
        &self,
        ticket_id: i64,
        new: NewComment,
        source: EventSource,
    ) -> Result<Comment, DeskError> {
        let comment = self.commit(source, |store| {
            let comment = store.add_comment(ticket_id, new)?;
            let ticket_title = store
                .ticket_title(ticket_id)?
                .ok_or(DeskError::TicketNotFound { id: ticket_id })?;
            Ok((
                comment.clone(),
                EventPayload::CommentCreated {
                    comment,
                    ticket_title,
                },
            ))
        })?;
        tracing::info!(ticket_id, comment_id = comment.id, author = %comment.author, %source, "comment added");
        Ok(comment)
    }

    pub fn update_status(
        &self,
        ticket_id: i64,
        status: TicketStatus,
        source: EventSource,
    ) -> Result<Ticket, DeskError> {
        let ticket = self.commit(source, |store| {
            let previous_status = store
                .get_ticket(ticket_id)?
                .map(|t| t.status)
                .ok_or(DeskError::TicketNotFound { id: ticket_id })?;
            let ticket = store.update_status(ticket_id, status)?;
            Ok((
                ticket.clone(),
                EventPayload::TicketUpdated {
                    ticket,
                    previous_status,
                },
            ))
        })?;
        tracing::info!(ticket_id, %status, %source, "ticket status changed");
        Ok(ticket)
    }

    /// Delete a ticket and its comments. Unlike the store, a missing ticket is
    /// reported to the caller as `TicketNotFound`.
    pub fn delete_ticket(&self, ticket_id: i64, source: EventSource) -> Result<Ticket, DeskError> {
        let ticket = self.commit(source, |store| {
            let ticket = store
                .remove_ticket(ticket_id)?
                .ok_or(DeskError::TicketNotFound { id: ticket_id })?;
            let payload = EventPayload::TicketDeleted {
                ticket_id,
                ticket_title: ticket.title.clone(),
            };
            Ok((ticket, payload))
        })?;
        tracing::info!(ticket_id, comments = ticket.comments.len(), %source, "ticket deleted");
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> MutationGateway {
        MutationGateway::new(TicketStore::new(), EventBroadcaster::new(64))
    }

    /// Drain whatever is already queued without waiting for more.
    async fn drain(sub: &mut Subscription) -> Vec<DeskEvent> {
        let mut out = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(20), sub.next_event()).await
        {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_arm_stuck_scenario() -> anyhow::Result<()> {
        let gw = gateway();
        let mut sub = gw.subscribe();

        let ticket = gw.create_ticket(
            NewTicket::new("Arm stuck").with_priority(Priority::High),
            EventSource::Api,
        )?;
        let events = drain(&mut sub).await;
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::TicketCreated { ticket: t } => {
                assert_eq!(t, &ticket);
                assert_eq!(t.status, TicketStatus::Open);
                assert_eq!(t.priority, Priority::High);
            }
            other => panic!("Expected TicketCreated, got {:?}", other),
        }

        let comment = gw.add_comment(ticket.id, NewComment::new("tech", "checked"), EventSource::Ui)?;
        let events = drain(&mut sub).await;
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::CommentCreated {
                comment: c,
                ticket_title,
            } => {
                assert_eq!(c, &comment);
                assert_eq!(c.ticket_id, ticket.id);
                assert_eq!(ticket_title, "Arm stuck");
            }
            other => panic!("Expected CommentCreated, got {:?}", other),
        }
        assert_eq!(events[0].source, EventSource::Ui);

        let removed = gw.delete_ticket(ticket.id, EventSource::Ui)?;
        assert_eq!(removed.comments.len(), 1);
        let events = drain(&mut sub).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].payload,
            EventPayload::TicketDeleted {
                ticket_id: ticket.id,
                ticket_title: "Arm stuck".to_string(),
            }
        );
        assert!(gw.store().get_ticket(ticket.id)?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_mutations_publish_nothing() {
        let gw = gateway();
        let mut sub = gw.subscribe();

        let err = gw
            .add_comment(404, NewComment::new("tech", "hello"), EventSource::Api)
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(gw.delete_ticket(404, EventSource::Api).unwrap_err().is_not_found());
        assert!(
            gw.update_status(404, TicketStatus::Closed, EventSource::Api)
                .unwrap_err()
                .is_not_found()
        );
        assert!(matches!(
            gw.create_ticket(NewTicket::new(""), EventSource::Api),
            Err(DeskError::Validation { .. })
        ));

        assert!(drain(&mut sub).await.is_empty());
    }

    #[tokio::test]
    async fn test_update_status_reports_previous_status() -> anyhow::Result<()> {
        let gw = gateway();
        let ticket = gw.create_ticket(NewTicket::new("Hopper"), EventSource::Api)?;
        let mut sub = gw.subscribe();

        let updated = gw.update_status(ticket.id, TicketStatus::Closed, EventSource::Agent)?;
        assert_eq!(updated.status, TicketStatus::Closed);

        let events = drain(&mut sub).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].payload,
            EventPayload::TicketUpdated {
                ticket: updated,
                previous_status: TicketStatus::Open,
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_event_visible_state_matches_store() -> anyhow::Result<()> {
        let gw = gateway();
        let mut sub = gw.subscribe();
        let ticket = gw.create_ticket(NewTicket::new("Boiler"), EventSource::Api)?;
        gw.add_comment(ticket.id, NewComment::new("tech", "93C expected"), EventSource::Api)?;

        // By the time an event is observed, the store already holds the write.
        while let Some(event) = sub.next_event().await {
            if let EventPayload::CommentCreated { comment, .. } = event.payload {
                let stored = gw.store().get_ticket(comment.ticket_id)?.unwrap();
                assert_eq!(stored.comments.last(), Some(&comment));
                break;
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_writers_publish_in_commit_order() -> anyhow::Result<()> {
        let gw = gateway();
        let ticket = gw.create_ticket(NewTicket::new("Busy"), EventSource::Api)?;
        let mut sub = gw.subscribe();

        let tasks: Vec<_> = (0..4)
            .map(|worker| {
                let gw = gw.clone();
                tokio::task::spawn_blocking(move || {
                    for i in 0..10 {
                        gw.add_comment(
                            ticket.id,
                            NewComment::new(format!("w{}", worker), format!("{}", i)),
                            EventSource::Api,
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await?;
        }

        let events = drain(&mut sub).await;
        assert_eq!(events.len(), 40);
        let ids: Vec<i64> = events
            .iter()
            .map(|e| match &e.payload {
                EventPayload::CommentCreated { comment, .. } => comment.id,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        Ok(())
    }
}
