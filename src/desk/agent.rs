//! The support agent: one long-lived subscriber that reacts to new tickets and
//! customer comments by consulting a troubleshooting guide and the reasoning
//! backend, then writing back through the gateway.
//!
//! Events are handled strictly one at a time. Comments authored by the agent's
//! own identity are dropped before any reasoning call.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::events::{DeskEvent, EventPayload, EventSource, Subscription};
use super::gateway::MutationGateway;
use super::guides::GuideSelector;
use super::models::{Comment, NewComment, TicketStatus};
use super::reasoning::Sampler;
use crate::config::AgentSettings;
use crate::errors::DeskError;

pub const AGENT_IDENTITY: &str = "BeanBotics AI";

pub fn system_prompt(identity: &str) -> String {
    format!(
        r#"You are a BeanBotics ticketing support agent.

Your task is to resolve tickets by:
- Adding comments to gather more information or assist the customer.
- Closing tickets when the issue has been fully resolved.

You MUST use the troubleshooting guide supplied with each request.
You MUST either comment on the ticket or close the ticket.
Your comments are posted as "{identity}".

End your reply with exactly one JSON object describing your final action:
{{"action": "comment", "message": "..."}}
{{"action": "close", "message": "optional closing note"}}
{{"action": "resolve", "message": "optional resolution note"}}
{{"action": "none"}}"#
    )
}

/// Final action requested by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    Comment {
        message: String,
    },
    Close {
        #[serde(default)]
        message: Option<String>,
    },
    Resolve {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "none")]
    NoAction {},
}

impl AgentAction {
    /// Find the last top-level JSON object carrying an `"action"` key in the
    /// reply. Objects nested inside another object are never directives.
    /// Model output is untrusted: prose, code fences and stray braces around
    /// the directive are tolerated.
    pub fn parse(reply: &str) -> Result<AgentAction, DeskError> {
        let mut directives = Vec::new();
        let mut pos = 0;
        while let Some(offset) = reply[pos..].find('{') {
            let start = pos + offset;
            let mut values = serde_json::Deserializer::from_str(&reply[start..])
                .into_iter::<serde_json::Value>();
            match values.next() {
                Some(Ok(value)) => {
                    pos = start + values.byte_offset();
                    if value.get("action").is_some() {
                        directives.push(value);
                    }
                }
                _ => pos = start + 1,
            }
        }

        let mut rejected = None;
        for value in directives.into_iter().rev() {
            match serde_json::from_value::<AgentAction>(value) {
                Ok(action) => return Ok(action),
                Err(e) => {
                    rejected.get_or_insert(e.to_string());
                }
            }
        }
        Err(DeskError::ReasoningFailure(match rejected {
            Some(reason) => format!("invalid action directive: {}", reason),
            None => "no action directive in response".to_string(),
        }))
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentAction::Comment { .. } => "comment",
            AgentAction::Close { .. } => "close",
            AgentAction::Resolve { .. } => "resolve",
            AgentAction::NoAction {} => "none",
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum EventOutcome {
    Acted(AgentAction),
    Ignored(&'static str),
    Failed(String),
}

pub struct AgentLoop {
    gateway: MutationGateway,
    sampler: Arc<dyn Sampler>,
    guides: GuideSelector,
    identity: String,
    timeout: Duration,
}

impl AgentLoop {
    pub fn new(
        gateway: MutationGateway,
        sampler: Arc<dyn Sampler>,
        guides: GuideSelector,
        settings: &AgentSettings,
    ) -> Self {
        Self {
            gateway,
            sampler,
            guides,
            identity: settings.identity.trim().to_string(),
            timeout: settings.timeout(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_own_comment(&self, author: &str) -> bool {
        author == self.identity
    }

    pub async fn handle_event(&self, event: &DeskEvent) -> EventOutcome {
        let ticket_id = event.ticket_id();
        let (prompt, issue) = match &event.payload {
            EventPayload::TicketCreated { ticket } => (
                format!(
                    "New ticket: {}\nDescription: {}",
                    ticket.title, ticket.description
                ),
                format!("{} {}", ticket.title, ticket.description),
            ),
            EventPayload::CommentCreated {
                comment,
                ticket_title,
            } => {
                if self.is_own_comment(&comment.author) {
                    tracing::debug!(ticket_id, comment_id = comment.id, "skipping own comment");
                    return EventOutcome::Ignored("own comment");
                }
                self.comment_prompt(comment, ticket_title)
            }
            EventPayload::TicketUpdated {
                ticket,
                previous_status,
            } => {
                tracing::info!(ticket_id, from = %previous_status, to = %ticket.status, source = %event.source, "ticket status changed");
                return EventOutcome::Ignored("status change");
            }
            EventPayload::TicketDeleted { ticket_title, .. } => {
                tracing::info!(ticket_id, title = %ticket_title, "ticket deleted");
                return EventOutcome::Ignored("ticket deleted");
            }
        };

        match self.respond(ticket_id, &prompt, &issue).await {
            Ok(action) => {
                tracing::info!(ticket_id, action = action.name(), "agent acted on ticket");
                EventOutcome::Acted(action)
            }
            Err(e) => {
                tracing::warn!(ticket_id, event = event.name(), error = %e, "agent could not handle event");
                EventOutcome::Failed(e.to_string())
            }
        }
    }

    /// Prompt and guide-selection text for a customer comment, with the
    /// ticket's current state and earlier thread. Falls back to the title
    /// carried by the event when the ticket is already gone.
    fn comment_prompt(&self, comment: &Comment, ticket_title: &str) -> (String, String) {
        let mut prompt = format!(
            "New comment on ticket #{}: {}\nAuthor: {}",
            comment.ticket_id, comment.message, comment.author
        );
        let ticket = match self.gateway.store().get_ticket(comment.ticket_id) {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::warn!(ticket_id = comment.ticket_id, error = %e, "could not load ticket for comment");
                None
            }
        };
        let Some(ticket) = ticket else {
            prompt.push_str(&format!("\n\nTicket: {}", ticket_title));
            return (prompt, format!("{} {}", ticket_title, comment.message));
        };

        prompt.push_str(&format!(
            "\n\nTicket: {}\nStatus: {}\nPriority: {}\nDescription: {}",
            ticket.title, ticket.status, ticket.priority, ticket.description
        ));
        let earlier: Vec<&Comment> = ticket
            .comments
            .iter()
            .filter(|c| c.id != comment.id)
            .collect();
        if !earlier.is_empty() {
            prompt.push_str("\n\nConversation so far:");
            for c in earlier {
                prompt.push_str(&format!("\n- {}: {}", c.author, c.message));
            }
        }
        let issue = format!(
            "{} {} {}",
            ticket.title, ticket.description, comment.message
        );
        (prompt, issue)
    }

    async fn respond(
        &self,
        ticket_id: i64,
        prompt: &str,
        issue: &str,
    ) -> Result<AgentAction, DeskError> {
        let guide = self.guides.select(issue).await;
        let full_prompt = format!(
            "{}\n\nTicket ID: {}\n\nTroubleshooting guide ({}):\n{}",
            prompt, ticket_id, guide.guide_name, guide.content
        );
        tracing::debug!(ticket_id, guide = %guide.guide_name, "sending prompt to reasoning backend");

        let reply = tokio::time::timeout(
            self.timeout,
            self.sampler.sample(&system_prompt(&self.identity), &full_prompt),
        )
        .await
        .map_err(|_| {
            DeskError::ReasoningFailure(format!("timed out after {}s", self.timeout.as_secs()))
        })?
        .map_err(|e| DeskError::ReasoningFailure(format!("{:#}", e)))?;

        let action = AgentAction::parse(&reply)?;
        self.apply(ticket_id, &action)?;
        Ok(action)
    }

    fn apply(&self, ticket_id: i64, action: &AgentAction) -> Result<(), DeskError> {
        let (note, status) = match action {
            AgentAction::Comment { message } => (Some(message), None),
            AgentAction::Close { message } => (message.as_ref(), Some(TicketStatus::Closed)),
            AgentAction::Resolve { message } => (message.as_ref(), Some(TicketStatus::Resolved)),
            AgentAction::NoAction {} => (None, None),
        };
        if let Some(message) = note.filter(|m| !m.trim().is_empty()) {
            self.gateway.add_comment(
                ticket_id,
                NewComment::new(self.identity.clone(), message.clone()),
                EventSource::Agent,
            )?;
        } else if matches!(action, AgentAction::Comment { .. }) {
            return Err(DeskError::ReasoningFailure(
                "comment action without a message".to_string(),
            ));
        }
        if let Some(status) = status {
            self.gateway
                .update_status(ticket_id, status, EventSource::Agent)?;
        }
        Ok(())
    }

    /// Consume `events` until the broadcaster closes or `shutdown` flips to
    /// true. An event already being handled is finished first.
    pub async fn run(self, mut events: Subscription, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(identity = %self.identity, backend = self.sampler.name(), "agent loop started");
        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = events.next_event() => match event {
                    Some(event) => {
                        self.handle_event(&event).await;
                    }
                    None => break,
                },
            }
        }
        tracing::info!("agent loop stopped");
    }

    pub fn spawn(self, events: Subscription, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(events, shutdown))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::desk::events::EventBroadcaster;
    use crate::desk::guides::GuideLibrary;
    use crate::desk::models::NewTicket;
    use crate::desk::reasoning::testing::ScriptedSampler;
    use crate::desk::store::TicketStore;

    fn gateway() -> MutationGateway {
        MutationGateway::new(TicketStore::new(), EventBroadcaster::new(64))
    }

    fn agent(gateway: &MutationGateway, sampler: Arc<ScriptedSampler>) -> AgentLoop {
        let guides = GuideSelector::new(
            sampler.clone(),
            GuideLibrary::new("/nonexistent/guides"),
            Duration::from_secs(5),
        );
        AgentLoop::new(gateway.clone(), sampler, guides, &AgentSettings::default())
    }

    #[test]
    fn test_parse_action_from_prose() {
        let reply = "Checked the servo guide.\n```json\n{\"action\": \"comment\", \"message\": \"Please power-cycle the arm.\"}\n```\nDone";
        assert_eq!(
            AgentAction::parse(reply).unwrap(),
            AgentAction::Comment {
                message: "Please power-cycle the arm.".to_string()
            }
        );
    }

    #[test]
    fn test_parse_takes_last_directive_and_tolerates_braces() {
        let reply = r#"Draft: {"action": "none"} then {not json} final {"action":"close","message":"Fixed {E003}"}"#;
        assert_eq!(
            AgentAction::parse(reply).unwrap(),
            AgentAction::Close {
                message: Some("Fixed {E003}".to_string())
            }
        );
        assert_eq!(
            AgentAction::parse(r#"{"action":"resolve"}"#).unwrap(),
            AgentAction::Resolve { message: None }
        );
        assert_eq!(
            AgentAction::parse(r#"{"action":"none","reason":"duplicate"}"#).unwrap(),
            AgentAction::NoAction {}
        );
    }

    #[test]
    fn test_parse_ignores_objects_nested_in_the_directive() {
        let reply = r#"{"action":"comment","message":"Reset the servo.","meta":{"action":"none"}}"#;
        assert_eq!(
            AgentAction::parse(reply).unwrap(),
            AgentAction::Comment {
                message: "Reset the servo.".to_string()
            }
        );

        let reply = r#"Plan: {"steps": [{"action": "close"}]} Final: {"action":"resolve","message":"Done","why":{"action":"comment"}}"#;
        assert_eq!(
            AgentAction::parse(reply).unwrap(),
            AgentAction::Resolve {
                message: Some("Done".to_string())
            }
        );
    }

    #[test]
    fn test_parse_rejects_missing_or_unknown_directives() {
        assert!(matches!(
            AgentAction::parse("Done"),
            Err(DeskError::ReasoningFailure(msg)) if msg.contains("no action directive")
        ));
        assert!(matches!(
            AgentAction::parse(r#"{"action":"escalate"}"#),
            Err(DeskError::ReasoningFailure(msg)) if msg.contains("invalid action directive")
        ));
        assert!(AgentAction::parse(r#"{"message":"hi"}"#).is_err());
    }

    #[tokio::test]
    async fn test_new_ticket_gets_agent_comment() -> anyhow::Result<()> {
        let gw = gateway();
        let sampler = Arc::new(ScriptedSampler::default());
        sampler.push_ok("robotic_arm");
        sampler.push_ok(r#"{"action":"comment","message":"Is error E003 shown?"}"#);
        let agent = agent(&gw, sampler.clone());

        let mut sub = gw.subscribe();
        let ticket = gw.create_ticket(
            NewTicket::new("Arm stuck").with_description("Arm frozen mid-pour"),
            EventSource::Api,
        )?;
        let event = sub.next_event().await.unwrap();
        let outcome = agent.handle_event(&event).await;
        assert!(matches!(outcome, EventOutcome::Acted(AgentAction::Comment { .. })));

        let stored = gw.store().get_ticket(ticket.id)?.unwrap();
        assert_eq!(stored.comments.len(), 1);
        assert_eq!(stored.comments[0].author, AGENT_IDENTITY);
        assert_eq!(stored.comments[0].message, "Is error E003 shown?");

        let prompts = sampler.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("Issue: Arm stuck Arm frozen mid-pour"));
        assert!(prompts[1].starts_with("New ticket: Arm stuck\nDescription: Arm frozen mid-pour"));
        assert!(prompts[1].contains("Guide not found: robotic_arm.md"));

        let written = sub.next_event().await.unwrap();
        assert_eq!(written.source, EventSource::Agent);
        Ok(())
    }

    #[tokio::test]
    async fn test_loop_guard_skips_own_comments() -> anyhow::Result<()> {
        let gw = gateway();
        let sampler = Arc::new(ScriptedSampler::always(r#"{"action":"none"}"#));
        let agent = agent(&gw, sampler.clone());

        let ticket = gw.create_ticket(NewTicket::new("Hopper"), EventSource::Api)?;
        let mut sub = gw.subscribe();
        gw.add_comment(
            ticket.id,
            NewComment::new(AGENT_IDENTITY, "Refill the hopper."),
            EventSource::Agent,
        )?;
        let event = sub.next_event().await.unwrap();
        assert_eq!(
            agent.handle_event(&event).await,
            EventOutcome::Ignored("own comment")
        );
        assert_eq!(sampler.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_customer_comment_prompt() -> anyhow::Result<()> {
        let gw = gateway();
        let sampler = Arc::new(ScriptedSampler::always(r#"{"action":"none"}"#));
        let agent = agent(&gw, sampler.clone());

        let ticket = gw.create_ticket(NewTicket::new("Frother"), EventSource::Api)?;
        let mut sub = gw.subscribe();
        gw.add_comment(ticket.id, NewComment::new("tech", "Foam is watery"), EventSource::Ui)?;
        let event = sub.next_event().await.unwrap();
        assert_eq!(
            agent.handle_event(&event).await,
            EventOutcome::Acted(AgentAction::NoAction {})
        );
        let prompts = sampler.prompts.lock().unwrap().clone();
        assert!(prompts[1].starts_with(&format!(
            "New comment on ticket #{}: Foam is watery",
            ticket.id
        )));
        Ok(())
    }

    #[tokio::test]
    async fn test_comment_prompt_carries_ticket_context() -> anyhow::Result<()> {
        let gw = gateway();
        let sampler = Arc::new(ScriptedSampler::always(r#"{"action":"none"}"#));
        let agent = agent(&gw, sampler.clone());

        let ticket = gw.create_ticket(
            NewTicket::new("Milk frother weak")
                .with_description("Steam wand sputters during latte orders"),
            EventSource::Api,
        )?;
        gw.add_comment(
            ticket.id,
            NewComment::new(AGENT_IDENTITY, "Please descale the wand."),
            EventSource::Agent,
        )?;
        let mut sub = gw.subscribe();
        gw.add_comment(ticket.id, NewComment::new("tech", "Fixed now?"), EventSource::Ui)?;
        let event = sub.next_event().await.unwrap();
        agent.handle_event(&event).await;

        let prompts = sampler.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("Milk frother weak"));
        assert!(prompts[0].contains("Steam wand sputters"));

        let prompt = &prompts[1];
        assert!(prompt.starts_with(&format!("New comment on ticket #{}: Fixed now?", ticket.id)));
        assert!(prompt.contains("Ticket: Milk frother weak"));
        assert!(prompt.contains("Status: open"));
        assert!(prompt.contains("Description: Steam wand sputters during latte orders"));
        assert!(prompt.contains(&format!("- {}: Please descale the wand.", AGENT_IDENTITY)));
        assert_eq!(prompt.matches("Fixed now?").count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_comment_prompt_on_deleted_ticket_uses_event_title() -> anyhow::Result<()> {
        let gw = gateway();
        let sampler = Arc::new(ScriptedSampler::always(r#"{"action":"none"}"#));
        let agent = agent(&gw, sampler.clone());

        let ticket = gw.create_ticket(NewTicket::new("Bean hopper jam"), EventSource::Api)?;
        let mut sub = gw.subscribe();
        gw.add_comment(ticket.id, NewComment::new("tech", "Still jammed"), EventSource::Ui)?;
        gw.delete_ticket(ticket.id, EventSource::Ui)?;
        let event = sub.next_event().await.unwrap();
        agent.handle_event(&event).await;

        let prompts = sampler.prompts.lock().unwrap().clone();
        assert!(prompts[0].contains("Bean hopper jam Still jammed"));
        assert!(prompts[1].contains("Ticket: Bean hopper jam"));
        Ok(())
    }

    #[tokio::test]
    async fn test_close_action_comments_then_closes() -> anyhow::Result<()> {
        let gw = gateway();
        let sampler = Arc::new(ScriptedSampler::always(
            r#"{"action":"close","message":"Recalibrated, closing."}"#,
        ));
        let agent = agent(&gw, sampler);
        let ticket = gw.create_ticket(NewTicket::new("Boiler"), EventSource::Api)?;

        let mut sub = gw.subscribe();
        gw.add_comment(ticket.id, NewComment::new("tech", "Fixed now?"), EventSource::Ui)?;
        let event = sub.next_event().await.unwrap();
        agent.handle_event(&event).await;

        let stored = gw.store().get_ticket(ticket.id)?.unwrap();
        assert_eq!(stored.status, TicketStatus::Closed);
        assert_eq!(stored.comments.last().unwrap().author, AGENT_IDENTITY);

        // The write-backs arrive as an agent comment followed by the status change.
        let comment = sub.next_event().await.unwrap();
        assert!(matches!(comment.payload, EventPayload::CommentCreated { .. }));
        let update = sub.next_event().await.unwrap();
        assert_eq!(
            agent.handle_event(&update).await,
            EventOutcome::Ignored("status change")
        );
        assert_eq!(
            agent.handle_event(&comment).await,
            EventOutcome::Ignored("own comment")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_leave_ticket_untouched() -> anyhow::Result<()> {
        let gw = gateway();
        let sampler = Arc::new(ScriptedSampler::default());
        sampler.push_ok("robotic_arm");
        sampler.push_err("backend unavailable");
        sampler.push_ok("robotic_arm");
        sampler.push_ok("I am not sure what to do.");
        let agent = agent(&gw, sampler);

        let mut sub = gw.subscribe();
        let ticket = gw.create_ticket(NewTicket::new("Camera"), EventSource::Api)?;
        let event = sub.next_event().await.unwrap();

        for _ in 0..2 {
            assert!(matches!(
                agent.handle_event(&event).await,
                EventOutcome::Failed(_)
            ));
        }
        assert!(gw.store().get_ticket(ticket.id)?.unwrap().comments.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_reasoning_timeout_is_a_failure() -> anyhow::Result<()> {
        let gw = gateway();
        let sampler = Arc::new(
            ScriptedSampler::always(r#"{"action":"none"}"#).with_delay(Duration::from_millis(200)),
        );
        let guides = GuideSelector::new(
            sampler.clone(),
            GuideLibrary::new("/nonexistent/guides"),
            Duration::from_millis(20),
        );
        let settings = AgentSettings {
            timeout_secs: 0,
            ..AgentSettings::default()
        };
        let agent = AgentLoop::new(gw.clone(), sampler, guides, &settings);

        let mut sub = gw.subscribe();
        gw.create_ticket(NewTicket::new("Slow"), EventSource::Api)?;
        let event = sub.next_event().await.unwrap();
        match agent.handle_event(&event).await {
            EventOutcome::Failed(msg) => assert!(msg.contains("timed out")),
            other => panic!("Expected timeout failure, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_spawned_loop_handles_events_one_at_a_time() -> anyhow::Result<()> {
        let gw = gateway();
        let sampler = Arc::new(
            ScriptedSampler::always(r#"{"action":"none"}"#).with_delay(Duration::from_millis(10)),
        );
        let agent = agent(&gw, sampler.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = agent.spawn(gw.subscribe(), shutdown_rx);

        for i in 0..5 {
            gw.create_ticket(NewTicket::new(format!("Ticket {}", i)), EventSource::Api)?;
        }

        // Two sampler calls per ticket: guide selection, then the action.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while sampler.calls() < 10 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sampler.calls(), 10);
        assert_eq!(sampler.max_in_flight.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true)?;
        tokio::time::timeout(Duration::from_secs(2), handle).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_loop_keeps_running_after_failure() -> anyhow::Result<()> {
        let gw = gateway();
        let sampler = Arc::new(ScriptedSampler::default());
        sampler.push_err("boom");
        sampler.push_err("boom");
        sampler.push_ok("milk_frother");
        sampler.push_ok(r#"{"action":"comment","message":"Purge the steam wand."}"#);
        let agent = agent(&gw, sampler.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = agent.spawn(gw.subscribe(), shutdown_rx);

        gw.create_ticket(NewTicket::new("First"), EventSource::Api)?;
        let second = gw.create_ticket(NewTicket::new("Second"), EventSource::Api)?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let comments = gw.store().get_ticket(second.id)?.unwrap().comments;
            if !comments.is_empty() {
                assert_eq!(comments[0].message, "Purge the steam wand.");
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "agent never answered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(2), handle).await??;
        Ok(())
    }
}
