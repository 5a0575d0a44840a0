//! Ticket desk: real-time ticket event pipeline.
//!
//! ## Overview
//!
//! Tickets and comments live in an in-memory store. Every mutation goes
//! through the mutation gateway, which writes to the store and then publishes
//! exactly one domain event. Events fan out to WebSocket clients and to the
//! support agent, which reasons about new tickets and comments and writes its
//! answers back through the same gateway.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐  HTTP   ┌───────────────────────────────────────────────────┐
//! │  Client  │ ──────> │  server.rs  (build_router, serve)                 │
//! │ (forms / │         │    ├─ api.rs    (JSON handlers, AppState)         │
//! │   JSON)  │         │    └─ forms.rs  (HTML form posts, /seed)          │
//! └──────────┘         │         │                                         │
//!      ^               │         v                                         │
//!      │ WebSocket     │  gateway.rs  (MutationGateway: write → publish)   │
//!      │               │     │                  │                          │
//!      │               │     v                  v                          │
//!      │               │  store.rs          events.rs (EventBroadcaster)   │
//!      │               │                        │                          │
//!      └────────────── │  ws.rs  <──────────────┤                          │
//!                      │                        v                          │
//!                      │  agent.rs  (AgentLoop) ── guides.rs, reasoning.rs │
//!                      │     │                                             │
//!                      │     └──> gateway.rs (write-back as the agent)     │
//!                      └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                            |
//! |-------------|-----------------------------------------------------------|
//! | `models`    | `Ticket`, `Comment`, `TicketStatus`, `Priority`, filters  |
//! | `reasoning` | `Sampler` trait, `command` and `openai` backends          |
//! | `guides`    | Six troubleshooting guides, model-driven selection        |
//! | `seed`      | Sample BeanBotics tickets for demos                       |

pub mod agent;
pub mod api;
pub mod events;
pub mod forms;
pub mod gateway;
pub mod guides;
pub mod models;
pub mod reasoning;
pub mod seed;
pub mod server;
pub mod store;
pub mod ws;
