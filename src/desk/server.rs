use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::agent::AgentLoop;
use super::api::{self, AppState, SharedState};
use super::events::EventBroadcaster;
use super::forms;
use super::gateway::MutationGateway;
use super::guides::{GuideLibrary, GuideSelector};
use super::reasoning::Sampler;
use super::store::TicketStore;
use super::ws;
use crate::config::DeskConfig;

/// Build the full application router: JSON API, HTML forms and WebSocket.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .merge(forms::form_router())
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Wire the store, broadcaster and gateway together. The agent loop is only
/// built when it is enabled and a reasoning backend exists.
pub fn build_desk(
    config: &DeskConfig,
    sampler: Option<Arc<dyn Sampler>>,
) -> (SharedState, Option<AgentLoop>) {
    let gateway = MutationGateway::new(
        TicketStore::new(),
        EventBroadcaster::new(config.events.capacity),
    );
    let guides = sampler.as_ref().map(|sampler| {
        GuideSelector::new(
            sampler.clone(),
            GuideLibrary::new(&config.guides.dir),
            config.agent.timeout(),
        )
    });

    let agent = match (&sampler, &guides) {
        (Some(sampler), Some(guides)) if config.agent.enabled => Some(AgentLoop::new(
            gateway.clone(),
            sampler.clone(),
            guides.clone(),
            &config.agent,
        )),
        (None, _) if config.agent.enabled => {
            tracing::warn!("no reasoning backend configured, agent loop disabled");
            None
        }
        _ => None,
    };

    (AppState::shared(gateway, guides), agent)
}

/// Serve on an already-bound listener until `shutdown` resolves, then stop the
/// agent loop and wait for it to finish its current event.
pub async fn serve(
    listener: TcpListener,
    config: &DeskConfig,
    sampler: Option<Arc<dyn Sampler>>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let (state, agent) = build_desk(config, sampler);
    let (stop_tx, stop_rx) = watch::channel(false);

    // Subscribe before the listener accepts anything so the agent sees
    // every mutation.
    let agent_handle = agent.map(|agent| agent.spawn(state.gateway.subscribe(), stop_rx));

    let app = build_router(state, config.server.dev_mode);
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, agent = agent_handle.is_some(), "BeanBotics ticket desk listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        })
        .await
        .context("Server error");

    if let Some(handle) = agent_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "agent loop task failed");
        }
    }
    tracing::info!("server shut down");
    result
}

/// Bind the configured address and serve until Ctrl+C.
pub async fn start_server(config: &DeskConfig, sampler: Option<Arc<dyn Sampler>>) -> Result<()> {
    let host = if config.server.dev_mode {
        "0.0.0.0"
    } else {
        config.server.host.as_str()
    };
    let addr = format!("{}:{}", host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    serve(listener, config, sampler, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
