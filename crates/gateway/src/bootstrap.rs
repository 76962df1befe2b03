//! Service construction: wire stores, bus, broker, agent, coordinator,
//! and the fan-out pump into an [`AppState`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use co_domain::config::Config;
use co_eventlog::EventLog;
use co_sessions::{Db, SessionStore};
use co_tools::fetch::UrlFetcher;
use co_tools::mcp::McpServer;
use co_tools::{SandboxClient, Tool};

use crate::runtime::{ActiveRuns, Coordinator, EventBus, PermissionBroker, PromptQueue, SessionAgent};
use crate::state::AppState;
use crate::ws::{spawn_fanout, ConnectionRegistry};

/// Everything the server owns for its lifetime.
pub struct App {
    pub state: AppState,
    pub mcp_servers: Vec<McpServer>,
}

pub async fn build(config: Arc<Config>) -> anyhow::Result<App> {
    // ── Stores ────────────────────────────────────────────────────
    let db = Arc::new(Db::open(&config.database.path).context("opening session database")?);
    let store = SessionStore::new(db);

    let eventlog = Arc::new(EventLog::new(
        Some(config.event_stream.state_path.clone()),
        config.event_stream.stream_max_len,
        Duration::from_secs(config.event_stream.stream_ttl),
    ));

    // ── Bus + broker ──────────────────────────────────────────────
    let bus = Arc::new(EventBus::new());
    let broker = Arc::new(PermissionBroker::new(
        bus.clone(),
        eventlog.clone(),
        config.permissions.skip_requests,
        config.permissions.allowed_tools.clone(),
        Duration::from_secs(config.permissions.timeout_minutes * 60),
    ));

    // ── Sandbox + tools ───────────────────────────────────────────
    let sandbox = Arc::new(
        SandboxClient::new(
            &config.sandbox.base_url,
            Duration::from_secs(config.sandbox.timeout_secs),
        )
        .context("building sandbox client")?,
    );
    let fetcher = UrlFetcher::with_storage(Some(config.storage.base_url.clone()))
        .context("building url fetcher")?;

    // ── MCP servers ───────────────────────────────────────────────
    let mut mcp_servers = Vec::new();
    let mut mcp_tools: Vec<Arc<dyn Tool>> = Vec::new();
    for (name, server_config) in &config.mcp.servers {
        match McpServer::connect(name, server_config).await {
            Ok(server) => {
                mcp_tools.extend(server.as_tools());
                bus.publish(co_domain::event::BusEvent::Mcp {
                    op: co_domain::event::EventOp::Created,
                    server: name.clone(),
                    detail: format!("{} tools", server.tools.len()),
                });
                mcp_servers.push(server);
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "mcp server failed to connect");
                bus.publish(co_domain::event::BusEvent::Mcp {
                    op: co_domain::event::EventOp::Deleted,
                    server: name.clone(),
                    detail: e.to_string(),
                });
            }
        }
    }

    // ── Agent + coordinator ───────────────────────────────────────
    let agent = Arc::new(SessionAgent {
        store: store.clone(),
        eventlog: eventlog.clone(),
        bus: bus.clone(),
        broker: broker.clone(),
        active: ActiveRuns::new(),
        queue: PromptQueue::new(),
        fetcher: fetcher.clone(),
        disable_auto_summarize: config.options.disable_auto_summarize,
    });
    let coordinator = Arc::new(Coordinator::new(
        agent,
        config.clone(),
        sandbox.clone(),
        fetcher,
        mcp_tools,
    ));

    // ── Transport fan-out ─────────────────────────────────────────
    let connections = Arc::new(ConnectionRegistry::new());
    spawn_fanout(bus.clone(), eventlog.clone(), connections.clone());

    Ok(App {
        state: AppState {
            config,
            store,
            eventlog,
            bus,
            broker,
            coordinator,
            sandbox,
            connections,
        },
        mcp_servers,
    })
}
