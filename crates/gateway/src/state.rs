use std::sync::Arc;

use co_domain::config::Config;
use co_eventlog::EventLog;
use co_sessions::SessionStore;
use co_tools::SandboxClient;

use crate::runtime::{Coordinator, EventBus, PermissionBroker};
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: SessionStore,
    pub eventlog: Arc<EventLog>,
    pub bus: Arc<EventBus>,
    pub broker: Arc<PermissionBroker>,
    pub coordinator: Arc<Coordinator>,
    pub sandbox: Arc<SandboxClient>,
    /// Live sockets by session id, fed by the fan-out pump.
    pub connections: Arc<ConnectionRegistry>,
}
