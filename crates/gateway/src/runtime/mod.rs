//! The session execution runtime: typed event bus, cancellation map,
//! prompt queue, permission broker, the per-session agent, and the
//! coordinator facade.

pub mod agent;
pub mod bus;
pub mod cancel;
pub mod coordinator;
pub mod permission;
pub mod queue;
pub mod summarize;
pub mod title;

pub use agent::{AgentCall, Attachment, CallParams, RunEnv, SessionAgent};
pub use bus::EventBus;
pub use cancel::{ActiveRuns, CancelToken};
pub use coordinator::Coordinator;
pub use permission::{PermissionBroker, PermissionInput};
pub use queue::PromptQueue;
