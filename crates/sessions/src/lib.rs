//! Persistent session store: sessions, messages, tool-call records, and
//! per-session model configs, backed by SQLite.
//!
//! Streaming deltas are never written here; persistence happens at step
//! boundaries and tool-call boundaries, with session counters updated
//! in the same transaction as the message write.

mod db;
mod store;

pub use db::Db;
pub use store::SessionStore;
