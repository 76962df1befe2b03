//! Durable per-session event stream.
//!
//! Every user-visible event is appended here exactly once, in publish
//! order, so clients that disconnect can replay from their last seen
//! stream id. The log is bounded per session (oldest entries trimmed)
//! and expires after inactivity. Pending permissions and the session
//! allowlist live out-of-band from the stream entries so they survive
//! stream truncation.

pub mod permissions;
pub mod stream;

pub use permissions::{AllowlistEntry, PendingPermission, PermissionStatus};
pub use stream::{EventLog, StreamEntry, StreamPos};
