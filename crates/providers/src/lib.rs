//! Uniform streaming interface over heterogeneous model providers.
//!
//! Adapters translate each provider's wire format into the shared
//! [`co_domain::stream::DeltaEvent`] vocabulary; by the time a
//! `ToolCall` delta leaves an adapter its input JSON is complete.
//! Transient provider failures surface as `Retry` deltas followed by a
//! backed-off re-attempt.

pub mod anthropic;
pub mod mock;
pub mod openai_compat;
pub mod registry;
mod retry;
mod sse;
pub mod traits;
mod util;

pub use registry::{build_models, catalog_entry, ModelPair};
pub use traits::{LanguageModel, ModelCall, ToolSpec};
