//! Leaf services shared by every run: event fan-out, learned fixes and metrics.

pub mod event_bus;
pub mod knowledge_base;
pub mod metrics_store;

pub use event_bus::{EventBus, RunEventStream, Subscription};
pub use knowledge_base::KnowledgeBase;
pub use metrics_store::MetricsStore;
