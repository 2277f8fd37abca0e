//! QAgent - self-healing QA orchestration core
//!
//! QAgent runs UI test suites, diagnoses failures, asks a patch generator for
//! fixes, verifies them and commits the ones that work, iterating until the
//! suite passes or the run's iteration budget is spent. Fixes that worked are
//! remembered by failure signature so later runs can reuse them.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): runs, events, signatures, knowledge and
//!   metrics models, plus the ports collaborators implement
//! - **Application Layer** (`application`): the run queue and the per-run
//!   state machine driving Tester → Triage → Fixer → Verifier
//! - **Service Layer** (`services`): event bus, knowledge base, metrics store
//! - **Adapters** (`adapters`): SQLite persistence
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use qagent::application::{PipelineDeps, QueueConfig, RunQueue};
//!
//! let queue = RunQueue::new(QueueConfig::default(), deps);
//! let run_id = queue.submit(request)?;
//! let run = queue.wait_for_terminal(run_id).await?;
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{PipelineDeps, QueueConfig, QueueStatus, RunQueue, RunStateMachine};
pub use domain::models::{
    AgentKind, Config, FailureSignature, KnowledgeEntry, MetricsSummary, MetricsWindow, Run,
    RunEvent, RunEventData, RunRequest, RunStatus, TestSpec, TestStep,
};
pub use domain::ports::{PatchApplier, PatchGenerator, TestExecutor};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{EventBus, KnowledgeBase, MetricsStore};
