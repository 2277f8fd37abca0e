//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - TestExecutor, PatchGenerator, PatchApplier: pipeline collaborators
//! - KnowledgeRepository: durable failure-pattern storage
//! - MetricsRepository: durable per-window metrics storage
//! - Clock: time source for metrics windows

pub mod clock;
pub mod collaborators;
pub mod knowledge_repository;
pub mod metrics_repository;

pub use clock::{Clock, SystemClock};
pub use collaborators::{
    ApplyResult, CandidatePatch, KnowledgeHint, PatchApplier, PatchGenerator, PatchRequest,
    TestExecutor,
};
pub use knowledge_repository::KnowledgeRepository;
pub use metrics_repository::MetricsRepository;
