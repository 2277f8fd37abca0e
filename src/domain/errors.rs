//! Domain errors for the QAgent orchestration core.

use thiserror::Error;
use uuid::Uuid;

use super::models::AgentKind;

/// Domain-level errors that can occur in the QAgent system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Run {id} is not cancellable: already {status}")]
    NotCancellable { id: Uuid, status: String },

    #[error("Stage {agent} failed: {message}")]
    StageExecution { agent: AgentKind, message: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Invariant violated for run {run_id}: {detail}")]
    InvariantViolation { run_id: Uuid, detail: String },

    #[error("Knowledge entry not found: {0}")]
    KnowledgeEntryNotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Wrap a collaborator failure as a failed pipeline stage.
    pub fn stage(agent: AgentKind, err: &anyhow::Error) -> Self {
        Self::StageExecution {
            agent,
            message: format!("{err:#}"),
        }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
