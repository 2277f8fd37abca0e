//! Run domain model.
//!
//! A run is one end-to-end execution of the agent pipeline against a set of
//! test specs. Only the run's state machine mutates it after admission; every
//! other component reads snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::agent::AgentKind;
use super::test_spec::TestSpec;
use crate::domain::errors::{DomainError, DomainResult};

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<RunStatus> {
        match self {
            Self::Queued => vec![Self::Running, Self::Cancelled],
            Self::Running => vec![Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A patch that passed verification and was committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedPatch {
    pub patch_id: Uuid,
    /// Failure signature key the patch resolved.
    pub signature: String,
    pub description: String,
    /// Opaque reference to the patch content held by the patch generator.
    pub content_ref: String,
    pub iteration: u32,
    pub knowledge_reused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_ref: Option<String>,
    pub applied_at: DateTime<Utc>,
}

/// Caller-supplied parameters for a new run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(default)]
    pub test_specs: Vec<TestSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

impl RunRequest {
    pub fn new(test_specs: Vec<TestSpec>) -> Self {
        Self {
            test_specs,
            ..Self::default()
        }
    }

    pub fn with_repo(mut self, repo_id: impl Into<String>, repo_name: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
        self.repo_name = Some(repo_name.into());
        self
    }

    pub const fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Validate the request before any run state is created.
    pub fn validate(&self, limits: &RunLimits) -> DomainResult<()> {
        if self.test_specs.is_empty() {
            return Err(DomainError::Validation(
                "a run needs at least one test spec".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.test_specs {
            spec.check().map_err(DomainError::Validation)?;
            if !seen.insert(spec.id.as_str()) {
                return Err(DomainError::Validation(format!(
                    "duplicate test spec id '{}'",
                    spec.id
                )));
            }
        }

        if let Some(max) = self.max_iterations {
            if max == 0 || max > limits.max_iterations_limit {
                return Err(DomainError::Validation(format!(
                    "max_iterations must be between 1 and {}, got {max}",
                    limits.max_iterations_limit
                )));
            }
        }

        Ok(())
    }
}

/// Iteration bounds applied when admitting runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub default_max_iterations: u32,
    pub max_iterations_limit: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            default_max_iterations: 3,
            max_iterations_limit: 10,
        }
    }
}

/// One pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: Uuid,
    pub repo_id: Option<String>,
    pub repo_name: Option<String>,
    pub status: RunStatus,
    pub current_agent: Option<AgentKind>,
    pub iteration: u32,
    pub max_iterations: u32,
    test_specs: Vec<TestSpec>,
    pub tests_total: u32,
    pub tests_passed: u32,
    pub patches_applied: Vec<AppliedPatch>,
    /// Number of verifier attempts, committed or not.
    pub fix_attempts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Build a queued run from an already validated request.
    pub fn from_request(request: RunRequest, limits: &RunLimits) -> Self {
        let tests_total = u32::try_from(request.test_specs.len()).unwrap_or(u32::MAX);
        Self {
            id: Uuid::new_v4(),
            repo_id: request.repo_id,
            repo_name: request.repo_name,
            status: RunStatus::Queued,
            current_agent: None,
            iteration: 0,
            max_iterations: request
                .max_iterations
                .unwrap_or(limits.default_max_iterations),
            test_specs: request.test_specs,
            tests_total,
            tests_passed: 0,
            patches_applied: Vec::new(),
            fix_attempts: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn test_specs(&self) -> &[TestSpec] {
        &self.test_specs
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition to a new status, stamping lifecycle timestamps.
    pub fn transition_to(&mut self, new_status: RunStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
                reason: "transition not allowed".to_string(),
            });
        }

        self.status = new_status;
        let now = Utc::now();
        match new_status {
            RunStatus::Running => self.started_at = Some(now),
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled => {
                self.completed_at = Some(now);
                self.current_agent = None;
            }
            RunStatus::Queued => {}
        }
        Ok(())
    }

    /// Record a full-suite result. Passing counts keep their high-water mark.
    pub fn record_suite_result(&mut self, total: u32, passed: u32) -> DomainResult<()> {
        if passed > total {
            return Err(self.violation(format!("{passed} passing tests out of {total}")));
        }
        self.tests_total = self.tests_total.max(total);
        self.tests_passed = self.tests_passed.max(passed);
        self.check_invariants()
    }

    /// Advance the iteration counter by one.
    pub fn advance_iteration(&mut self) -> DomainResult<u32> {
        if self.iteration >= self.max_iterations {
            return Err(self.violation(format!(
                "iteration would exceed max_iterations ({})",
                self.max_iterations
            )));
        }
        self.iteration += 1;
        Ok(self.iteration)
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Seconds from start to completion for runs that needed at least one fix.
    pub fn time_to_fix(&self) -> Option<chrono::Duration> {
        if self.status != RunStatus::Completed || self.patches_applied.is_empty() {
            return None;
        }
        Some(self.completed_at? - self.started_at?)
    }

    /// Check the run's structural invariants.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.tests_passed > self.tests_total {
            return Err(self.violation(format!(
                "tests_passed ({}) exceeds tests_total ({})",
                self.tests_passed, self.tests_total
            )));
        }
        if self.iteration > self.max_iterations {
            return Err(self.violation(format!(
                "iteration ({}) exceeds max_iterations ({})",
                self.iteration, self.max_iterations
            )));
        }
        if self.completed_at.is_some() != self.status.is_terminal() {
            return Err(self.violation(format!(
                "completed_at presence does not match status {}",
                self.status
            )));
        }
        Ok(())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id,
            repo_name: self.repo_name.clone(),
            status: self.status,
            current_agent: self.current_agent,
            iteration: self.iteration,
            max_iterations: self.max_iterations,
            tests_passed: self.tests_passed,
            tests_total: self.tests_total,
            created_at: self.created_at,
        }
    }

    fn violation(&self, detail: String) -> DomainError {
        DomainError::InvariantViolation {
            run_id: self.id,
            detail,
        }
    }
}

/// Lightweight projection of a run for queue listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: Uuid,
    pub repo_name: Option<String>,
    pub status: RunStatus,
    pub current_agent: Option<AgentKind>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub tests_passed: u32,
    pub tests_total: u32,
    pub created_at: DateTime<Utc>,
}
