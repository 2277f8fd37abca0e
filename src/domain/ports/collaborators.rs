//! Capabilities the pipeline invokes but does not implement: running browser
//! tests, synthesizing patches and applying them to a repository.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::{FailureEvidence, FailureSignature, TestOutcome, TestSpec};

/// Executes a single test spec.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Run `spec` and report whether it passed.
    ///
    /// A failing test is `Ok` with `passed == false`; `Err` means the executor
    /// itself could not run the test.
    async fn execute(&self, spec: &TestSpec) -> Result<TestOutcome>;
}

/// A previously successful fix offered to the patch generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeHint {
    pub pattern_key: String,
    pub fix_summary: String,
    pub success_ratio: f64,
}

/// Everything the generator needs to propose a fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    pub run_id: Uuid,
    pub iteration: u32,
    /// How many times this signature has been attempted in the run, starting at 1.
    pub attempt: u32,
    pub signature: FailureSignature,
    pub evidence: FailureEvidence,
    pub affected_tests: Vec<String>,
    pub hint: Option<KnowledgeHint>,
}

/// A proposed patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePatch {
    pub id: Uuid,
    pub description: String,
    /// Opaque reference to the patch content (diff, branch, blob id).
    pub content_ref: String,
}

impl CandidatePatch {
    pub fn new(description: impl Into<String>, content_ref: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            content_ref: content_ref.into(),
        }
    }
}

/// Produces a candidate patch for a diagnosed failure.
#[async_trait]
pub trait PatchGenerator: Send + Sync {
    async fn generate(&self, request: &PatchRequest) -> Result<CandidatePatch>;
}

/// Result of committing a patch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub committed: bool,
    pub commit_ref: Option<String>,
}

impl ApplyResult {
    pub fn committed(commit_ref: impl Into<String>) -> Self {
        Self {
            committed: true,
            commit_ref: Some(commit_ref.into()),
        }
    }

    pub const fn rejected() -> Self {
        Self {
            committed: false,
            commit_ref: None,
        }
    }
}

/// Makes patches live.
///
/// The verifier stages a patch, re-runs the affected tests against it, then
/// either commits or discards it.
#[async_trait]
pub trait PatchApplier: Send + Sync {
    /// Make the patch visible to the test executor without committing it.
    async fn stage(&self, patch: &CandidatePatch) -> Result<()>;

    /// Apply the staged patch permanently.
    async fn commit(&self, patch: &CandidatePatch) -> Result<ApplyResult>;

    /// Withdraw a staged patch.
    async fn discard(&self, patch: &CandidatePatch) -> Result<()>;
}
