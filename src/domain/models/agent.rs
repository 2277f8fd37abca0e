//! Agent pipeline stages and their per-iteration status.

use serde::{Deserialize, Serialize};

/// One stage of the agent pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Runs the full test suite and captures failure evidence.
    Tester,
    /// Classifies failures and consults the knowledge base.
    Triage,
    /// Produces a candidate patch.
    Fixer,
    /// Checks the candidate against the affected tests and commits it.
    Verifier,
}

impl AgentKind {
    /// Stages in pipeline order.
    pub const PIPELINE: [Self; 4] = [Self::Tester, Self::Triage, Self::Fixer, Self::Verifier];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tester => "tester",
            Self::Triage => "triage",
            Self::Fixer => "fixer",
            Self::Verifier => "verifier",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tester" => Some(Self::Tester),
            "triage" => Some(Self::Triage),
            "fixer" => Some(Self::Fixer),
            "verifier" => Some(Self::Verifier),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage within a single iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
