//! Run events published on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::{AgentKind, AgentStatus};
use super::run::RunStatus;
use super::test_spec::TestOutcome;

/// Which test execution produced a `test` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestScope {
    /// Full suite run by the Tester.
    Suite,
    /// Affected tests re-run by the Verifier against a staged patch.
    Verification,
}

/// Discriminant of [`RunEventData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunEventType {
    Status,
    Agent,
    Test,
    Patch,
    Complete,
    Error,
}

impl RunEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Agent => "agent",
            Self::Test => "test",
            Self::Patch => "patch",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for RunEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads. Closed set; consumers match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum RunEventData {
    #[serde(rename_all = "camelCase")]
    Status {
        status: RunStatus,
        iteration: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Agent {
        agent: AgentKind,
        status: AgentStatus,
        iteration: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Test {
        scope: TestScope,
        iteration: u32,
        passed: u32,
        total: u32,
        results: Vec<TestOutcome>,
    },
    #[serde(rename_all = "camelCase")]
    Patch {
        patch_id: Uuid,
        signature: String,
        description: String,
        knowledge_reused: bool,
        attempt: u32,
        iteration: u32,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        status: RunStatus,
        iteration: u32,
        tests_passed: u32,
        tests_total: u32,
        patches_applied: usize,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<AgentKind>,
        message: String,
        iteration: u32,
    },
}

impl RunEventData {
    pub const fn event_type(&self) -> RunEventType {
        match self {
            Self::Status { .. } => RunEventType::Status,
            Self::Agent { .. } => RunEventType::Agent,
            Self::Test { .. } => RunEventType::Test,
            Self::Patch { .. } => RunEventType::Patch,
            Self::Complete { .. } => RunEventType::Complete,
            Self::Error { .. } => RunEventType::Error,
        }
    }
}

/// One immutable event about a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub id: Uuid,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: RunEventData,
}

impl RunEvent {
    pub fn new(run_id: Uuid, data: RunEventData) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            timestamp: Utc::now(),
            data,
        }
    }

    pub const fn event_type(&self) -> RunEventType {
        self.data.event_type()
    }

    /// `complete` is always the last event of a run.
    pub const fn is_terminal(&self) -> bool {
        matches!(self.data, RunEventData::Complete { .. })
    }
}
