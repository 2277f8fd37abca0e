//! Test specifications submitted with a run, and the outcomes of executing them.

use serde::{Deserialize, Serialize};

/// A structured end-to-end test: a target URL and an ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    pub id: String,
    pub name: String,
    pub url: String,
    pub steps: Vec<TestStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TestSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            steps: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn with_step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }

    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Check the spec is runnable. Returns a description of the first problem found.
    pub fn check(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("test spec id cannot be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err(format!("test spec '{}' has an empty name", self.id));
        }
        if self.url.trim().is_empty() {
            return Err(format!("test spec '{}' has an empty url", self.id));
        }
        if self.steps.is_empty() {
            return Err(format!("test spec '{}' has no steps", self.id));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if StepAction::parse(&step.action).is_none() {
                return Err(format!(
                    "test spec '{}' step {index}: unrecognized action '{}'",
                    self.id, step.action
                ));
            }
        }
        Ok(())
    }
}

/// One browser step. `action` is kept as submitted so unknown actions surface
/// as validation errors rather than deserialization failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TestStep {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            selector: None,
            value: None,
            description: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn action(&self) -> Option<StepAction> {
        StepAction::parse(&self.action)
    }
}

/// Actions a test executor is expected to understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Navigate,
    Click,
    Type,
    Fill,
    Select,
    Hover,
    Press,
    Scroll,
    Wait,
    Assert,
    Screenshot,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Click => "click",
            Self::Type => "type",
            Self::Fill => "fill",
            Self::Select => "select",
            Self::Hover => "hover",
            Self::Press => "press",
            Self::Scroll => "scroll",
            Self::Wait => "wait",
            Self::Assert => "assert",
            Self::Screenshot => "screenshot",
        }
    }

    /// Parse an action name, accepting the common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "navigate" | "goto" => Some(Self::Navigate),
            "click" => Some(Self::Click),
            "type" | "input" => Some(Self::Type),
            "fill" => Some(Self::Fill),
            "select" => Some(Self::Select),
            "hover" => Some(Self::Hover),
            "press" => Some(Self::Press),
            "scroll" => Some(Self::Scroll),
            "wait" => Some(Self::Wait),
            "assert" | "expect" => Some(Self::Assert),
            "screenshot" => Some(Self::Screenshot),
            _ => None,
        }
    }
}

/// What went wrong when a test failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvidence {
    /// Error class reported by the executor, e.g. `TimeoutError`.
    pub error_class: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Screenshot, trace or log captured by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
}

impl FailureEvidence {
    pub fn new(error_class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_class: error_class.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub const fn with_step_index(mut self, index: usize) -> Self {
        self.step_index = Some(index);
        self
    }
}

/// Result of executing one test spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub test_id: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<FailureEvidence>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TestOutcome {
    pub fn passed(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            passed: true,
            evidence: None,
            duration_ms: 0,
        }
    }

    pub fn failed(test_id: impl Into<String>, evidence: FailureEvidence) -> Self {
        Self {
            test_id: test_id.into(),
            passed: false,
            evidence: Some(evidence),
            duration_ms: 0,
        }
    }

    pub const fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// A failing test paired with its evidence, carried from Tester to Triage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFailure {
    pub test_id: String,
    pub evidence: FailureEvidence,
}

impl TestFailure {
    /// Extract the failure from an outcome. Failing outcomes without evidence
    /// get a generic `AssertionError`.
    pub fn from_outcome(outcome: &TestOutcome) -> Option<Self> {
        if outcome.passed {
            return None;
        }
        let evidence = outcome
            .evidence
            .clone()
            .unwrap_or_else(|| FailureEvidence::new("AssertionError", "test failed without evidence"));
        Some(Self {
            test_id: outcome.test_id.clone(),
            evidence,
        })
    }
}
