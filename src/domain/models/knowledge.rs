//! Knowledge base entries: what was learned about a failure pattern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one fix attempt for a failure pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixOutcome {
    Success,
    Failure,
}

impl FixOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Accumulated fix history for one failure signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub pattern_key: String,
    pub error_class: String,
    pub description: String,
    /// Description of the most recent fix that resolved this pattern.
    pub fix_summary: Option<String>,
    pub success_count: u32,
    pub total_count: u32,
    /// Last time a fix for this pattern succeeded.
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    /// Fraction of attempts that resolved the pattern, 0.0 when never attempted.
    pub fn success_ratio(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            f64::from(self.success_count) / f64::from(self.total_count)
        }
    }

    /// Whether the entry carries a fix worth biasing generation toward.
    pub fn has_proven_fix(&self) -> bool {
        self.success_count > 0 && self.fix_summary.is_some()
    }
}

/// Aggregate counters across the knowledge base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeStats {
    /// Sum of `total_count` over all entries.
    pub total_failures: u64,
    /// Sum of `success_count` over all entries.
    pub successful_fixes: u64,
    pub patterns: u64,
}

impl KnowledgeStats {
    pub fn fix_rate(&self) -> f64 {
        if self.total_failures == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let rate = self.successful_fixes as f64 / self.total_failures as f64;
            rate
        }
    }
}
