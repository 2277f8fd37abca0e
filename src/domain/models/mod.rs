pub mod agent;
pub mod config;
pub mod event;
pub mod knowledge;
pub mod metrics;
pub mod run;
pub mod signature;
pub mod test_spec;

pub use agent::{AgentKind, AgentStatus};
pub use config::{Config, DatabaseConfig, LoggingConfig, MetricsConfig};
pub use event::{RunEvent, RunEventData, RunEventType, TestScope};
pub use knowledge::{FixOutcome, KnowledgeEntry, KnowledgeStats};
pub use metrics::{
    repo_scope, MetricsComparison, MetricsPeriod, MetricsSummary, MetricsWindow, RunOutcome,
    TrendPoint, TrendResponse, TrendSeries, GLOBAL_SCOPE, MAX_TREND_DAYS,
};
pub use run::{AppliedPatch, Run, RunLimits, RunRequest, RunStatus, RunSummary};
pub use signature::FailureSignature;
pub use test_spec::{FailureEvidence, StepAction, TestFailure, TestOutcome, TestSpec, TestStep};
