//! CLI type definitions

use clap::{Parser, Subcommand};

use super::commands::{init::InitArgs, knowledge::KnowledgeArgs, metrics::MetricsArgs, validate::ValidateArgs};

#[derive(Parser)]
#[command(name = "qagent")]
#[command(about = "QAgent - self-healing QA orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize QAgent configuration and database
    Init(InitArgs),

    /// Check a run request file without submitting it
    Validate(ValidateArgs),

    /// Inspect learned failure patterns
    Knowledge(KnowledgeArgs),

    /// Report run metrics and trends
    Metrics(MetricsArgs),
}
