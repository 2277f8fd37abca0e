//! Implementation of the `qagent metrics` commands.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use std::sync::Arc;

use crate::adapters::sqlite::SqliteMetricsRepository;
use crate::cli::display::{key_value_table, list_table};
use crate::cli::output::{output, percent, CommandOutput};
use crate::domain::models::{
    MetricsSummary, MetricsWindow, TrendPoint, TrendResponse, MAX_TREND_DAYS,
};
use crate::infrastructure::config::ConfigLoader;
use crate::services::MetricsStore;

#[derive(Args, Debug)]
pub struct MetricsArgs {
    #[command(subcommand)]
    pub command: MetricsCommand,
}

#[derive(Subcommand, Debug)]
pub enum MetricsCommand {
    /// Current window against the previous one
    Summary {
        /// Scope to report (`global` or `repo:<id>`)
        #[arg(short, long)]
        scope: Option<String>,

        /// Window length: day or week
        #[arg(short, long, default_value = "day")]
        window: String,
    },

    /// Daily pass rate and time-to-fix
    Trend {
        /// Scope to report (`global` or `repo:<id>`)
        #[arg(short, long)]
        scope: Option<String>,

        /// Number of days, ending today
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_TREND_DAYS)))]
        days: Option<u32>,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct SummaryOutput {
    #[serde(flatten)]
    pub summary: MetricsSummary,
}

fn seconds(value: f64) -> String {
    format!("{value:.1}s")
}

impl CommandOutput for SummaryOutput {
    fn to_human(&self) -> String {
        let s = &self.summary;
        let table = key_value_table([
            ("Runs", s.total_runs.to_string()),
            ("Pass rate", format!("{} (previous {})", percent(s.pass_rate), percent(s.previous_pass_rate))),
            (
                "Avg time to fix",
                format!("{} (previous {})", seconds(s.avg_time_to_fix), seconds(s.previous_avg_time_to_fix)),
            ),
            ("Improvement", format!("{:.1}%", s.improvement_percent)),
            (
                "First-try fixes",
                format!("{} (previous {})", percent(s.first_try_rate), percent(s.previous_first_try_rate)),
            ),
            ("Knowledge reuse", percent(s.knowledge_reuse_rate)),
            ("Bugs fixed", s.bugs_fixed.to_string()),
            ("Avg iterations", format!("{:.2}", s.avg_iterations)),
        ]);
        format!("Metrics for {} ({})\n{table}", s.scope, s.window.as_str())
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TrendOutput {
    pub scope: String,
    #[serde(flatten)]
    pub response: TrendResponse,
    #[serde(skip)]
    pub points: Vec<TrendPoint>,
}

impl CommandOutput for TrendOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["date", "runs", "pass rate", "avg time to fix"]);
        for point in &self.points {
            table.add_row(vec![
                point.label.clone(),
                point.runs.to_string(),
                percent(point.pass_rate),
                seconds(point.avg_time_to_fix),
            ]);
        }
        format!("Trend for {} ({} days)\n{table}", self.scope, self.points.len())
    }
}

pub async fn execute(args: MetricsArgs, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let pool = super::open_database(&config).await?;
    let metrics = MetricsStore::new(Arc::new(SqliteMetricsRepository::new(pool)));

    match args.command {
        MetricsCommand::Summary { scope, window } => {
            let scope = scope.unwrap_or_else(|| config.metrics.default_scope.clone());
            let window = MetricsWindow::from_str(&window)
                .ok_or_else(|| anyhow!("Invalid window '{window}'. Must be one of: day, week"))?;
            let summary = metrics
                .summary(&scope, window)
                .await
                .context("Failed to compute metrics summary")?;
            output(&SummaryOutput { summary }, json_mode);
        }
        MetricsCommand::Trend { scope, days } => {
            let scope = scope.unwrap_or_else(|| config.metrics.default_scope.clone());
            let days = days.unwrap_or(config.metrics.trend_days);
            let series = metrics
                .trend(&scope, days)
                .await
                .context("Failed to compute metrics trend")?;
            output(
                &TrendOutput {
                    scope,
                    response: series.to_response(),
                    points: series.iter().collect(),
                },
                json_mode,
            );
        }
    }
    Ok(())
}
