//! Implementation of the `qagent knowledge` commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::sync::Arc;

use crate::adapters::sqlite::SqliteKnowledgeRepository;
use crate::cli::display::{key_value_table, list_table, render_list};
use crate::cli::output::{output, percent, truncate, CommandOutput};
use crate::domain::errors::DomainError;
use crate::domain::models::{KnowledgeEntry, KnowledgeStats};
use crate::infrastructure::config::ConfigLoader;
use crate::services::KnowledgeBase;

#[derive(Args, Debug)]
pub struct KnowledgeArgs {
    #[command(subcommand)]
    pub command: KnowledgeCommand,
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeCommand {
    /// Show aggregate fix counters
    Stats,

    /// List patterns, most recently fixed first
    List {
        /// Maximum number of patterns to display
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one pattern
    Show {
        /// Pattern key (sig_...)
        pattern_key: String,
    },
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsOutput {
    #[serde(flatten)]
    pub stats: KnowledgeStats,
    pub fix_rate: f64,
}

impl CommandOutput for StatsOutput {
    fn to_human(&self) -> String {
        key_value_table([
            ("Patterns", self.stats.patterns.to_string()),
            ("Failures seen", self.stats.total_failures.to_string()),
            ("Successful fixes", self.stats.successful_fixes.to_string()),
            ("Fix rate", percent(self.fix_rate)),
        ])
        .to_string()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ListOutput {
    pub entries: Vec<KnowledgeEntry>,
}

impl CommandOutput for ListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["pattern", "class", "fixed", "ratio", "last fixed", "description"]);
        for entry in &self.entries {
            table.add_row(vec![
                truncate(&entry.pattern_key, 16),
                entry.error_class.clone(),
                format!("{}/{}", entry.success_count, entry.total_count),
                percent(entry.success_ratio()),
                entry
                    .last_used_at
                    .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string()),
                truncate(&entry.description, 60),
            ]);
        }
        render_list("pattern", &table, self.entries.len())
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ShowOutput {
    #[serde(flatten)]
    pub entry: KnowledgeEntry,
}

impl CommandOutput for ShowOutput {
    fn to_human(&self) -> String {
        let entry = &self.entry;
        key_value_table([
            ("Pattern", entry.pattern_key.clone()),
            ("Class", entry.error_class.clone()),
            ("Description", entry.description.clone()),
            ("Fix", entry.fix_summary.clone().unwrap_or_else(|| "-".to_string())),
            ("Attempts", entry.total_count.to_string()),
            ("Successes", entry.success_count.to_string()),
            ("Success ratio", percent(entry.success_ratio())),
            (
                "Last fixed",
                entry
                    .last_used_at
                    .map_or_else(|| "never".to_string(), |at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            ),
            ("First seen", entry.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ])
        .to_string()
    }
}

pub async fn execute(args: KnowledgeArgs, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let pool = super::open_database(&config).await?;
    let knowledge = KnowledgeBase::new(Arc::new(SqliteKnowledgeRepository::new(pool)));

    match args.command {
        KnowledgeCommand::Stats => {
            let stats = knowledge.stats().await;
            output(
                &StatsOutput {
                    stats,
                    fix_rate: stats.fix_rate(),
                },
                json_mode,
            );
        }
        KnowledgeCommand::List { limit } => {
            let entries = knowledge
                .list(limit)
                .await
                .context("Failed to list knowledge entries")?;
            output(&ListOutput { entries }, json_mode);
        }
        KnowledgeCommand::Show { pattern_key } => {
            let entry = knowledge
                .get(&pattern_key)
                .await
                .context("Failed to load knowledge entry")?
                .ok_or(DomainError::KnowledgeEntryNotFound(pattern_key))?;
            output(&ShowOutput { entry }, json_mode);
        }
    }
    Ok(())
}
