//! Implementation of the `qagent validate` command.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use crate::cli::display::list_table;
use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::models::{RunLimits, RunRequest};
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Run request file (JSON or YAML)
    pub file: PathBuf,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOutput {
    pub valid: bool,
    pub file: PathBuf,
    pub repo_name: Option<String>,
    pub max_iterations: u32,
    pub tests: Vec<TestSummary>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub id: String,
    pub name: String,
    pub url: String,
    pub steps: usize,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "name", "steps", "url"]);
        for test in &self.tests {
            table.add_row(vec![
                test.id.clone(),
                truncate(&test.name, 32),
                test.steps.to_string(),
                truncate(&test.url, 48),
            ]);
        }
        format!(
            "{} is a valid run request ({} test{}, max {} iteration{})\n{table}",
            self.file.display(),
            self.tests.len(),
            if self.tests.len() == 1 { "" } else { "s" },
            self.max_iterations,
            if self.max_iterations == 1 { "" } else { "s" },
        )
    }
}

/// Parse a run request, choosing the format from the file extension.
pub fn parse_request(path: &Path, content: &str) -> Result<RunRequest> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(content).context("Failed to parse run request as JSON")
    } else {
        serde_yaml::from_str(content).context("Failed to parse run request as YAML")
    }
}

/// Validate a parsed request against the run limits.
pub fn check_request(file: &Path, request: &RunRequest, limits: &RunLimits) -> Result<ValidateOutput> {
    if let Err(err) = request.validate(limits) {
        bail!("{} is not a valid run request: {err}", file.display());
    }
    Ok(ValidateOutput {
        valid: true,
        file: file.to_path_buf(),
        repo_name: request.repo_name.clone(),
        max_iterations: request.max_iterations.unwrap_or(limits.default_max_iterations),
        tests: request
            .test_specs
            .iter()
            .map(|spec| TestSummary {
                id: spec.id.clone(),
                name: spec.name.clone(),
                url: spec.url.clone(),
                steps: spec.steps.len(),
            })
            .collect(),
    })
}

pub async fn execute(args: ValidateArgs, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let request = parse_request(&args.file, &content)?;
    let output_data = check_request(&args.file, &request, &config.run_limits())?;
    output(&output_data, json_mode);
    Ok(())
}
