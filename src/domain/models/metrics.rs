//! Run metrics aggregated per scope and calendar window.
//!
//! Rates are fractions in `[0.0, 1.0]`; `improvement_percent` is a percentage.
//! Periods store raw sums so windows can be merged without losing precision.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::run::{Run, RunStatus};

/// Scope that aggregates every run regardless of repository.
pub const GLOBAL_SCOPE: &str = "global";

/// Longest trend that can be requested, one leap year of days.
pub const MAX_TREND_DAYS: u32 = 366;

/// Scope key for a single repository.
pub fn repo_scope(repo_id: &str) -> String {
    format!("repo:{repo_id}")
}

/// Length of a comparison window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricsWindow {
    #[default]
    Day,
    Week,
}

impl MetricsWindow {
    pub const fn days(self) -> i64 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "day" | "daily" => Some(Self::Day),
            "week" | "weekly" => Some(Self::Week),
            _ => None,
        }
    }
}

/// What one terminal run contributes to the metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunStatus,
    pub tests_total: u32,
    pub tests_passed: u32,
    pub iterations: u32,
    pub patches_committed: u32,
    pub patches_reused: u32,
    pub fix_attempts: u32,
    pub time_to_fix_ms: Option<u64>,
}

impl RunOutcome {
    pub fn from_run(run: &Run) -> Self {
        let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        Self {
            status: run.status,
            tests_total: run.tests_total,
            tests_passed: run.tests_passed,
            iterations: run.iteration,
            patches_committed: count(run.patches_applied.len()),
            patches_reused: count(
                run.patches_applied
                    .iter()
                    .filter(|p| p.knowledge_reused)
                    .count(),
            ),
            fix_attempts: run.fix_attempts,
            time_to_fix_ms: run
                .time_to_fix()
                .and_then(|d| u64::try_from(d.num_milliseconds()).ok()),
        }
    }

    /// Completed after at least one committed patch.
    pub fn is_fixed(&self) -> bool {
        self.status == RunStatus::Completed && self.patches_committed > 0
    }

    /// Fixed by the very first verified patch.
    pub fn is_first_try(&self) -> bool {
        self.is_fixed() && self.fix_attempts == 1
    }
}

/// Aggregated counters for one scope over one window (inclusive dates).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPeriod {
    pub scope: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub total_runs: u64,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub cancelled_runs: u64,
    pub tests_total: u64,
    pub tests_passed: u64,
    pub fixed_runs: u64,
    pub first_try_runs: u64,
    pub time_to_fix_ms: u64,
    pub successful_patches: u64,
    pub reused_patches: u64,
    pub total_iterations: u64,
}

impl MetricsPeriod {
    pub fn empty(scope: impl Into<String>, window_start: NaiveDate, window_end: NaiveDate) -> Self {
        Self {
            scope: scope.into(),
            window_start,
            window_end,
            total_runs: 0,
            completed_runs: 0,
            failed_runs: 0,
            cancelled_runs: 0,
            tests_total: 0,
            tests_passed: 0,
            fixed_runs: 0,
            first_try_runs: 0,
            time_to_fix_ms: 0,
            successful_patches: 0,
            reused_patches: 0,
            total_iterations: 0,
        }
    }

    /// The contribution of a single run to the daily window `day`.
    pub fn from_outcome(scope: impl Into<String>, day: NaiveDate, outcome: &RunOutcome) -> Self {
        let mut period = Self::empty(scope, day, day);
        period.total_runs = 1;
        match outcome.status {
            RunStatus::Completed => period.completed_runs = 1,
            RunStatus::Failed => period.failed_runs = 1,
            RunStatus::Cancelled => period.cancelled_runs = 1,
            RunStatus::Queued | RunStatus::Running => {}
        }
        if matches!(outcome.status, RunStatus::Completed | RunStatus::Failed) {
            period.tests_total = u64::from(outcome.tests_total);
            period.tests_passed = u64::from(outcome.tests_passed);
            period.total_iterations = u64::from(outcome.iterations);
        }
        if outcome.is_fixed() {
            period.fixed_runs = 1;
            period.time_to_fix_ms = outcome.time_to_fix_ms.unwrap_or(0);
        }
        if outcome.is_first_try() {
            period.first_try_runs = 1;
        }
        period.successful_patches = u64::from(outcome.patches_committed);
        period.reused_patches = u64::from(outcome.patches_reused);
        period
    }

    pub fn is_empty(&self) -> bool {
        self.total_runs == 0
    }

    /// Fold another period into this one, widening the window to cover both.
    pub fn merge(&mut self, other: &Self) {
        self.window_start = self.window_start.min(other.window_start);
        self.window_end = self.window_end.max(other.window_end);
        self.total_runs += other.total_runs;
        self.completed_runs += other.completed_runs;
        self.failed_runs += other.failed_runs;
        self.cancelled_runs += other.cancelled_runs;
        self.tests_total += other.tests_total;
        self.tests_passed += other.tests_passed;
        self.fixed_runs += other.fixed_runs;
        self.first_try_runs += other.first_try_runs;
        self.time_to_fix_ms += other.time_to_fix_ms;
        self.successful_patches += other.successful_patches;
        self.reused_patches += other.reused_patches;
        self.total_iterations += other.total_iterations;
    }

    pub fn pass_rate(&self) -> f64 {
        ratio(self.tests_passed, self.tests_total)
    }

    /// Mean seconds from start to completion over fixed runs.
    pub fn avg_time_to_fix_secs(&self) -> f64 {
        ratio(self.time_to_fix_ms, self.fixed_runs) / 1000.0
    }

    pub fn first_try_rate(&self) -> f64 {
        ratio(self.first_try_runs, self.fixed_runs)
    }

    /// Share of committed patches that were guided by a known fix.
    pub fn knowledge_reuse_rate(&self) -> f64 {
        ratio(self.reused_patches, self.successful_patches)
    }

    pub fn avg_iterations(&self) -> f64 {
        ratio(self.total_iterations, self.completed_runs + self.failed_runs)
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// The current window and the one immediately before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsComparison {
    pub window: MetricsWindow,
    pub current: MetricsPeriod,
    pub previous: MetricsPeriod,
}

/// Dashboard-facing metrics payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub scope: String,
    pub window: MetricsWindow,
    pub pass_rate: f64,
    pub previous_pass_rate: f64,
    pub avg_time_to_fix: f64,
    pub previous_avg_time_to_fix: f64,
    pub first_try_rate: f64,
    pub previous_first_try_rate: f64,
    pub knowledge_reuse_rate: f64,
    pub improvement_percent: f64,
    pub total_runs: u64,
    pub bugs_fixed: u64,
    pub avg_iterations: f64,
}

impl MetricsSummary {
    pub fn from_comparison(comparison: &MetricsComparison) -> Self {
        let current = &comparison.current;
        let previous = &comparison.previous;
        let previous_ttf = previous.avg_time_to_fix_secs();
        let improvement_percent = if previous_ttf > 0.0 && current.fixed_runs > 0 {
            (1.0 - current.avg_time_to_fix_secs() / previous_ttf) * 100.0
        } else {
            0.0
        };

        Self {
            scope: current.scope.clone(),
            window: comparison.window,
            pass_rate: current.pass_rate(),
            previous_pass_rate: previous.pass_rate(),
            avg_time_to_fix: current.avg_time_to_fix_secs(),
            previous_avg_time_to_fix: previous_ttf,
            first_try_rate: current.first_try_rate(),
            previous_first_try_rate: previous.first_try_rate(),
            knowledge_reuse_rate: current.knowledge_reuse_rate(),
            improvement_percent,
            total_runs: current.total_runs,
            bugs_fixed: current.successful_patches,
            avg_iterations: current.avg_iterations(),
        }
    }
}

/// One day of a trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub label: String,
    pub pass_rate: f64,
    pub avg_time_to_fix: f64,
    pub runs: u64,
}

/// Parallel arrays ready for charting. All three always have equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendResponse {
    pub labels: Vec<String>,
    pub pass_rates: Vec<f64>,
    pub time_to_fix: Vec<f64>,
}

/// A daily trend over a fixed number of days, oldest first.
///
/// Points are computed on demand; iterating again starts from the first day.
#[derive(Debug, Clone)]
pub struct TrendSeries {
    scope: String,
    start: NaiveDate,
    days: u32,
    buckets: BTreeMap<NaiveDate, MetricsPeriod>,
}

impl TrendSeries {
    /// Build a series ending on `end` (inclusive) from stored daily periods.
    pub fn new(
        scope: impl Into<String>,
        end: NaiveDate,
        days: u32,
        periods: impl IntoIterator<Item = MetricsPeriod>,
    ) -> Self {
        let days = days.min(MAX_TREND_DAYS);
        let start = end - Duration::days(i64::from(days.saturating_sub(1)));
        let buckets = periods
            .into_iter()
            .filter(|p| p.window_start >= start && p.window_start <= end)
            .map(|p| (p.window_start, p))
            .collect();
        Self {
            scope: scope.into(),
            start,
            days,
            buckets,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub const fn len(&self) -> usize {
        self.days as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.days == 0
    }

    pub fn iter(&self) -> TrendIter<'_> {
        TrendIter {
            series: self,
            offset: 0,
        }
    }

    fn point(&self, offset: u32) -> TrendPoint {
        let date = self.start + Duration::days(i64::from(offset));
        let (pass_rate, avg_time_to_fix, runs) = self.buckets.get(&date).map_or((0.0, 0.0, 0), |p| {
            (p.pass_rate(), p.avg_time_to_fix_secs(), p.total_runs)
        });
        TrendPoint {
            date,
            label: date.format("%Y-%m-%d").to_string(),
            pass_rate,
            avg_time_to_fix,
            runs,
        }
    }

    pub fn to_response(&self) -> TrendResponse {
        let mut response = TrendResponse {
            labels: Vec::with_capacity(self.len()),
            pass_rates: Vec::with_capacity(self.len()),
            time_to_fix: Vec::with_capacity(self.len()),
        };
        for point in self {
            response.labels.push(point.label);
            response.pass_rates.push(point.pass_rate);
            response.time_to_fix.push(point.avg_time_to_fix);
        }
        response
    }
}

/// Lazy iterator over a [`TrendSeries`].
pub struct TrendIter<'a> {
    series: &'a TrendSeries,
    offset: u32,
}

impl Iterator for TrendIter<'_> {
    type Item = TrendPoint;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.series.days {
            return None;
        }
        let point = self.series.point(self.offset);
        self.offset += 1;
        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.series.days - self.offset) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TrendIter<'_> {}

impl<'a> IntoIterator for &'a TrendSeries {
    type Item = TrendPoint;
    type IntoIter = TrendIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
