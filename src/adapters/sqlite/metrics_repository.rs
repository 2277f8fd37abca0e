//! SQLite implementation of the MetricsRepository.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::MetricsPeriod;
use crate::domain::ports::MetricsRepository;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct SqliteMetricsRepository {
    pool: SqlitePool,
}

impl SqliteMetricsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsRepository for SqliteMetricsRepository {
    async fn fold(&self, delta: &MetricsPeriod) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO metrics_periods (scope, window_start, window_end, total_runs,
                   completed_runs, failed_runs, cancelled_runs, tests_total, tests_passed,
                   fixed_runs, first_try_runs, time_to_fix_ms, successful_patches,
                   reused_patches, total_iterations)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(scope, window_start) DO UPDATE SET
                   total_runs = total_runs + excluded.total_runs,
                   completed_runs = completed_runs + excluded.completed_runs,
                   failed_runs = failed_runs + excluded.failed_runs,
                   cancelled_runs = cancelled_runs + excluded.cancelled_runs,
                   tests_total = tests_total + excluded.tests_total,
                   tests_passed = tests_passed + excluded.tests_passed,
                   fixed_runs = fixed_runs + excluded.fixed_runs,
                   first_try_runs = first_try_runs + excluded.first_try_runs,
                   time_to_fix_ms = time_to_fix_ms + excluded.time_to_fix_ms,
                   successful_patches = successful_patches + excluded.successful_patches,
                   reused_patches = reused_patches + excluded.reused_patches,
                   total_iterations = total_iterations + excluded.total_iterations"#
        )
        .bind(&delta.scope)
        .bind(delta.window_start.format(DATE_FORMAT).to_string())
        .bind(delta.window_end.format(DATE_FORMAT).to_string())
        .bind(to_db(delta.total_runs)?)
        .bind(to_db(delta.completed_runs)?)
        .bind(to_db(delta.failed_runs)?)
        .bind(to_db(delta.cancelled_runs)?)
        .bind(to_db(delta.tests_total)?)
        .bind(to_db(delta.tests_passed)?)
        .bind(to_db(delta.fixed_runs)?)
        .bind(to_db(delta.first_try_runs)?)
        .bind(to_db(delta.time_to_fix_ms)?)
        .bind(to_db(delta.successful_patches)?)
        .bind(to_db(delta.reused_patches)?)
        .bind(to_db(delta.total_iterations)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_range(
        &self,
        scope: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DomainResult<Vec<MetricsPeriod>> {
        let rows: Vec<MetricsRow> = sqlx::query_as(
            r#"SELECT * FROM metrics_periods
               WHERE scope = ? AND window_start >= ? AND window_start <= ?
               ORDER BY window_start ASC"#
        )
        .bind(scope)
        .bind(from.format(DATE_FORMAT).to_string())
        .bind(to.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn to_db(value: u64) -> DomainResult<i64> {
    i64::try_from(value).map_err(|e| DomainError::SerializationError(e.to_string()))
}

fn from_db(value: i64) -> DomainResult<u64> {
    u64::try_from(value).map_err(|e| DomainError::SerializationError(e.to_string()))
}

fn parse_date(s: &str) -> DomainResult<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| DomainError::SerializationError(e.to_string()))
}

#[derive(sqlx::FromRow)]
struct MetricsRow {
    scope: String,
    window_start: String,
    window_end: String,
    total_runs: i64,
    completed_runs: i64,
    failed_runs: i64,
    cancelled_runs: i64,
    tests_total: i64,
    tests_passed: i64,
    fixed_runs: i64,
    first_try_runs: i64,
    time_to_fix_ms: i64,
    successful_patches: i64,
    reused_patches: i64,
    total_iterations: i64,
}

impl TryFrom<MetricsRow> for MetricsPeriod {
    type Error = DomainError;

    fn try_from(row: MetricsRow) -> Result<Self, Self::Error> {
        Ok(MetricsPeriod {
            scope: row.scope,
            window_start: parse_date(&row.window_start)?,
            window_end: parse_date(&row.window_end)?,
            total_runs: from_db(row.total_runs)?,
            completed_runs: from_db(row.completed_runs)?,
            failed_runs: from_db(row.failed_runs)?,
            cancelled_runs: from_db(row.cancelled_runs)?,
            tests_total: from_db(row.tests_total)?,
            tests_passed: from_db(row.tests_passed)?,
            fixed_runs: from_db(row.fixed_runs)?,
            first_try_runs: from_db(row.first_try_runs)?,
            time_to_fix_ms: from_db(row.time_to_fix_ms)?,
            successful_patches: from_db(row.successful_patches)?,
            reused_patches: from_db(row.reused_patches)?,
            total_iterations: from_db(row.total_iterations)?,
        })
    }
}
