//! Metrics store: folds finished runs into daily windows and answers
//! comparison, summary and trend queries.

use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tracing::instrument;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    MetricsComparison, MetricsPeriod, MetricsSummary, MetricsWindow, RunOutcome, TrendSeries,
    MAX_TREND_DAYS,
};
use crate::domain::ports::{Clock, MetricsRepository, SystemClock};

#[derive(Clone)]
pub struct MetricsStore {
    repository: Arc<dyn MetricsRepository>,
    clock: Arc<dyn Clock>,
}

impl MetricsStore {
    pub fn new(repository: Arc<dyn MetricsRepository>) -> Self {
        Self::with_clock(repository, Arc::new(SystemClock))
    }

    pub fn with_clock(repository: Arc<dyn MetricsRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Fold a finished run into today's window for `scope`.
    #[instrument(skip(self, outcome), fields(status = %outcome.status), err)]
    pub async fn record_run(&self, scope: &str, outcome: &RunOutcome) -> DomainResult<()> {
        let delta = MetricsPeriod::from_outcome(scope, self.today(), outcome);
        self.repository.fold(&delta).await
    }

    /// The window containing today and the window immediately before it.
    pub async fn comparison(&self, scope: &str, window: MetricsWindow) -> DomainResult<MetricsComparison> {
        let len = window.days();
        let current_end = self.today();
        let current_start = current_end - Duration::days(len - 1);
        let previous_end = current_start - Duration::days(1);
        let previous_start = previous_end - Duration::days(len - 1);

        let periods = self
            .repository
            .list_range(scope, previous_start, current_end)
            .await?;

        let mut current = MetricsPeriod::empty(scope, current_start, current_end);
        let mut previous = MetricsPeriod::empty(scope, previous_start, previous_end);
        for period in &periods {
            if period.window_start >= current_start {
                current.merge(period);
            } else {
                previous.merge(period);
            }
        }

        Ok(MetricsComparison {
            window,
            current,
            previous,
        })
    }

    /// Dashboard summary for the current window against the previous one.
    pub async fn summary(&self, scope: &str, window: MetricsWindow) -> DomainResult<MetricsSummary> {
        let comparison = self.comparison(scope, window).await?;
        Ok(MetricsSummary::from_comparison(&comparison))
    }

    /// Daily trend over the last `days` days, oldest first, including today.
    pub async fn trend(&self, scope: &str, days: u32) -> DomainResult<TrendSeries> {
        if days > MAX_TREND_DAYS {
            return Err(DomainError::Validation(format!(
                "trend days must be at most {MAX_TREND_DAYS}, got {days}"
            )));
        }
        let end = self.today();
        if days == 0 {
            return Ok(TrendSeries::new(scope, end, 0, Vec::new()));
        }
        let start = end - Duration::days(i64::from(days) - 1);
        let periods = self.repository.list_range(scope, start, end).await?;
        Ok(TrendSeries::new(scope, end, days, periods))
    }
}
