use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::errors::DomainResult;
use crate::domain::models::MetricsPeriod;

/// Append/fold-only store of daily metrics periods.
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// Add `delta`'s counters into the stored period with the same scope and
    /// window start, inserting it if absent. Must be atomic per call.
    async fn fold(&self, delta: &MetricsPeriod) -> DomainResult<()>;

    /// Stored periods for `scope` whose window starts within `[from, to]`,
    /// oldest first.
    async fn list_range(
        &self,
        scope: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DomainResult<Vec<MetricsPeriod>>;
}
