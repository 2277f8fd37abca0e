//! Knowledge base service: learned failure → fix patterns.
//!
//! Reads degrade to empty results when storage is unavailable so a flaky
//! database never stalls a run; writes propagate their errors.

use std::sync::Arc;
use tracing::{instrument, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{FailureSignature, FixOutcome, KnowledgeEntry, KnowledgeStats};
use crate::domain::ports::KnowledgeRepository;

#[derive(Clone)]
pub struct KnowledgeBase {
    repository: Arc<dyn KnowledgeRepository>,
}

impl KnowledgeBase {
    pub fn new(repository: Arc<dyn KnowledgeRepository>) -> Self {
        Self { repository }
    }

    /// Find the entry for a signature. Storage errors are logged and read as a miss.
    pub async fn lookup(&self, signature: &FailureSignature) -> Option<KnowledgeEntry> {
        match self.try_lookup(signature).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(pattern_key = %signature.key, error = %err, "knowledge lookup failed; treating as miss");
                None
            }
        }
    }

    pub async fn try_lookup(&self, signature: &FailureSignature) -> DomainResult<Option<KnowledgeEntry>> {
        self.repository.get(&signature.key).await
    }

    pub async fn get(&self, pattern_key: &str) -> DomainResult<Option<KnowledgeEntry>> {
        self.repository.get(pattern_key).await
    }

    /// Record one fix attempt.
    ///
    /// Success increments both counters, stamps `last_used_at` and stores
    /// `fix_summary`; failure increments only the total.
    #[instrument(skip(self, signature, fix_summary), fields(pattern_key = %signature.key, outcome = outcome.as_str()), err)]
    pub async fn record_outcome(
        &self,
        signature: &FailureSignature,
        outcome: FixOutcome,
        fix_summary: Option<&str>,
    ) -> DomainResult<KnowledgeEntry> {
        let entry = self.repository.record(signature, outcome, fix_summary).await?;
        tracing::debug!(
            success_count = entry.success_count,
            total_count = entry.total_count,
            "knowledge entry updated"
        );
        Ok(entry)
    }

    /// Aggregate counters, zeroed when storage is unavailable.
    pub async fn stats(&self) -> KnowledgeStats {
        self.repository.totals().await.unwrap_or_else(|err| {
            warn!(error = %err, "knowledge stats unavailable; reporting zeros");
            KnowledgeStats::default()
        })
    }

    /// Most recently useful entries first.
    pub async fn list(&self, limit: usize) -> DomainResult<Vec<KnowledgeEntry>> {
        self.repository.list(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use crate::domain::models::FailureEvidence;
    use async_trait::async_trait;

    struct UnavailableRepository;

    #[async_trait]
    impl KnowledgeRepository for UnavailableRepository {
        async fn get(&self, _: &str) -> DomainResult<Option<KnowledgeEntry>> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }

        async fn record(
            &self,
            _: &FailureSignature,
            _: FixOutcome,
            _: Option<&str>,
        ) -> DomainResult<KnowledgeEntry> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }

        async fn list(&self, _: usize) -> DomainResult<Vec<KnowledgeEntry>> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }

        async fn totals(&self) -> DomainResult<KnowledgeStats> {
            Err(DomainError::DatabaseError("database is locked".to_string()))
        }
    }

    #[tokio::test]
    async fn test_reads_degrade_and_writes_fail() {
        let kb = KnowledgeBase::new(Arc::new(UnavailableRepository));
        let sig = FailureSignature::from_evidence(&FailureEvidence::new("Error", "boom"));

        assert!(kb.lookup(&sig).await.is_none());
        assert!(kb.try_lookup(&sig).await.is_err());
        assert_eq!(kb.stats().await, KnowledgeStats::default());
        assert!(kb.record_outcome(&sig, FixOutcome::Success, None).await.is_err());
    }
}
