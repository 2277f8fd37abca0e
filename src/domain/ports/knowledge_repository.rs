use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{FailureSignature, FixOutcome, KnowledgeEntry, KnowledgeStats};

/// Durable store for knowledge entries keyed by failure signature.
#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    /// Fetch the entry for a pattern key.
    async fn get(&self, pattern_key: &str) -> DomainResult<Option<KnowledgeEntry>>;

    /// Record one fix attempt for `signature`, creating the entry on first sight.
    ///
    /// Must be atomic: concurrent calls for the same key each contribute
    /// exactly one increment to `total_count`, and successes to `success_count`.
    /// `fix_summary` replaces the stored fix only on success.
    async fn record(
        &self,
        signature: &FailureSignature,
        outcome: FixOutcome,
        fix_summary: Option<&str>,
    ) -> DomainResult<KnowledgeEntry>;

    /// Entries ordered by most recent successful use, then most recently updated.
    async fn list(&self, limit: usize) -> DomainResult<Vec<KnowledgeEntry>>;

    /// Sums over every entry.
    async fn totals(&self) -> DomainResult<KnowledgeStats>;
}
