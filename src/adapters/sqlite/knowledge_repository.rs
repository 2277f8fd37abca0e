//! SQLite implementation of the KnowledgeRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::{parse_count, parse_datetime, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FailureSignature, FixOutcome, KnowledgeEntry, KnowledgeStats};
use crate::domain::ports::KnowledgeRepository;

#[derive(Clone)]
pub struct SqliteKnowledgeRepository {
    pool: SqlitePool,
}

impl SqliteKnowledgeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KnowledgeRepository for SqliteKnowledgeRepository {
    async fn get(&self, pattern_key: &str) -> DomainResult<Option<KnowledgeEntry>> {
        let row: Option<KnowledgeRow> = sqlx::query_as(
            "SELECT * FROM knowledge_entries WHERE pattern_key = ?"
        )
        .bind(pattern_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn record(
        &self,
        signature: &FailureSignature,
        outcome: FixOutcome,
        fix_summary: Option<&str>,
    ) -> DomainResult<KnowledgeEntry> {
        let now = Utc::now().to_rfc3339();
        let success = outcome.is_success();
        let last_used_at = success.then(|| now.clone());
        let fix_summary = fix_summary.filter(|_| success);

        // Single statement: concurrent writers serialize on the row and
        // every call lands exactly one increment.
        let row: KnowledgeRow = sqlx::query_as(
            r#"INSERT INTO knowledge_entries (pattern_key, error_class, description, fix_summary,
                   success_count, total_count, last_used_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
               ON CONFLICT(pattern_key) DO UPDATE SET
                   success_count = success_count + excluded.success_count,
                   total_count = total_count + 1,
                   fix_summary = COALESCE(excluded.fix_summary, knowledge_entries.fix_summary),
                   last_used_at = COALESCE(excluded.last_used_at, knowledge_entries.last_used_at),
                   updated_at = excluded.updated_at
               RETURNING *"#
        )
        .bind(&signature.key)
        .bind(&signature.error_class)
        .bind(&signature.description)
        .bind(fix_summary)
        .bind(i64::from(success))
        .bind(last_used_at)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn list(&self, limit: usize) -> DomainResult<Vec<KnowledgeEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<KnowledgeRow> = sqlx::query_as(
            r#"SELECT * FROM knowledge_entries
               ORDER BY last_used_at IS NULL, last_used_at DESC, updated_at DESC
               LIMIT ?"#
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn totals(&self) -> DomainResult<KnowledgeStats> {
        let (total, success, patterns): (i64, i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(total_count), 0), COALESCE(SUM(success_count), 0), COUNT(*) FROM knowledge_entries"
        )
        .fetch_one(&self.pool)
        .await?;

        let non_negative = |v: i64| {
            u64::try_from(v).map_err(|e| DomainError::SerializationError(e.to_string()))
        };
        Ok(KnowledgeStats {
            total_failures: non_negative(total)?,
            successful_fixes: non_negative(success)?,
            patterns: non_negative(patterns)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct KnowledgeRow {
    pattern_key: String,
    error_class: String,
    description: String,
    fix_summary: Option<String>,
    success_count: i64,
    total_count: i64,
    last_used_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<KnowledgeRow> for KnowledgeEntry {
    type Error = DomainError;

    fn try_from(row: KnowledgeRow) -> Result<Self, Self::Error> {
        Ok(KnowledgeEntry {
            pattern_key: row.pattern_key,
            error_class: row.error_class,
            description: row.description,
            fix_summary: row.fix_summary,
            success_count: parse_count(row.success_count)?,
            total_count: parse_count(row.total_count)?,
            last_used_at: parse_optional_datetime(row.last_used_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::FailureEvidence;

    async fn setup() -> SqliteKnowledgeRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteKnowledgeRepository::new(pool)
    }

    fn signature(message: &str) -> FailureSignature {
        FailureSignature::from_evidence(&FailureEvidence::new("TimeoutError", message))
    }

    #[tokio::test]
    async fn test_record_creates_then_increments() {
        let repo = setup().await;
        let sig = signature("waiting for checkout button");

        let first = repo.record(&sig, FixOutcome::Failure, Some("ignored")).await.unwrap();
        assert_eq!(first.total_count, 1);
        assert_eq!(first.success_count, 0);
        assert!(first.last_used_at.is_none());
        assert!(first.fix_summary.is_none());

        let second = repo.record(&sig, FixOutcome::Success, Some("wait for network idle")).await.unwrap();
        assert_eq!(second.total_count, 2);
        assert_eq!(second.success_count, 1);
        assert!(second.last_used_at.is_some());
        assert_eq!(second.fix_summary.as_deref(), Some("wait for network idle"));
        assert_eq!(second.created_at, first.created_at);

        let third = repo.record(&sig, FixOutcome::Failure, None).await.unwrap();
        assert_eq!(third.fix_summary.as_deref(), Some("wait for network idle"));
        assert_eq!(third.last_used_at, second.last_used_at);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let repo = setup().await;
        assert!(repo.get("sig_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_totals_and_list_order() {
        let repo = setup().await;
        assert_eq!(repo.totals().await.unwrap(), KnowledgeStats::default());

        let never_fixed = signature("never fixed");
        let fixed = signature("fixed once");
        repo.record(&never_fixed, FixOutcome::Failure, None).await.unwrap();
        repo.record(&fixed, FixOutcome::Success, Some("patch")).await.unwrap();

        let totals = repo.totals().await.unwrap();
        assert_eq!(totals.total_failures, 2);
        assert_eq!(totals.successful_fixes, 1);
        assert_eq!(totals.patterns, 2);

        let listed = repo.list(10).await.unwrap();
        assert_eq!(listed[0].pattern_key, fixed.key);
        assert_eq!(listed[1].pattern_key, never_fixed.key);
        assert_eq!(repo.list(1).await.unwrap().len(), 1);
    }
}
