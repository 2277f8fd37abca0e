//! Knowledge base persistence and counter semantics against SQLite.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use qagent::adapters::sqlite::{
    create_migrated_test_pool, initialize_database, PoolConfig, SqliteKnowledgeRepository,
};
use qagent::domain::models::{FailureEvidence, FailureSignature, FixOutcome};
use qagent::services::KnowledgeBase;

fn signature(error_class: &str, selector: &str) -> FailureSignature {
    FailureSignature::from_evidence(
        &FailureEvidence::new(error_class, format!("waiting for {selector} failed"))
            .with_selector(selector),
    )
}

async fn memory_kb() -> KnowledgeBase {
    let pool = create_migrated_test_pool().await.unwrap();
    KnowledgeBase::new(Arc::new(SqliteKnowledgeRepository::new(pool)))
}

#[tokio::test]
async fn test_record_outcome_counts() {
    let kb = memory_kb().await;
    let sig = signature("TimeoutError", "#submit");

    assert!(kb.lookup(&sig).await.is_none());

    let entry = kb.record_outcome(&sig, FixOutcome::Failure, Some("ignored")).await.unwrap();
    assert_eq!((entry.success_count, entry.total_count), (0, 1));
    assert!(entry.fix_summary.is_none(), "failures never store a fix");
    assert!(entry.last_used_at.is_none());

    let entry = kb
        .record_outcome(&sig, FixOutcome::Success, Some("wait for #submit"))
        .await
        .unwrap();
    assert_eq!((entry.success_count, entry.total_count), (1, 2));
    assert_eq!(entry.fix_summary.as_deref(), Some("wait for #submit"));
    assert!(entry.last_used_at.is_some());
    assert!(entry.has_proven_fix());

    // A later failure keeps the proven fix.
    let entry = kb.record_outcome(&sig, FixOutcome::Failure, None).await.unwrap();
    assert_eq!((entry.success_count, entry.total_count), (1, 3));
    assert_eq!(entry.fix_summary.as_deref(), Some("wait for #submit"));

    let found = kb.lookup(&sig).await.unwrap();
    assert_eq!(found.pattern_key, sig.key);
    assert_eq!(found.error_class, "TimeoutError");
}

#[tokio::test]
async fn test_stats_sum_all_entries() {
    let kb = memory_kb().await;
    let timeout = signature("TimeoutError", "#submit");
    let assertion = signature("AssertionError", ".total");

    kb.record_outcome(&timeout, FixOutcome::Success, Some("fix")).await.unwrap();
    kb.record_outcome(&timeout, FixOutcome::Failure, None).await.unwrap();
    kb.record_outcome(&assertion, FixOutcome::Failure, None).await.unwrap();

    let stats = kb.stats().await;
    assert_eq!(stats.patterns, 2);
    assert_eq!(stats.total_failures, 3);
    assert_eq!(stats.successful_fixes, 1);
}

#[tokio::test]
async fn test_list_orders_by_recent_success() {
    let kb = memory_kb().await;
    let older = signature("TimeoutError", "#submit");
    let never_fixed = signature("AssertionError", ".total");
    let newer = signature("NavigationError", "a.checkout");

    kb.record_outcome(&older, FixOutcome::Success, Some("a")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    kb.record_outcome(&never_fixed, FixOutcome::Failure, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    kb.record_outcome(&newer, FixOutcome::Success, Some("b")).await.unwrap();

    let keys: Vec<String> = kb
        .list(10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.pattern_key)
        .collect();
    assert_eq!(keys, vec![newer.key.clone(), older.key.clone(), never_fixed.key]);

    assert_eq!(kb.list(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_successes_all_count() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("kb.db").display());
    let pool = initialize_database(
        &url,
        Some(PoolConfig {
            max_connections: 4,
            ..PoolConfig::default()
        }),
    )
    .await
    .unwrap();
    let kb = KnowledgeBase::new(Arc::new(SqliteKnowledgeRepository::new(pool)));
    let sig = signature("TimeoutError", "#submit");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let kb = kb.clone();
            let sig = sig.clone();
            tokio::spawn(async move {
                let summary = format!("fix {i}");
                kb.record_outcome(&sig, FixOutcome::Success, Some(summary.as_str())).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let entry = kb.lookup(&sig).await.unwrap();
    assert_eq!(entry.success_count, 8);
    assert_eq!(entry.total_count, 8);
}

#[tokio::test]
async fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("kb.db").display());
    let sig = signature("TimeoutError", "#submit");

    {
        let pool = initialize_database(&url, None).await.unwrap();
        let kb = KnowledgeBase::new(Arc::new(SqliteKnowledgeRepository::new(pool.clone())));
        kb.record_outcome(&sig, FixOutcome::Success, Some("wait for #submit"))
            .await
            .unwrap();
        pool.close().await;
    }

    let pool = initialize_database(&url, None).await.unwrap();
    let kb = KnowledgeBase::new(Arc::new(SqliteKnowledgeRepository::new(pool)));
    let entry = kb.lookup(&sig).await.expect("entry persisted");
    assert_eq!((entry.success_count, entry.total_count), (1, 1));
    assert_eq!(entry.fix_summary.as_deref(), Some("wait for #submit"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_success_never_exceeds_total(outcomes in prop::collection::vec(any::<bool>(), 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let entry = runtime.block_on(async {
            let kb = memory_kb().await;
            let sig = signature("TimeoutError", "#submit");
            let mut last = None;
            for success in &outcomes {
                let outcome = if *success { FixOutcome::Success } else { FixOutcome::Failure };
                last = Some(kb.record_outcome(&sig, outcome, Some("fix")).await.unwrap());
            }
            last.unwrap()
        });

        let successes = outcomes.iter().filter(|s| **s).count();
        prop_assert_eq!(entry.total_count as usize, outcomes.len());
        prop_assert_eq!(entry.success_count as usize, successes);
        prop_assert!(entry.success_count <= entry.total_count);
        prop_assert_eq!(entry.fix_summary.is_some(), successes > 0);
    }
}
