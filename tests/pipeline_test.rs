//! End-to-end behaviour of the agent pipeline driven through the run queue.

mod common;

use anyhow::anyhow;
use common::{evidence, request, FakeApplier, FakeGenerator, FakeTester, HarnessBuilder, Recorder};
use qagent::domain::models::{
    AgentKind, AgentStatus, FailureSignature, MetricsWindow, RunEventData, RunStatus, TestOutcome,
    TestScope, GLOBAL_SCOPE,
};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn signature_of(message: &str) -> FailureSignature {
    FailureSignature::from_evidence(&evidence(message))
}

#[tokio::test]
async fn test_run_recovers_after_rejected_patch() {
    let harness = HarnessBuilder::new(FakeTester::fails_first(2, "button #submit not ready after 3000ms"))
        .build()
        .await;

    let (run_id, recorder) =
        Recorder::submit(&harness.queue, request(&["t1"]).with_max_iterations(3));
    assert_eq!(harness.queue.get(run_id).await.unwrap().status, RunStatus::Queued);

    let run = tokio::time::timeout(TIMEOUT, harness.queue.wait_for_terminal(run_id))
        .await
        .expect("run should finish")
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.iteration, 2);
    assert_eq!(run.patches_applied.len(), 1);
    assert_eq!(run.fix_attempts, 2);
    assert_eq!((run.tests_passed, run.tests_total), (1, 1));
    assert!(run.completed_at.is_some());
    assert_eq!(
        recorder.statuses(),
        vec![RunStatus::Queued, RunStatus::Running, RunStatus::Completed]
    );

    let entry = harness
        .knowledge
        .lookup(&signature_of("button #submit not ready after 3000ms"))
        .await
        .expect("knowledge entry for the failure");
    assert_eq!(entry.success_count, 1);
    assert_eq!(entry.total_count, 2);
    assert!(entry.fix_summary.is_some());
    assert!(entry.last_used_at.is_some());

    let attempts: Vec<u32> = harness.generator.requests().iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(harness.tester.calls_for("t1"), 4);
}

#[tokio::test]
async fn test_run_fails_when_iterations_exhausted() {
    let harness = HarnessBuilder::new(FakeTester::failing("element #submit detached"))
        .build()
        .await;

    let run_id = harness
        .queue
        .submit(request(&["t1"]).with_max_iterations(3))
        .unwrap();
    let recorder = Recorder::attach(&harness.events, run_id);
    let run = tokio::time::timeout(TIMEOUT, harness.queue.wait_for_terminal(run_id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.iteration, run.max_iterations);
    assert!(run.patches_applied.is_empty());
    assert_eq!(run.fix_attempts, 3);
    assert_eq!(run.tests_passed, 0);

    let entry = harness
        .knowledge
        .lookup(&signature_of("element #submit detached"))
        .await
        .unwrap();
    assert_eq!((entry.success_count, entry.total_count), (0, 3));
    assert!(entry.fix_summary.is_none());

    let events = recorder.events();
    match &events.last().unwrap().data {
        RunEventData::Complete {
            status,
            patches_applied,
            ..
        } => {
            assert_eq!(*status, RunStatus::Failed);
            assert_eq!(*patches_applied, 0);
        }
        other => panic!("expected complete event last, got {other:?}"),
    }
    assert_eq!(harness.applier.discarded.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_passing_suite_completes_at_iteration_zero() {
    let harness = HarnessBuilder::new(FakeTester::passing()).build().await;

    let run_id = harness.queue.submit(request(&["t1", "t2"])).unwrap();
    let run = harness.queue.wait_for_terminal(run_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.iteration, 0);
    assert_eq!((run.tests_passed, run.tests_total), (2, 2));
    assert!(run.patches_applied.is_empty());
    assert!(harness.generator.requests().is_empty());
}

#[tokio::test]
async fn test_events_follow_stage_order() {
    let harness = HarnessBuilder::new(FakeTester::fails_first(2, "timeout waiting for #submit"))
        .build()
        .await;

    let run_id = harness.queue.submit(request(&["t1"])).unwrap();
    let recorder = Recorder::attach(&harness.events, run_id);
    harness.queue.wait_for_terminal(run_id).await.unwrap();

    let events = recorder.events();
    let types = recorder.types();
    assert_eq!(types.first().map(String::as_str), Some("status"));
    assert_eq!(types.last().map(String::as_str), Some("complete"));
    assert_eq!(types.iter().filter(|t| *t == "complete").count(), 1);

    let stages: Vec<AgentKind> = events
        .iter()
        .filter_map(|e| match &e.data {
            RunEventData::Agent {
                agent,
                status: AgentStatus::Running,
                ..
            } => Some(*agent),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        vec![
            AgentKind::Tester,
            AgentKind::Triage,
            AgentKind::Fixer,
            AgentKind::Verifier,
            AgentKind::Triage,
            AgentKind::Fixer,
            AgentKind::Verifier,
            AgentKind::Tester,
        ]
    );

    // Every stage that starts finishes before the next one starts.
    let mut open: Option<AgentKind> = None;
    for event in &events {
        if let RunEventData::Agent { agent, status, .. } = &event.data {
            match status {
                AgentStatus::Running => {
                    assert!(open.is_none(), "{agent} started while {open:?} still running");
                    open = Some(*agent);
                }
                AgentStatus::Completed | AgentStatus::Failed => {
                    assert_eq!(open.take(), Some(*agent));
                }
                AgentStatus::Idle => {}
            }
        }
    }
    assert!(open.is_none());

    let scopes: Vec<TestScope> = events
        .iter()
        .filter_map(|e| match &e.data {
            RunEventData::Test { scope, .. } => Some(*scope),
            _ => None,
        })
        .collect();
    assert_eq!(
        scopes,
        vec![
            TestScope::Suite,
            TestScope::Verification,
            TestScope::Verification,
            TestScope::Suite
        ]
    );

    // Iteration numbers never decrease.
    let iterations: Vec<u32> = events
        .iter()
        .filter_map(|e| match &e.data {
            RunEventData::Agent { iteration, .. } | RunEventData::Test { iteration, .. } => Some(*iteration),
            _ => None,
        })
        .collect();
    assert!(iterations.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_fixer_error_consumes_an_iteration() {
    let harness = HarnessBuilder::new(FakeTester::fails_first(1, "timeout waiting for #submit"))
        .generator(FakeGenerator::failing_first(1))
        .build()
        .await;

    let run_id = harness.queue.submit(request(&["t1"])).unwrap();
    let recorder = Recorder::attach(&harness.events, run_id);
    let run = harness.queue.wait_for_terminal(run_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.iteration, 2);
    assert_eq!(run.patches_applied.len(), 1);

    let errors: Vec<(Option<AgentKind>, String)> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e.data {
            RunEventData::Error { agent, message, .. } => Some((agent, message)),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, Some(AgentKind::Fixer));
    assert!(errors[0].1.contains("model unavailable"));

    let fixer_failed = recorder.events().into_iter().any(|e| {
        matches!(
            e.data,
            RunEventData::Agent {
                agent: AgentKind::Fixer,
                status: AgentStatus::Failed,
                ..
            }
        )
    });
    assert!(fixer_failed);

    // A generator failure is not a failed fix; only the committed patch counts.
    let entry = harness
        .knowledge
        .lookup(&signature_of("timeout waiting for #submit"))
        .await
        .unwrap();
    assert_eq!((entry.success_count, entry.total_count), (1, 1));
}

#[tokio::test]
async fn test_tester_error_retries_tester() {
    let tester = FakeTester::new(|spec, call| {
        if call == 0 {
            Err(anyhow!("browser crashed"))
        } else {
            Ok(TestOutcome::passed(&spec.id))
        }
    });
    let harness = HarnessBuilder::new(tester).build().await;

    let run_id = harness.queue.submit(request(&["t1"])).unwrap();
    let recorder = Recorder::attach(&harness.events, run_id);
    let run = harness.queue.wait_for_terminal(run_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.iteration, 1);
    assert!(harness.generator.requests().is_empty());
    assert!(recorder.events().iter().any(|e| matches!(
        &e.data,
        RunEventData::Error { agent: Some(AgentKind::Tester), message, .. } if message.contains("browser crashed")
    )));
}

#[tokio::test]
async fn test_rejected_commit_counts_as_failed_fix() {
    let harness = HarnessBuilder::new(FakeTester::fails_first(1, "stale element #submit"))
        .applier(FakeApplier::rejecting())
        .build()
        .await;

    let run_id = harness.queue.submit(request(&["t1"])).unwrap();
    let run = harness.queue.wait_for_terminal(run_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.iteration, 3);
    assert!(run.patches_applied.is_empty());

    let entry = harness
        .knowledge
        .lookup(&signature_of("stale element #submit"))
        .await
        .unwrap();
    assert_eq!((entry.success_count, entry.total_count), (0, 3));
}

#[tokio::test]
async fn test_second_run_reuses_known_fix() {
    let harness = HarnessBuilder::new(FakeTester::fails_first(1, "timeout after 5000ms on #submit"))
        .build()
        .await;

    let first = harness.queue.submit(request(&["checkout"])).unwrap();
    let first = harness.queue.wait_for_terminal(first).await.unwrap();
    assert_eq!(first.status, RunStatus::Completed);
    assert!(!first.patches_applied[0].knowledge_reused);

    // Different test and timing, same normalized failure.
    let second = harness.queue.submit(request(&["login"])).unwrap();
    let recorder = Recorder::attach(&harness.events, second);
    let second = harness.queue.wait_for_terminal(second).await.unwrap();

    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.iteration, 1);
    assert!(second.patches_applied[0].knowledge_reused);

    let requests = harness.generator.requests();
    assert!(requests[0].hint.is_none());
    let hint = requests[1].hint.as_ref().expect("hint from first run");
    assert_eq!(hint.pattern_key, first.patches_applied[0].signature);
    assert!((hint.success_ratio - 1.0).abs() < f64::EPSILON);

    assert!(recorder.events().iter().any(|e| matches!(
        e.data,
        RunEventData::Patch {
            knowledge_reused: true,
            ..
        }
    )));

    let entry = harness
        .knowledge
        .get(&first.patches_applied[0].signature)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((entry.success_count, entry.total_count), (2, 2));

    let summary = harness
        .metrics
        .summary(GLOBAL_SCOPE, MetricsWindow::Day)
        .await
        .unwrap();
    assert_eq!(summary.total_runs, 2);
    assert_eq!(summary.bugs_fixed, 2);
    assert!((summary.knowledge_reuse_rate - 0.5).abs() < 1e-9);
    assert!((summary.first_try_rate - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_triage_tries_next_candidate_after_failure() {
    // Two distinct failures; whichever is tried first never verifies, so the
    // second iteration must move on to the other signature.
    let tester = FakeTester::new(|spec, _| {
        let message = if spec.id == "a" {
            "timeout waiting for #submit"
        } else {
            "element #menu not visible"
        };
        Ok(TestOutcome::failed(&spec.id, common::evidence(message)))
    });
    let harness = HarnessBuilder::new(tester).build().await;

    let run_id = harness
        .queue
        .submit(request(&["a", "b"]).with_max_iterations(2))
        .unwrap();
    let run = harness.queue.wait_for_terminal(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);

    let keys: Vec<String> = harness
        .generator
        .requests()
        .iter()
        .map(|r| r.signature.key.clone())
        .collect();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
}

#[tokio::test]
async fn test_committed_signature_is_not_retried_before_untried_one() {
    // `a` is fixed once and regresses on the next suite; `b` never passes.
    // The regression ranks higher (proven fix) but `b` has not been tried yet.
    let tester = FakeTester::new(|spec, call| {
        if spec.id == "a" {
            if call == 1 {
                Ok(TestOutcome::passed(&spec.id))
            } else {
                Ok(TestOutcome::failed(&spec.id, evidence("timeout waiting for #submit")))
            }
        } else {
            Ok(TestOutcome::failed(&spec.id, evidence("element #menu not visible")))
        }
    });
    let harness = HarnessBuilder::new(tester).build().await;

    let run_id = harness
        .queue
        .submit(request(&["a", "b"]).with_max_iterations(3))
        .unwrap();
    let run = harness.queue.wait_for_terminal(run_id).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.patches_applied.len(), 1);

    let a_key = signature_of("timeout waiting for #submit").key;
    let b_key = signature_of("element #menu not visible").key;
    let requests = harness.generator.requests();
    let keys: Vec<&str> = requests.iter().map(|r| r.signature.key.as_str()).collect();
    assert_eq!(keys, vec![a_key.as_str(), b_key.as_str(), a_key.as_str()]);
    assert_eq!(requests[1].attempt, 1);
    // Only once every candidate was tried does the proven fix come back.
    assert_eq!(requests[2].attempt, 2);
    assert!(requests[2].hint.is_some());
}

#[tokio::test]
async fn test_repo_runs_record_repo_scope_metrics() {
    let harness = HarnessBuilder::new(FakeTester::passing()).build().await;

    let run_id = harness
        .queue
        .submit(request(&["t1"]).with_repo("42", "shop"))
        .unwrap();
    harness.queue.wait_for_terminal(run_id).await.unwrap();

    let repo = harness
        .metrics
        .summary("repo:42", MetricsWindow::Day)
        .await
        .unwrap();
    assert_eq!(repo.total_runs, 1);
    assert!((repo.pass_rate - 1.0).abs() < 1e-9);

    let other = harness
        .metrics
        .summary("repo:7", MetricsWindow::Day)
        .await
        .unwrap();
    assert_eq!(other.total_runs, 0);
}
