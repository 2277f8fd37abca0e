//! Common test utilities for integration tests
//!
//! Fake collaborators for the pipeline ports, a controllable clock, and a
//! harness wiring them into a run queue backed by an in-memory database.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Semaphore;
use uuid::Uuid;

use qagent::adapters::sqlite::{
    create_migrated_test_pool, SqliteKnowledgeRepository, SqliteMetricsRepository,
};
use qagent::application::{PipelineDeps, QueueConfig, RunQueue};
use qagent::domain::models::{
    FailureEvidence, RunEvent, RunEventData, RunLimits, RunRequest, RunStatus, TestOutcome,
    TestSpec, TestStep,
};
use qagent::domain::ports::{
    ApplyResult, CandidatePatch, Clock, PatchApplier, PatchGenerator, PatchRequest, TestExecutor,
};
use qagent::services::{EventBus, KnowledgeBase, MetricsStore, Subscription};

/// Setup test logging
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll `predicate` every 10ms until it holds or `timeout_ms` elapses.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    false
}

// ---- fixtures ----------------------------------------------------------

pub fn spec(id: &str) -> TestSpec {
    TestSpec::new(id, format!("Test {id}"), format!("https://app.test/{id}"))
        .with_step(TestStep::new("navigate"))
        .with_step(TestStep::new("click").with_selector("#submit"))
}

pub fn request(ids: &[&str]) -> RunRequest {
    RunRequest::new(ids.iter().map(|id| spec(id)).collect())
}

pub fn evidence(message: &str) -> FailureEvidence {
    FailureEvidence::new("TimeoutError", message).with_selector("#submit")
}

// ---- tester -------------------------------------------------------------

type Script = Box<dyn Fn(&TestSpec, usize) -> Result<TestOutcome> + Send + Sync>;

/// Test executor driven by a script of `(spec, nth call for that spec)`.
pub struct FakeTester {
    script: Script,
    calls: StdMutex<HashMap<String, usize>>,
    total: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeTester {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&TestSpec, usize) -> Result<TestOutcome> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: StdMutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Every test always passes.
    pub fn passing() -> Self {
        Self::new(|spec, _| Ok(TestOutcome::passed(&spec.id)))
    }

    /// Every test always fails with the same evidence.
    pub fn failing(message: &'static str) -> Self {
        Self::new(move |spec, _| Ok(TestOutcome::failed(&spec.id, evidence(message))))
    }

    /// Each test fails for its first `n` executions, then passes.
    pub fn fails_first(n: usize, message: &'static str) -> Self {
        Self::new(move |spec, call| {
            if call < n {
                Ok(TestOutcome::failed(&spec.id, evidence(message)))
            } else {
                Ok(TestOutcome::passed(&spec.id))
            }
        })
    }

    /// Block every execution until [`FakeTester::open`] is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestExecutor for FakeTester {
    async fn execute(&self, spec: &TestSpec) -> Result<TestOutcome> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|e| anyhow!("gate closed: {e}"))?;
        }

        let call = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(spec.id.clone()).or_insert(0);
            let call = *entry;
            *entry += 1;
            call
        };
        self.total.fetch_add(1, Ordering::SeqCst);
        let result = (self.script)(spec, call);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---- generator ----------------------------------------------------------

/// Patch generator recording every request.
#[derive(Default)]
pub struct FakeGenerator {
    pub requests: StdMutex<Vec<PatchRequest>>,
    fail_first: AtomicUsize,
}

impl FakeGenerator {
    /// Fail the first `n` generation calls.
    pub fn failing_first(n: usize) -> Self {
        Self {
            requests: StdMutex::new(Vec::new()),
            fail_first: AtomicUsize::new(n),
        }
    }

    pub fn requests(&self) -> Vec<PatchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PatchGenerator for FakeGenerator {
    async fn generate(&self, request: &PatchRequest) -> Result<CandidatePatch> {
        self.requests.lock().unwrap().push(request.clone());
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("model unavailable"));
        }
        let description = request.hint.as_ref().map_or_else(
            || format!("Wait for {} before clicking", request.signature.error_class),
            |hint| format!("Reuse: {}", hint.fix_summary),
        );
        Ok(CandidatePatch::new(
            description,
            format!("patch://{}/{}", request.signature.key, request.attempt),
        ))
    }
}

// ---- applier ------------------------------------------------------------

/// Patch applier counting its calls.
#[derive(Default)]
pub struct FakeApplier {
    pub staged: AtomicUsize,
    pub committed: AtomicUsize,
    pub discarded: AtomicUsize,
    reject_commits: AtomicBool,
}

impl FakeApplier {
    pub fn rejecting() -> Self {
        let applier = Self::default();
        applier.reject_commits.store(true, Ordering::SeqCst);
        applier
    }
}

#[async_trait]
impl PatchApplier for FakeApplier {
    async fn stage(&self, _patch: &CandidatePatch) -> Result<()> {
        self.staged.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self, patch: &CandidatePatch) -> Result<ApplyResult> {
        if self.reject_commits.load(Ordering::SeqCst) {
            return Ok(ApplyResult::rejected());
        }
        let n = self.committed.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ApplyResult::committed(format!("commit-{n}-{}", patch.id)))
    }

    async fn discard(&self, _patch: &CandidatePatch) -> Result<()> {
        self.discarded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---- clock --------------------------------------------------------------

/// Manually advanced clock.
pub struct FixedClock {
    now: StdMutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(y: i32, m: u32, d: u32) -> Self {
        Self {
            now: StdMutex::new(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance_days(&self, days: i64) {
        *self.now.lock().unwrap() += Duration::days(days);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ---- harness ------------------------------------------------------------

pub struct Harness {
    pub queue: RunQueue,
    pub events: EventBus,
    pub knowledge: KnowledgeBase,
    pub metrics: MetricsStore,
    pub tester: Arc<FakeTester>,
    pub generator: Arc<FakeGenerator>,
    pub applier: Arc<FakeApplier>,
}

pub struct HarnessBuilder {
    tester: FakeTester,
    generator: FakeGenerator,
    applier: FakeApplier,
    max_concurrent_runs: usize,
    knowledge: Option<KnowledgeBase>,
}

impl HarnessBuilder {
    pub fn new(tester: FakeTester) -> Self {
        Self {
            tester,
            generator: FakeGenerator::default(),
            applier: FakeApplier::default(),
            max_concurrent_runs: 2,
            knowledge: None,
        }
    }

    pub fn generator(mut self, generator: FakeGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn applier(mut self, applier: FakeApplier) -> Self {
        self.applier = applier;
        self
    }

    pub fn max_concurrent_runs(mut self, n: usize) -> Self {
        self.max_concurrent_runs = n;
        self
    }

    /// Share a knowledge base with another harness.
    pub fn knowledge(mut self, knowledge: KnowledgeBase) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub async fn build(self) -> Harness {
        let pool = create_migrated_test_pool().await.expect("test pool");
        let knowledge = self
            .knowledge
            .unwrap_or_else(|| KnowledgeBase::new(Arc::new(SqliteKnowledgeRepository::new(pool.clone()))));
        let metrics = MetricsStore::new(Arc::new(SqliteMetricsRepository::new(pool)));
        let events = EventBus::new();
        let tester = Arc::new(self.tester);
        let generator = Arc::new(self.generator);
        let applier = Arc::new(self.applier);

        let deps = PipelineDeps {
            tester: tester.clone(),
            generator: generator.clone(),
            applier: applier.clone(),
            knowledge: knowledge.clone(),
            metrics: metrics.clone(),
            events: events.clone(),
        };
        let queue = RunQueue::new(
            QueueConfig {
                max_concurrent_runs: self.max_concurrent_runs,
                limits: RunLimits::default(),
            },
            deps,
        );

        Harness {
            queue,
            events,
            knowledge,
            metrics,
            tester,
            generator,
            applier,
        }
    }
}

/// Collects every event delivered to a subscription.
pub struct Recorder {
    events: Arc<StdMutex<Vec<RunEvent>>>,
    _subscription: Subscription,
}

impl Recorder {
    pub fn attach(bus: &EventBus, run_id: Uuid) -> Self {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = bus.subscribe(run_id, move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        Self {
            events,
            _subscription: subscription,
        }
    }

    /// Submit `request` with a recorder attached before the `queued` event.
    pub fn submit(queue: &RunQueue, request: RunRequest) -> (Uuid, Self) {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let (run_id, subscription) = queue
            .submit_with_subscriber(request, move |event| {
                sink.lock().unwrap().push(event.clone());
            })
            .expect("valid request");
        (
            run_id,
            Self {
                events,
                _subscription: subscription,
            },
        )
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Statuses carried by `status` events, in order.
    pub fn statuses(&self) -> Vec<RunStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.data {
                RunEventData::Status { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn types(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e.event_type().as_str().to_string())
            .collect()
    }
}
