//! Run queue with FIFO admission under a concurrency cap.
//!
//! The queue owns every in-memory run. Admission is the only place the
//! concurrency limit is enforced: while fewer than `max_concurrent_runs`
//! machines are active, the oldest queued run is handed to a new
//! [`RunStateMachine`] on its own task. A machine task that panics marks its
//! run failed and releases the slot; siblings are unaffected.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::run_machine::{complete_event, record_metrics, PipelineDeps, RunStateMachine, SharedRun};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, Run, RunEvent, RunEventData, RunLimits, RunRequest, RunStatus, RunSummary,
};
use crate::services::{RunEventStream, Subscription};

/// Queue sizing and run limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_concurrent_runs: usize,
    pub limits: RunLimits,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 2,
            limits: RunLimits::default(),
        }
    }
}

impl From<&Config> for QueueConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent_runs: config.max_concurrent_runs,
            limits: config.run_limits(),
        }
    }
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Queued runs not yet admitted.
    pub pending: usize,
    /// Runs with an active state machine.
    pub processing: usize,
    /// Running runs then queued runs, each in arrival order.
    pub items: Vec<RunSummary>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Uuid>,
    running: Vec<(Uuid, CancellationToken)>,
    runs: HashMap<Uuid, SharedRun>,
}

impl QueueState {
    fn is_active(&self, run_id: Uuid) -> bool {
        self.pending.contains(&run_id) || self.running.iter().any(|(id, _)| *id == run_id)
    }
}

struct QueueInner {
    config: QueueConfig,
    deps: PipelineDeps,
    state: Mutex<QueueState>,
    settled: Notify,
}

/// Accepts run requests and drives them through the pipeline.
#[derive(Clone)]
pub struct RunQueue {
    inner: Arc<QueueInner>,
}

impl RunQueue {
    pub fn new(config: QueueConfig, deps: PipelineDeps) -> Self {
        let config = QueueConfig {
            max_concurrent_runs: config.max_concurrent_runs.max(1),
            ..config
        };
        Self {
            inner: Arc::new(QueueInner {
                config,
                deps,
                state: Mutex::new(QueueState::default()),
                settled: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and enqueue a run. Returns as soon as the run is queued.
    #[instrument(skip(self, request), fields(specs = request.test_specs.len()), err)]
    pub fn submit(&self, request: RunRequest) -> DomainResult<Uuid> {
        self.enqueue(request, |_| ()).map(|(run_id, ())| run_id)
    }

    /// Like [`RunQueue::submit`], registering `callback` before the run's
    /// first event so it observes the whole lifecycle from `queued`.
    #[instrument(skip(self, request, callback), fields(specs = request.test_specs.len()), err)]
    pub fn submit_with_subscriber<F>(
        &self,
        request: RunRequest,
        callback: F,
    ) -> DomainResult<(Uuid, Subscription)>
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        self.enqueue(request, |run_id| self.inner.deps.events.subscribe(run_id, callback))
    }

    /// Like [`RunQueue::submit`], returning a stream that starts at `queued`.
    #[instrument(skip(self, request), fields(specs = request.test_specs.len()), err)]
    pub fn submit_with_stream(&self, request: RunRequest) -> DomainResult<(Uuid, RunEventStream)> {
        self.enqueue(request, |run_id| self.inner.deps.events.stream(run_id))
    }

    /// Validate, run `attach` with the new id, then emit `status(queued)` and admit.
    fn enqueue<T>(&self, request: RunRequest, attach: impl FnOnce(Uuid) -> T) -> DomainResult<(Uuid, T)> {
        request.validate(&self.inner.config.limits)?;

        let run = Run::from_request(request, &self.inner.config.limits);
        let run_id = run.id;
        let attached = attach(run_id);
        self.emit(
            run_id,
            RunEventData::Status {
                status: RunStatus::Queued,
                iteration: 0,
                reason: None,
            },
        );

        {
            let mut state = self.state();
            state.runs.insert(run_id, Arc::new(RwLock::new(run)));
            state.pending.push_back(run_id);
        }
        info!(%run_id, "run queued");

        self.admit();
        Ok((run_id, attached))
    }

    /// Pending and processing counts with summaries of active runs.
    pub async fn status(&self) -> QueueStatus {
        let (pending, processing, active) = {
            let state = self.state();
            let active: Vec<SharedRun> = state
                .running
                .iter()
                .map(|(id, _)| id)
                .chain(state.pending.iter())
                .filter_map(|id| state.runs.get(id).cloned())
                .collect();
            (state.pending.len(), state.running.len(), active)
        };

        let mut items = Vec::with_capacity(active.len());
        for run in active {
            items.push(run.read().await.summary());
        }
        QueueStatus {
            pending,
            processing,
            items,
        }
    }

    /// Current snapshot of a run.
    pub async fn get(&self, run_id: Uuid) -> DomainResult<Run> {
        let run = self.handle(run_id)?;
        let snapshot = run.read().await.clone();
        Ok(snapshot)
    }

    /// Cancel a queued or running run.
    ///
    /// Queued runs are dropped from the queue immediately. Running runs stop
    /// at the next stage boundary and end `cancelled`.
    #[instrument(skip(self), err)]
    pub async fn cancel(&self, run_id: Uuid) -> DomainResult<()> {
        enum Found {
            Queued(SharedRun),
            Running(SharedRun, CancellationToken),
            Inactive(SharedRun),
        }

        let found = {
            let mut state = self.state();
            let run = state
                .runs
                .get(&run_id)
                .cloned()
                .ok_or(DomainError::RunNotFound(run_id))?;
            if let Some(position) = state.pending.iter().position(|id| *id == run_id) {
                state.pending.remove(position);
                Found::Queued(run)
            } else if let Some((_, token)) = state.running.iter().find(|(id, _)| *id == run_id) {
                Found::Running(run, token.clone())
            } else {
                Found::Inactive(run)
            }
        };

        match found {
            Found::Queued(run) => {
                let snapshot = {
                    let mut run = run.write().await;
                    run.transition_to(RunStatus::Cancelled)?;
                    run.clone()
                };
                info!(%run_id, "queued run cancelled");
                self.emit(
                    run_id,
                    RunEventData::Status {
                        status: RunStatus::Cancelled,
                        iteration: snapshot.iteration,
                        reason: Some("cancelled before admission".to_string()),
                    },
                );
                self.inner.deps.events.emit(&complete_event(&snapshot));
                self.inner.settled.notify_waiters();
                Ok(())
            }
            Found::Running(run, token) => {
                // Holding the read lock orders this against the machine's final write.
                let run = run.read().await;
                if run.is_terminal() {
                    return Err(not_cancellable(&run));
                }
                token.cancel();
                info!(%run_id, "cancellation requested");
                Ok(())
            }
            Found::Inactive(run) => Err(not_cancellable(&*run.read().await)),
        }
    }

    /// Register a callback for a run's events.
    pub fn subscribe<F>(&self, run_id: Uuid, callback: F) -> Subscription
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        self.inner.deps.events.subscribe(run_id, callback)
    }

    /// Live event stream for a run; ends after its `complete` event.
    ///
    /// A run that is already terminal yields an empty, finished stream.
    pub async fn events(&self, run_id: Uuid) -> DomainResult<RunEventStream> {
        let run = self.handle(run_id)?;
        // Subscribe before reading the status so a completion racing with
        // this call is either seen here or delivered to the stream.
        let stream = self.inner.deps.events.stream(run_id);
        if run.read().await.is_terminal() {
            debug!(%run_id, "event stream requested for finished run");
            return Ok(RunEventStream::finished());
        }
        Ok(stream)
    }

    /// Drop a finished run from memory.
    pub fn evict(&self, run_id: Uuid) -> DomainResult<Run> {
        let mut state = self.state();
        if state.is_active(run_id) {
            return Err(DomainError::Validation(format!("run {run_id} is still active")));
        }
        let run = state
            .runs
            .get(&run_id)
            .ok_or(DomainError::RunNotFound(run_id))?;
        let snapshot = run
            .try_read()
            .map_err(|_| DomainError::Validation(format!("run {run_id} is busy")))?
            .clone();
        if !snapshot.is_terminal() {
            return Err(DomainError::Validation(format!("run {run_id} is still active")));
        }
        state.runs.remove(&run_id);
        debug!(%run_id, "run evicted");
        Ok(snapshot)
    }

    /// Wait until a run is terminal and its machine has released its slot.
    pub async fn wait_for_terminal(&self, run_id: Uuid) -> DomainResult<Run> {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (run, active) = {
                let state = self.state();
                let run = state
                    .runs
                    .get(&run_id)
                    .cloned()
                    .ok_or(DomainError::RunNotFound(run_id))?;
                (run, state.is_active(run_id))
            };
            if !active {
                let snapshot = run.read().await.clone();
                if snapshot.is_terminal() {
                    return Ok(snapshot);
                }
            }
            notified.await;
        }
    }

    fn handle(&self, run_id: Uuid) -> DomainResult<SharedRun> {
        self.state()
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(DomainError::RunNotFound(run_id))
    }

    /// Start machines for queued runs while slots are free.
    fn admit(&self) {
        let admitted: Vec<(Uuid, SharedRun, CancellationToken)> = {
            let mut state = self.state();
            let mut admitted = Vec::new();
            while state.running.len() < self.inner.config.max_concurrent_runs {
                let Some(run_id) = state.pending.pop_front() else {
                    break;
                };
                let Some(run) = state.runs.get(&run_id).cloned() else {
                    continue;
                };
                let token = CancellationToken::new();
                state.running.push((run_id, token.clone()));
                admitted.push((run_id, run, token));
            }
            admitted
        };

        for (run_id, run, token) in admitted {
            debug!(%run_id, "run admitted");
            self.spawn_machine(run_id, run, token);
        }
    }

    fn spawn_machine(&self, run_id: Uuid, run: SharedRun, token: CancellationToken) {
        let queue = self.clone();
        let machine = RunStateMachine::new(Arc::clone(&run), run_id, self.inner.deps.clone(), token);

        tokio::spawn(async move {
            let handle = tokio::spawn(machine.run());
            if let Err(join_error) = handle.await {
                error!(%run_id, error = %join_error, "run state machine crashed");
                queue.fail_crashed(&run, &join_error.to_string()).await;
            }
            queue.release(run_id);
        });
    }

    /// Mark a run whose machine task died as failed and end its event stream.
    async fn fail_crashed(&self, run: &SharedRun, reason: &str) {
        let message = format!("run state machine crashed: {reason}");
        let (snapshot, newly_failed) = {
            let mut run = run.write().await;
            if run.is_terminal() {
                (run.clone(), false)
            } else {
                if run.status == RunStatus::Queued {
                    let _ = run.transition_to(RunStatus::Running);
                }
                run.error = Some(message.clone());
                if let Err(err) = run.transition_to(RunStatus::Failed) {
                    error!(error = %err, "could not mark crashed run failed");
                }
                (run.clone(), true)
            }
        };

        if newly_failed {
            self.emit(
                snapshot.id,
                RunEventData::Error {
                    agent: None,
                    message,
                    iteration: snapshot.iteration,
                },
            );
            self.emit(
                snapshot.id,
                RunEventData::Status {
                    status: snapshot.status,
                    iteration: snapshot.iteration,
                    reason: snapshot.error.clone(),
                },
            );
            record_metrics(&self.inner.deps, &snapshot).await;
        }
        self.inner.deps.events.emit(&complete_event(&snapshot));
    }

    fn release(&self, run_id: Uuid) {
        self.state().running.retain(|(id, _)| *id != run_id);
        self.inner.settled.notify_waiters();
        self.admit();
    }

    fn emit(&self, run_id: Uuid, data: RunEventData) {
        self.inner.deps.events.emit(&RunEvent::new(run_id, data));
    }
}

fn not_cancellable(run: &Run) -> DomainError {
    DomainError::NotCancellable {
        id: run.id,
        status: run.status.as_str().to_string(),
    }
}
