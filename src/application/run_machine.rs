//! Per-run state machine driving the agent pipeline.
//!
//! Tester → Triage → Fixer → Verifier, looping under an iteration budget.
//! Collaborator errors never escape a stage: they become an `error` event, a
//! failed stage, and consume an iteration like a rejected patch. Only broken
//! run invariants end the run early (as `failed`).

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    repo_scope, AgentKind, AgentStatus, AppliedPatch, FailureEvidence, FailureSignature,
    FixOutcome, KnowledgeEntry, Run, RunEvent, RunEventData, RunOutcome, RunStatus, TestFailure,
    TestOutcome, TestScope, TestSpec, GLOBAL_SCOPE,
};
use crate::domain::ports::{
    CandidatePatch, KnowledgeHint, PatchApplier, PatchGenerator, PatchRequest, TestExecutor,
};
use crate::services::{EventBus, KnowledgeBase, MetricsStore};

/// Weight of the knowledge base success ratio in a candidate's confidence.
const KNOWLEDGE_WEIGHT: f64 = 0.7;
/// Weight of the share of failing tests a candidate explains.
const COVERAGE_WEIGHT: f64 = 0.3;

/// A run shared between its state machine (sole writer) and readers.
pub type SharedRun = Arc<RwLock<Run>>;

/// Services and collaborators a run needs.
#[derive(Clone)]
pub struct PipelineDeps {
    pub tester: Arc<dyn TestExecutor>,
    pub generator: Arc<dyn PatchGenerator>,
    pub applier: Arc<dyn PatchApplier>,
    pub knowledge: KnowledgeBase,
    pub metrics: MetricsStore,
    pub events: EventBus,
}

/// A probable cause for the current failures.
#[derive(Debug, Clone)]
struct Candidate {
    signature: FailureSignature,
    evidence: FailureEvidence,
    affected_tests: Vec<String>,
    entry: Option<KnowledgeEntry>,
    confidence: f64,
}

impl Candidate {
    fn success_ratio(&self) -> f64 {
        self.entry.as_ref().map_or(0.0, KnowledgeEntry::success_ratio)
    }

    /// Highest confidence first, then most recently useful, then best ratio.
    fn rank(a: &Self, b: &Self) -> Ordering {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| {
                let a_used = a.entry.as_ref().and_then(|e| e.last_used_at);
                let b_used = b.entry.as_ref().and_then(|e| e.last_used_at);
                b_used.cmp(&a_used)
            })
            .then_with(|| b.success_ratio().total_cmp(&a.success_ratio()))
    }
}

#[derive(Debug, Clone)]
struct Diagnosis {
    candidate: Candidate,
    attempt: u32,
    hint: Option<KnowledgeHint>,
}

enum Step {
    Test { confirming: bool },
    Triage { failures: Vec<TestFailure> },
    Fix { failures: Vec<TestFailure>, diagnosis: Diagnosis },
    Verify { failures: Vec<TestFailure>, diagnosis: Diagnosis, patch: CandidatePatch },
    Finish(RunStatus),
}

/// Drives one run from `queued` to a terminal status.
pub struct RunStateMachine {
    run: SharedRun,
    run_id: Uuid,
    deps: PipelineDeps,
    cancel: CancellationToken,
    /// Attempts per signature over the whole run.
    attempts: HashMap<String, u32>,
    /// Signatures already handed to the Fixer in this run.
    tried: HashSet<String>,
}

impl RunStateMachine {
    pub fn new(run: SharedRun, run_id: Uuid, deps: PipelineDeps, cancel: CancellationToken) -> Self {
        Self {
            run,
            run_id,
            deps,
            cancel,
            attempts: HashMap::new(),
            tried: HashSet::new(),
        }
    }

    /// Execute the pipeline to completion and return the final run snapshot.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(mut self) -> Run {
        let decided = match self.start().await {
            Ok(()) => self.drive().await,
            Err(err) => Err(err),
        };

        let status = match decided {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "run aborted");
                let iteration = self.iteration().await;
                self.run.write().await.error = Some(err.to_string());
                self.emit(RunEventData::Error {
                    agent: None,
                    message: err.to_string(),
                    iteration,
                });
                RunStatus::Failed
            }
        };

        self.finish(status).await
    }

    async fn start(&self) -> DomainResult<()> {
        let iteration = {
            let mut run = self.run.write().await;
            run.transition_to(RunStatus::Running)?;
            run.iteration
        };
        info!("run started");
        self.emit(RunEventData::Status {
            status: RunStatus::Running,
            iteration,
            reason: None,
        });
        Ok(())
    }

    async fn drive(&mut self) -> DomainResult<RunStatus> {
        let mut step = Step::Test { confirming: false };
        loop {
            if let Step::Finish(status) = step {
                return Ok(status);
            }
            if self.cancel.is_cancelled() {
                return Ok(RunStatus::Cancelled);
            }
            step = match step {
                Step::Test { confirming } => self.test(confirming).await?,
                Step::Triage { failures } => self.triage(failures).await?,
                Step::Fix { failures, diagnosis } => self.fix(failures, diagnosis).await?,
                Step::Verify {
                    failures,
                    diagnosis,
                    patch,
                } => self.verify(failures, diagnosis, patch).await?,
                Step::Finish(status) => Step::Finish(status),
            };
        }
    }

    // ---- stages -------------------------------------------------------

    async fn test(&mut self, confirming: bool) -> DomainResult<Step> {
        let iteration = self.enter(AgentKind::Tester).await;
        let specs: Vec<TestSpec> = self.run.read().await.test_specs().to_vec();

        let mut results = Vec::with_capacity(specs.len());
        for spec in &specs {
            match self.deps.tester.execute(spec).await {
                Ok(outcome) => results.push(outcome),
                Err(err) => {
                    let err = DomainError::stage(AgentKind::Tester, &err);
                    if confirming {
                        self.report_stage_error(AgentKind::Tester, &err, iteration);
                        return Ok(Step::Finish(RunStatus::Failed));
                    }
                    return self.stage_failed(AgentKind::Tester, &err, None).await;
                }
            }
        }

        let total = count(specs.len());
        let passed = count(results.iter().filter(|r| r.passed).count());
        self.run.write().await.record_suite_result(total, passed)?;

        self.emit(RunEventData::Test {
            scope: TestScope::Suite,
            iteration,
            passed,
            total,
            results: results.clone(),
        });
        self.leave(
            AgentKind::Tester,
            AgentStatus::Completed,
            iteration,
            Some(format!("{passed}/{total} passed")),
        );

        if passed == total {
            return Ok(Step::Finish(RunStatus::Completed));
        }
        if confirming {
            return Ok(Step::Finish(RunStatus::Failed));
        }

        let failures = results.iter().filter_map(TestFailure::from_outcome).collect();
        Ok(Step::Triage { failures })
    }

    async fn triage(&mut self, failures: Vec<TestFailure>) -> DomainResult<Step> {
        let iteration = self.enter(AgentKind::Triage).await;

        let mut candidates = self.candidates(&failures).await;
        if candidates.is_empty() {
            let err = DomainError::StageExecution {
                agent: AgentKind::Triage,
                message: "no failure evidence to triage".to_string(),
            };
            return self.stage_failed(AgentKind::Triage, &err, None).await;
        }
        candidates.sort_by(Candidate::rank);

        let total = candidates.len();
        let index = candidates
            .iter()
            .position(|c| !self.tried.contains(&c.signature.key))
            .unwrap_or(0);
        let candidate = candidates.swap_remove(index);

        let attempt = {
            let attempts = self.attempts.entry(candidate.signature.key.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        };
        let hint = candidate
            .entry
            .as_ref()
            .filter(|e| e.has_proven_fix())
            .and_then(|e| {
                e.fix_summary.clone().map(|fix_summary| KnowledgeHint {
                    pattern_key: e.pattern_key.clone(),
                    fix_summary,
                    success_ratio: e.success_ratio(),
                })
            });

        debug!(
            pattern_key = %candidate.signature.key,
            confidence = candidate.confidence,
            attempt,
            known_fix = hint.is_some(),
            "triage selected candidate"
        );
        self.leave(
            AgentKind::Triage,
            AgentStatus::Completed,
            iteration,
            Some(format!(
                "{} ({} of {total} candidates, confidence {:.2})",
                candidate.signature.description,
                index + 1,
                candidate.confidence
            )),
        );

        Ok(Step::Fix {
            failures,
            diagnosis: Diagnosis {
                candidate,
                attempt,
                hint,
            },
        })
    }

    async fn fix(&mut self, failures: Vec<TestFailure>, diagnosis: Diagnosis) -> DomainResult<Step> {
        let iteration = self.enter(AgentKind::Fixer).await;
        let candidate = &diagnosis.candidate;

        let request = PatchRequest {
            run_id: self.run_id,
            iteration,
            attempt: diagnosis.attempt,
            signature: candidate.signature.clone(),
            evidence: candidate.evidence.clone(),
            affected_tests: candidate.affected_tests.clone(),
            hint: diagnosis.hint.clone(),
        };

        match self.deps.generator.generate(&request).await {
            Ok(patch) => {
                self.emit(RunEventData::Patch {
                    patch_id: patch.id,
                    signature: candidate.signature.key.clone(),
                    description: patch.description.clone(),
                    knowledge_reused: diagnosis.hint.is_some(),
                    attempt: diagnosis.attempt,
                    iteration,
                });
                self.leave(AgentKind::Fixer, AgentStatus::Completed, iteration, None);
                Ok(Step::Verify {
                    failures,
                    diagnosis,
                    patch,
                })
            }
            Err(err) => {
                self.tried.insert(candidate.signature.key.clone());
                let err = DomainError::stage(AgentKind::Fixer, &err);
                self.stage_failed(AgentKind::Fixer, &err, Some(failures)).await
            }
        }
    }

    async fn verify(
        &mut self,
        failures: Vec<TestFailure>,
        diagnosis: Diagnosis,
        patch: CandidatePatch,
    ) -> DomainResult<Step> {
        let iteration = self.enter(AgentKind::Verifier).await;
        let signature = diagnosis.candidate.signature.clone();
        self.tried.insert(signature.key.clone());

        let affected: Vec<TestSpec> = {
            let mut run = self.run.write().await;
            run.fix_attempts += 1;
            run.test_specs()
                .iter()
                .filter(|spec| diagnosis.candidate.affected_tests.contains(&spec.id))
                .cloned()
                .collect()
        };

        if let Err(err) = self.deps.applier.stage(&patch).await {
            let err = DomainError::stage(AgentKind::Verifier, &err);
            return self.stage_failed(AgentKind::Verifier, &err, Some(failures)).await;
        }

        let mut results: Vec<TestOutcome> = Vec::with_capacity(affected.len());
        for spec in &affected {
            match self.deps.tester.execute(spec).await {
                Ok(outcome) => results.push(outcome),
                Err(err) => {
                    self.discard(&patch).await;
                    let err = DomainError::stage(AgentKind::Verifier, &err);
                    return self.stage_failed(AgentKind::Verifier, &err, Some(failures)).await;
                }
            }
        }

        let passed = count(results.iter().filter(|r| r.passed).count());
        let total = count(results.len());
        self.emit(RunEventData::Test {
            scope: TestScope::Verification,
            iteration,
            passed,
            total,
            results,
        });

        if total == 0 || passed < total {
            self.discard(&patch).await;
            self.record_knowledge(&signature, FixOutcome::Failure, None, iteration).await;
            self.leave(
                AgentKind::Verifier,
                AgentStatus::Failed,
                iteration,
                Some(format!("patch rejected: {passed}/{total} affected tests passed")),
            );
            return self.after_unsuccessful_attempt(Some(failures)).await;
        }

        let applied = match self.deps.applier.commit(&patch).await {
            Ok(result) => result,
            Err(err) => {
                self.discard(&patch).await;
                let err = DomainError::stage(AgentKind::Verifier, &err);
                return self.stage_failed(AgentKind::Verifier, &err, Some(failures)).await;
            }
        };

        if !applied.committed {
            self.discard(&patch).await;
            self.record_knowledge(&signature, FixOutcome::Failure, None, iteration).await;
            self.leave(
                AgentKind::Verifier,
                AgentStatus::Failed,
                iteration,
                Some("patch verified but commit was rejected".to_string()),
            );
            return self.after_unsuccessful_attempt(Some(failures)).await;
        }

        self.run.write().await.patches_applied.push(AppliedPatch {
            patch_id: patch.id,
            signature: signature.key.clone(),
            description: patch.description.clone(),
            content_ref: patch.content_ref.clone(),
            iteration,
            knowledge_reused: diagnosis.hint.is_some(),
            commit_ref: applied.commit_ref,
            applied_at: chrono::Utc::now(),
        });
        self.record_knowledge(
            &signature,
            FixOutcome::Success,
            Some(patch.description.as_str()),
            iteration,
        )
        .await;
        self.leave(
            AgentKind::Verifier,
            AgentStatus::Completed,
            iteration,
            Some("patch committed".to_string()),
        );
        info!(pattern_key = %signature.key, iteration, "patch committed");

        self.after_commit().await
    }

    // ---- iteration control ---------------------------------------------

    async fn after_commit(&self) -> DomainResult<Step> {
        let mut run = self.run.write().await;
        run.advance_iteration()?;
        Ok(Step::Test {
            confirming: run.iterations_exhausted(),
        })
    }

    async fn after_unsuccessful_attempt(&self, failures: Option<Vec<TestFailure>>) -> DomainResult<Step> {
        let exhausted = {
            let mut run = self.run.write().await;
            run.advance_iteration()?;
            run.iterations_exhausted()
        };
        if exhausted {
            return Ok(Step::Finish(RunStatus::Failed));
        }
        Ok(match failures {
            Some(failures) if !failures.is_empty() => Step::Triage { failures },
            _ => Step::Test { confirming: false },
        })
    }

    async fn stage_failed(
        &self,
        agent: AgentKind,
        err: &DomainError,
        failures: Option<Vec<TestFailure>>,
    ) -> DomainResult<Step> {
        let iteration = self.iteration().await;
        self.report_stage_error(agent, err, iteration);
        self.after_unsuccessful_attempt(failures).await
    }

    fn report_stage_error(&self, agent: AgentKind, err: &DomainError, iteration: u32) {
        warn!(%agent, iteration, error = %err, "stage failed");
        self.emit(RunEventData::Error {
            agent: Some(agent),
            message: err.to_string(),
            iteration,
        });
        self.leave(agent, AgentStatus::Failed, iteration, Some(err.to_string()));
    }

    // ---- helpers --------------------------------------------------------

    /// Group failures by signature and look each one up.
    async fn candidates(&self, failures: &[TestFailure]) -> Vec<Candidate> {
        let mut grouped: Vec<Candidate> = Vec::new();
        for failure in failures {
            let signature = FailureSignature::from_evidence(&failure.evidence);
            if let Some(existing) = grouped.iter_mut().find(|c| c.signature.key == signature.key) {
                existing.affected_tests.push(failure.test_id.clone());
            } else {
                grouped.push(Candidate {
                    signature,
                    evidence: failure.evidence.clone(),
                    affected_tests: vec![failure.test_id.clone()],
                    entry: None,
                    confidence: 0.0,
                });
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let failing = failures.len().max(1) as f64;
        for candidate in &mut grouped {
            candidate.entry = self.deps.knowledge.lookup(&candidate.signature).await;
            #[allow(clippy::cast_precision_loss)]
            let coverage = candidate.affected_tests.len() as f64 / failing;
            candidate.confidence = KNOWLEDGE_WEIGHT * candidate.success_ratio() + COVERAGE_WEIGHT * coverage;
        }
        grouped
    }

    async fn record_knowledge(
        &self,
        signature: &FailureSignature,
        outcome: FixOutcome,
        fix_summary: Option<&str>,
        iteration: u32,
    ) {
        if let Err(err) = self
            .deps
            .knowledge
            .record_outcome(signature, outcome, fix_summary)
            .await
        {
            self.emit(RunEventData::Error {
                agent: Some(AgentKind::Verifier),
                message: format!("failed to record knowledge for {}: {err}", signature.key),
                iteration,
            });
        }
    }

    async fn discard(&self, patch: &CandidatePatch) {
        if let Err(err) = self.deps.applier.discard(patch).await {
            warn!(patch_id = %patch.id, error = %err, "failed to discard staged patch");
        }
    }

    async fn finish(self, decided: RunStatus) -> Run {
        let (snapshot, status) = {
            let mut run = self.run.write().await;
            // Cancellation wins over any outcome decided after it was requested.
            let status = if self.cancel.is_cancelled() {
                RunStatus::Cancelled
            } else {
                decided
            };
            if let Err(err) = run.transition_to(status) {
                warn!(error = %err, "could not record terminal status");
            }
            (run.clone(), run.status)
        };

        info!(status = %status, iteration = snapshot.iteration, "run finished");
        self.emit(RunEventData::Status {
            status,
            iteration: snapshot.iteration,
            reason: snapshot.error.clone(),
        });

        record_metrics(&self.deps, &snapshot).await;
        self.deps.events.emit(&complete_event(&snapshot));
        snapshot
    }

    async fn enter(&self, agent: AgentKind) -> u32 {
        let iteration = {
            let mut run = self.run.write().await;
            run.current_agent = Some(agent);
            run.iteration
        };
        self.emit(RunEventData::Agent {
            agent,
            status: AgentStatus::Running,
            iteration,
            detail: None,
        });
        iteration
    }

    fn leave(&self, agent: AgentKind, status: AgentStatus, iteration: u32, detail: Option<String>) {
        self.emit(RunEventData::Agent {
            agent,
            status,
            iteration,
            detail,
        });
    }

    async fn iteration(&self) -> u32 {
        self.run.read().await.iteration
    }

    fn emit(&self, data: RunEventData) {
        self.deps.events.emit(&RunEvent::new(self.run_id, data));
    }
}

/// Fold a terminal run into the global and per-repository metrics.
/// Write failures surface as `error` events on the run.
pub(crate) async fn record_metrics(deps: &PipelineDeps, run: &Run) {
    let outcome = RunOutcome::from_run(run);
    let mut scopes = vec![GLOBAL_SCOPE.to_string()];
    if let Some(repo_id) = &run.repo_id {
        scopes.push(repo_scope(repo_id));
    }
    for scope in &scopes {
        if let Err(err) = deps.metrics.record_run(scope, &outcome).await {
            deps.events.emit(&RunEvent::new(
                run.id,
                RunEventData::Error {
                    agent: None,
                    message: format!("failed to record metrics for {scope}: {err}"),
                    iteration: run.iteration,
                },
            ));
        }
    }
}

pub(crate) fn complete_event(run: &Run) -> RunEvent {
    RunEvent::new(
        run.id,
        RunEventData::Complete {
            status: run.status,
            iteration: run.iteration,
            tests_passed: run.tests_passed,
            tests_total: run.tests_total,
            patches_applied: run.patches_applied.len(),
        },
    )
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
