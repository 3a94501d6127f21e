//! The perceive -> decide -> act -> verify loop.
//!
//! Each iteration re-extracts from scratch: marker mappings are only ever
//! valid for the snapshot they were made from, so after any action (or any
//! failure) the previous mapping is discarded and never consulted again.
//! Recoverable conditions (resolution misses, malformed decisions,
//! unverified actions) are retried inside the loop against a consecutive-
//! failure budget; only exhausted budgets and explicit aborts terminate
//! the run.

use crate::annotate::Annotator;
use crate::backend::PageBackend;
use crate::config::WorkflowSection;
use crate::extract::Extractor;
use crate::oracle::{DecisionOracle, DecisionRequest, HistoryEntry};
use crate::resolve::Resolver;
use crate::score::DefaultPriority;
use crate::sink::{NullSink, TraceSink};
use marq_common::error::{BackendError, OracleError, WorkflowError};
use marq_common::protocol::{
    ActionDecision, ActionKind, InteractiveElement, MarkerMapping, PageState, ResolutionResult,
    ResolutionStatus, TaskSpec,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Scroll step used when the oracle asks to scroll, in CSS pixels.
const SCROLL_STEP: i64 = 600;

/// Loop phase, recorded for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Extracting,
    Annotated,
    AwaitingDecision,
    Resolving,
    Verifying,
    Retrying,
    Done,
    Aborted,
}

/// Everything that happened in one loop iteration. Populated as far as the
/// iteration got, so failure paths still leave a complete trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationTrace {
    pub index: u32,
    pub page: PageState,
    pub marker_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<ActionDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionResult>,
    /// Whether the action produced an observable page change. Absent for
    /// non-element actions and failed resolutions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted,
}

/// Final report of one task run, including the full iteration history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub task: String,
    pub app: String,
    pub status: RunStatus,
    /// Terminal failure description when the run did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub steps_completed: u32,
    pub iterations: Vec<IterationTrace>,
}

impl RunReport {
    pub fn completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

pub struct WorkflowEngine {
    extractor: Extractor,
    annotator: Annotator,
    resolver: Resolver,
    oracle: Arc<dyn DecisionOracle>,
    sink: Arc<dyn TraceSink>,
    config: WorkflowSection,
    cancel: watch::Receiver<bool>,
}

impl WorkflowEngine {
    pub fn new(oracle: Arc<dyn DecisionOracle>, config: WorkflowSection) -> Self {
        let resolver = Resolver {
            pixel_tolerance: config.pixel_tolerance,
            action_timeout: Duration::from_millis(config.action_timeout_ms),
        };
        let (_, cancel) = watch::channel(false);
        Self {
            extractor: Extractor::new(Arc::new(DefaultPriority)),
            annotator: Annotator::new(),
            resolver,
            oracle,
            sink: Arc::new(NullSink),
            config,
            cancel,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Attach a cancellation signal. Flipping the channel to `true` stops
    /// the run at the next iteration boundary.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one task to completion. Terminal failures are folded into the
    /// report rather than returned as errors, so callers always get the
    /// full iteration history; the error channel is reserved for sink I/O.
    pub async fn run<B: PageBackend + ?Sized>(
        &self,
        backend: &mut B,
        spec: &TaskSpec,
        start_url: &str,
    ) -> std::io::Result<RunReport> {
        let mut ctx = RunContext::default();

        info!(task = %spec.task, app = %spec.app, url = start_url, "starting run");
        let outcome = self.drive(backend, spec, start_url, &mut ctx).await;

        let (status, failure) = match outcome {
            Ok(()) => (RunStatus::Completed, None),
            Err(e) => {
                warn!(error = %e, "run aborted");
                (RunStatus::Aborted, Some(e.to_string()))
            }
        };

        let report = RunReport {
            task: spec.task.clone(),
            app: spec.app.clone(),
            status,
            failure,
            steps_completed: ctx.steps_completed,
            iterations: ctx.traces,
        };
        self.sink.record_summary(&report).await?;
        Ok(report)
    }

    async fn drive<B: PageBackend + ?Sized>(
        &self,
        backend: &mut B,
        spec: &TaskSpec,
        start_url: &str,
        ctx: &mut RunContext,
    ) -> Result<(), WorkflowError> {
        backend.navigate(start_url).await?;
        backend.settle(self.config.settle_ms).await?;

        for iteration in 1..=self.config.max_iterations {
            if *self.cancel.borrow() {
                return Err(WorkflowError::Cancelled);
            }

            ctx.transition(WorkflowState::Extracting);
            let elements = self.extract_with_retries(backend).await?;

            let screenshot = backend.screenshot().await?;
            let (marked, mapping) = self
                .annotator
                .annotate(&screenshot, &elements)
                .map_err(|e| WorkflowError::Backend(BackendError::Other(e.to_string())))?;
            ctx.transition(WorkflowState::Annotated);

            if let Err(e) = self.sink.record_iteration(iteration, &marked, &mapping).await {
                warn!(error = %e, "trace sink write failed");
            }

            let before = backend.page_state().await?;
            let mut trace = IterationTrace {
                index: iteration,
                page: before.clone(),
                marker_count: mapping.len(),
                decision: None,
                resolution: None,
                verified: None,
                note: ctx.corrective_note.clone(),
            };

            ctx.transition(WorkflowState::AwaitingDecision);
            let decision = match self
                .decide(spec, &marked, &mapping, &before, ctx, iteration == 1)
                .await
            {
                Ok(d) => d,
                Err(e) => {
                    ctx.traces.push(trace);
                    return Err(e);
                }
            };
            trace.decision = Some(decision.clone());

            match decision.action {
                ActionKind::Done => {
                    ctx.transition(WorkflowState::Done);
                    ctx.traces.push(trace);
                    info!(iterations = iteration, "oracle declared the task done");
                    return Ok(());
                }
                ActionKind::Abort => {
                    ctx.transition(WorkflowState::Aborted);
                    ctx.traces.push(trace);
                    return Err(WorkflowError::OracleAbort);
                }
                ActionKind::Wait => {
                    backend.settle(self.config.settle_ms).await?;
                    ctx.push_history(&decision, "waited for the page");
                    ctx.traces.push(trace);
                    continue;
                }
                ActionKind::Scroll => {
                    backend.scroll(SCROLL_STEP).await?;
                    backend.settle(self.config.settle_ms).await?;
                    ctx.push_history(&decision, "scrolled down");
                    ctx.traces.push(trace);
                    continue;
                }
                ActionKind::Click | ActionKind::Fill => {}
            }

            ctx.transition(WorkflowState::Resolving);
            let resolution = self.resolver.resolve(&decision, &mapping, backend).await?;
            trace.resolution = Some(resolution.clone());

            if !resolution.is_success() {
                ctx.transition(WorkflowState::Retrying);
                let note = failure_note(&decision, resolution.status);
                debug!(status = ?resolution.status, "resolution failed, retrying fresh");
                ctx.traces.push(trace);
                ctx.record_failure(note, self.config.max_step_retries)?;
                backend.settle(self.config.settle_ms).await?;
                continue;
            }

            ctx.transition(WorkflowState::Verifying);
            backend.settle(self.config.settle_ms).await?;
            let after = backend.page_state().await?;
            let verified = before.observable_change(&after);
            trace.verified = Some(verified);

            if verified {
                ctx.steps_completed += 1;
                ctx.consecutive_failures = 0;
                ctx.corrective_note = None;
                ctx.push_history(&decision, "action verified");
                ctx.traces.push(trace);
            } else {
                ctx.transition(WorkflowState::Retrying);
                debug!("action produced no observable change");
                ctx.traces.push(trace);
                ctx.record_failure(
                    "Your previous action ran but produced no visible effect on the page. \
                     Try a different element or approach."
                        .to_string(),
                    self.config.max_step_retries,
                )?;
            }
        }

        Err(WorkflowError::IterationCapReached(self.config.max_iterations))
    }

    /// Extraction with the transient/empty retry budget. An empty element
    /// set after all retries is terminal: a page with nothing to interact
    /// with cannot make progress.
    async fn extract_with_retries<B: PageBackend + ?Sized>(
        &self,
        backend: &mut B,
    ) -> Result<Vec<InteractiveElement>, WorkflowError> {
        let mut last_transient = None;
        for attempt in 0..self.config.extract_retries.max(1) {
            if attempt > 0 {
                backend.settle(self.config.settle_ms).await?;
            }
            match self.extractor.extract(backend, self.config.element_limit).await {
                Ok(elements) if !elements.is_empty() => return Ok(elements),
                Ok(_) => {
                    debug!(attempt, "extraction returned no elements");
                }
                Err(e) if e.is_transient() => {
                    debug!(attempt, error = %e, "transient extraction failure");
                    last_transient = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        match last_transient {
            Some(e) => Err(e.into()),
            None => Err(WorkflowError::EmptyElementSet),
        }
    }

    /// One decision with the oracle, retrying contract violations with a
    /// corrective note. HTTP hiccups get the same budget.
    async fn decide(
        &self,
        spec: &TaskSpec,
        marked: &[u8],
        mapping: &MarkerMapping,
        page: &PageState,
        ctx: &RunContext,
        is_initial: bool,
    ) -> Result<ActionDecision, WorkflowError> {
        let mut note = ctx.corrective_note.clone();

        for _ in 0..self.config.max_step_retries.max(1) {
            let request = DecisionRequest {
                task: &spec.task,
                app: &spec.app,
                marked_image_png: marked,
                mapping,
                page,
                history: &ctx.history,
                is_initial,
                corrective_note: note.as_deref(),
            };

            match self.await_decision(request).await? {
                Ok(decision) => return Ok(decision),
                Err(OracleError::Contract(msg)) => {
                    warn!(%msg, "oracle contract violation, retrying with note");
                    note = Some(format!(
                        "Your previous reply was rejected: {}. Respond with ONLY the JSON object.",
                        msg
                    ));
                }
                Err(e @ (OracleError::Http(_) | OracleError::Decode(_))) => {
                    warn!(error = %e, "oracle request failed, retrying");
                }
            }
        }

        Err(WorkflowError::RetryBudgetExhausted {
            attempts: self.config.max_step_retries,
        })
    }

    /// The decision wait is the loop's one long suspension point, so it
    /// must react to cancellation mid-flight, not just at iteration
    /// boundaries.
    async fn await_decision(
        &self,
        request: DecisionRequest<'_>,
    ) -> Result<Result<ActionDecision, OracleError>, WorkflowError> {
        let timeout = Duration::from_secs(self.config.decision_timeout_secs);
        let mut cancel = self.cancel.clone();
        let fut = tokio::time::timeout(timeout, self.oracle.decide(request));
        tokio::pin!(fut);

        loop {
            tokio::select! {
                res = &mut fut => {
                    return res.map_err(|_| WorkflowError::DecisionTimeout);
                }
                changed = cancel.changed() => {
                    match changed {
                        Ok(()) if *cancel.borrow() => return Err(WorkflowError::Cancelled),
                        Ok(()) => {}
                        // Sender gone: cancellation can never fire.
                        Err(_) => return fut.await.map_err(|_| WorkflowError::DecisionTimeout),
                    }
                }
            }
        }
    }
}

/// Mutable state threaded through one run.
#[derive(Default)]
struct RunContext {
    state: WorkflowState,
    traces: Vec<IterationTrace>,
    history: Vec<HistoryEntry>,
    consecutive_failures: u32,
    corrective_note: Option<String>,
    steps_completed: u32,
}

impl Default for WorkflowState {
    fn default() -> Self {
        WorkflowState::Idle
    }
}

impl RunContext {
    fn transition(&mut self, state: WorkflowState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "workflow transition");
            self.state = state;
        }
    }

    /// Count a recoverable failure against the consecutive-failure budget
    /// and stash the note for the next decision.
    fn record_failure(&mut self, note: String, budget: u32) -> Result<(), WorkflowError> {
        self.consecutive_failures += 1;
        self.corrective_note = Some(note);
        if self.consecutive_failures >= budget.max(1) {
            return Err(WorkflowError::RetryBudgetExhausted {
                attempts: self.consecutive_failures,
            });
        }
        Ok(())
    }

    fn push_history(&mut self, decision: &ActionDecision, fallback: &str) {
        let description = decision
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string());
        self.history.push(HistoryEntry {
            action: decision.action,
            description,
        });
    }
}

fn failure_note(decision: &ActionDecision, status: ResolutionStatus) -> String {
    let marker = decision
        .marker_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "?".to_string());
    match status {
        ResolutionStatus::NotFound => format!(
            "Element {} could not be located on the live page. The page may have changed; \
             pick an element from the fresh screenshot.",
            marker
        ),
        ResolutionStatus::Ambiguous => format!(
            "Element {} matched several places on the page and none could be chosen safely. \
             Pick a more specific element.",
            marker
        ),
        ResolutionStatus::TimedOut => format!(
            "Element {} was found but never became actionable. Try another element or wait.",
            marker
        ),
        ResolutionStatus::Succeeded => String::new(),
    }
}
