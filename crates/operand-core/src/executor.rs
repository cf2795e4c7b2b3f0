//! Step executor.
//!
//! Runs an [`ExecutionOrder`] one step at a time. Steps are barriers: the
//! next step starts only once every operand dispatched in the current one
//! has returned. Inside a step operands run either one after another in name
//! order ([`ExecutionStrategy::Serial`]) or as one spawned task each
//! ([`ExecutionStrategy::Parallel`]).
//!
//! A pass stops at the first step that
//! - had an operand failure (all failures of the step are aggregated),
//! - had an operand whose effect has not converged yet (NotReady),
//! - applied a change under an `Always` requeue strategy.
//!
//! Parallel dispatch spawns onto the ambient tokio runtime.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, debug_span, error, info, info_span, warn};

use crate::context::ReconcileContext;
use crate::error::{AggregateError, OperandError, OperandFailure};
use crate::events::{ChangeEvent, EventRecorder};
use crate::object::{ObjectReference, OwnerReference};
use crate::operand::{DynOperand, Operand, RequeueStrategy};
use crate::order::{ExecutionOrder, Step};

/// How operands inside one step are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One at a time in name order, stopping the step at the first failure.
    ///
    /// A NotReady operand is not a failure: the remaining operands of the
    /// step still run, and the step then reports NotReady.
    Serial,
    /// All at once; every operand runs even if a sibling fails.
    #[default]
    Parallel,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::Serial => "serial",
            ExecutionStrategy::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(ExecutionStrategy::Serial),
            "parallel" => Ok(ExecutionStrategy::Parallel),
            other => Err(format!("unknown execution strategy: {other}")),
        }
    }
}

/// How a change inside a step escalates to a requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRequeuePolicy {
    /// A step containing any `Always` operand requeues when any member of
    /// the step changed, whether or not that member asked for it.
    #[default]
    StepWide,
    /// Only a change reported by an `Always` operand itself requeues.
    PerOperand,
}

impl StepRequeuePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepRequeuePolicy::StepWide => "step_wide",
            StepRequeuePolicy::PerOperand => "per_operand",
        }
    }
}

impl FromStr for StepRequeuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "step_wide" => Ok(StepRequeuePolicy::StepWide),
            "per_operand" => Ok(StepRequeuePolicy::PerOperand),
            other => Err(format!("unknown step requeue policy: {other}")),
        }
    }
}

/// Action applied to every operand of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandAction {
    /// Forward action, gated on readiness.
    Ensure(OwnerReference),
    /// Reverse action.
    Delete,
}

impl OperandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperandAction::Ensure(_) => "ensure",
            OperandAction::Delete => "delete",
        }
    }
}

/// Terminal state of one operand invocation.
#[derive(Debug)]
pub enum OperandOutcome {
    /// The action (and, for ensure, readiness and post-ready) succeeded.
    Succeeded(Option<ChangeEvent>),
    /// Ensure succeeded but the effect has not converged yet.
    NotReady(Option<ChangeEvent>),
    /// The operand failed. `event` is a change the action already applied
    /// before readiness or post-ready failed.
    Failed {
        error: OperandError,
        event: Option<ChangeEvent>,
    },
}

impl OperandOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, OperandOutcome::Succeeded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, OperandOutcome::Failed { .. })
    }

    fn failed(error: OperandError) -> Self {
        OperandOutcome::Failed { error, event: None }
    }

    fn take_event(&mut self) -> Option<ChangeEvent> {
        match self {
            OperandOutcome::Succeeded(event)
            | OperandOutcome::NotReady(event)
            | OperandOutcome::Failed { event, .. } => event.take(),
        }
    }
}

/// Terminal state of one pass over an execution order.
#[derive(Debug)]
pub enum PassOutcome {
    /// Every step ran and nothing asked for a requeue.
    Completed { steps: usize },
    /// A step applied a change under an `Always` requeue strategy.
    RequeueRequested { step: usize, changed: Vec<String> },
    /// A step had operands whose effect has not converged.
    NotReady { step: usize, operands: Vec<String> },
    /// A step had operand failures.
    Failed { step: usize, error: AggregateError },
    /// The context was cancelled before `step` started.
    Cancelled { step: usize },
}

impl PassOutcome {
    /// Whether the caller has to run another pass.
    pub fn requeue(&self) -> bool {
        !matches!(self, PassOutcome::Completed { .. })
    }

    /// Index of the step the pass stopped at, `None` if it ran to the end.
    pub fn stopped_at(&self) -> Option<usize> {
        match self {
            PassOutcome::Completed { .. } => None,
            PassOutcome::RequeueRequested { step, .. }
            | PassOutcome::NotReady { step, .. }
            | PassOutcome::Failed { step, .. }
            | PassOutcome::Cancelled { step } => Some(*step),
        }
    }
}

/// Outcomes of one step, split by kind.
#[derive(Default)]
struct StepReport {
    failures: Vec<OperandFailure>,
    not_ready: Vec<String>,
    changed: BTreeSet<String>,
    events: Vec<ChangeEvent>,
}

impl StepReport {
    fn collect(outcomes: Vec<(String, OperandOutcome)>) -> Self {
        let mut report = StepReport::default();
        for (name, mut outcome) in outcomes {
            if let Some(event) = outcome.take_event() {
                report.changed.insert(name.clone());
                report.events.push(event);
            }
            match outcome {
                OperandOutcome::Succeeded(_) => {}
                OperandOutcome::NotReady(_) => report.not_ready.push(name),
                OperandOutcome::Failed { error, .. } => {
                    report.failures.push(OperandFailure::new(name, error))
                }
            }
        }
        report.not_ready.sort();
        report
    }
}

/// Runs execution orders with a fixed dispatch strategy.
#[derive(Clone)]
pub struct Executor {
    strategy: ExecutionStrategy,
    step_policy: StepRequeuePolicy,
    recorder: Arc<dyn EventRecorder>,
}

impl Executor {
    pub fn new(strategy: ExecutionStrategy, recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            strategy,
            step_policy: StepRequeuePolicy::default(),
            recorder,
        }
    }

    /// Set how changes escalate to a requeue.
    pub fn with_step_policy(mut self, step_policy: StepRequeuePolicy) -> Self {
        self.step_policy = step_policy;
        self
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn step_policy(&self) -> StepRequeuePolicy {
        self.step_policy
    }

    /// Run one pass of `action` over `order` against `target`.
    pub async fn execute(
        &self,
        ctx: &ReconcileContext,
        order: &ExecutionOrder,
        action: &OperandAction,
        target: &ObjectReference,
    ) -> PassOutcome {
        let span = info_span!(
            parent: ctx.span(),
            "operand_pass",
            action = action.as_str(),
            target_object = %target,
            strategy = %self.strategy,
            steps = order.len(),
        );
        self.run_pass(ctx, order, action, target)
            .instrument(span)
            .await
    }

    async fn run_pass(
        &self,
        ctx: &ReconcileContext,
        order: &ExecutionOrder,
        action: &OperandAction,
        target: &ObjectReference,
    ) -> PassOutcome {
        for (index, step) in order.iter().enumerate() {
            if ctx.is_cancelled() {
                warn!(step = index, "Context cancelled, stopping pass");
                return PassOutcome::Cancelled { step: index };
            }

            debug!(step = index, operands = %step, "Running step");
            let outcomes = match self.strategy {
                ExecutionStrategy::Serial => run_serial(ctx, step, action, target).await,
                ExecutionStrategy::Parallel => run_parallel(ctx, step, action, target).await,
            };
            let report = StepReport::collect(outcomes);

            for event in &report.events {
                self.recorder.record(target, event);
            }

            if !report.failures.is_empty() {
                let error = AggregateError::new(report.failures);
                warn!(step = index, failed = ?error.operands(), error = %error, "Step failed");
                return PassOutcome::Failed { step: index, error };
            }

            if !report.not_ready.is_empty() {
                info!(step = index, operands = ?report.not_ready, "Step not ready, deferring dependents");
                return PassOutcome::NotReady {
                    step: index,
                    operands: report.not_ready,
                };
            }

            if self.requeue_after_change(step, &report.changed) {
                let changed: Vec<String> = report.changed.into_iter().collect();
                info!(step = index, changed = ?changed, "Step applied changes, requeue requested");
                return PassOutcome::RequeueRequested {
                    step: index,
                    changed,
                };
            }
        }

        debug!(steps = order.len(), "Pass completed");
        PassOutcome::Completed { steps: order.len() }
    }

    fn requeue_after_change(&self, step: &Step, changed: &BTreeSet<String>) -> bool {
        if changed.is_empty() {
            return false;
        }
        let always = |op: &DynOperand| op.requeue_strategy() == RequeueStrategy::Always;
        match self.step_policy {
            StepRequeuePolicy::StepWide => step.operands().iter().any(always),
            StepRequeuePolicy::PerOperand => step
                .operands()
                .iter()
                .any(|op| always(op) && changed.contains(op.name())),
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("strategy", &self.strategy)
            .field("step_policy", &self.step_policy)
            .finish_non_exhaustive()
    }
}

/// Invoke operands one at a time; the first failure ends the step.
async fn run_serial(
    ctx: &ReconcileContext,
    step: &Step,
    action: &OperandAction,
    target: &ObjectReference,
) -> Vec<(String, OperandOutcome)> {
    let mut outcomes = Vec::with_capacity(step.len());
    for operand in step.operands() {
        let outcome = invoke(operand.clone(), ctx.clone(), target.clone(), action.clone()).await;
        let failed = outcome.is_failed();
        outcomes.push((operand.name().to_string(), outcome));
        if failed {
            debug!(operand = %operand.name(), "Serial step stops at first failure");
            break;
        }
    }
    outcomes
}

/// Spawn one task per operand and wait for all of them.
async fn run_parallel(
    ctx: &ReconcileContext,
    step: &Step,
    action: &OperandAction,
    target: &ObjectReference,
) -> Vec<(String, OperandOutcome)> {
    let mut tasks = JoinSet::new();
    let mut names = HashMap::with_capacity(step.len());

    for operand in step.operands() {
        let handle = tasks.spawn(invoke(
            operand.clone(),
            ctx.clone(),
            target.clone(),
            action.clone(),
        ));
        names.insert(handle.id(), operand.name().to_string());
    }

    let mut outcomes = Vec::with_capacity(step.len());
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, outcome)) => {
                if let Some(name) = names.remove(&id) {
                    outcomes.push((name, outcome));
                }
            }
            Err(join_err) => {
                let Some(name) = names.remove(&join_err.id()) else {
                    continue;
                };
                error!(operand = %name, error = %join_err, "Operand task did not complete");
                let err = if join_err.is_panic() {
                    OperandError::Panicked(join_err.to_string())
                } else {
                    OperandError::Aborted(join_err.to_string())
                };
                outcomes.push((name, OperandOutcome::failed(err)));
            }
        }
    }
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    outcomes
}

/// Run one operand with panic isolation inside its own span.
async fn invoke(
    operand: DynOperand,
    ctx: ReconcileContext,
    target: ObjectReference,
    action: OperandAction,
) -> OperandOutcome {
    let span = debug_span!(
        parent: ctx.span(),
        "operand",
        operand = %operand.name(),
        action = action.as_str(),
    );

    let result = AssertUnwindSafe(run_action(operand.as_ref(), &ctx, &target, &action))
        .catch_unwind()
        .instrument(span)
        .await;

    match result {
        Ok(outcome) => outcome,
        Err(panic) => {
            let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            error!(operand = %operand.name(), panic = %panic_msg, "Operand panicked!");
            OperandOutcome::failed(OperandError::Panicked(panic_msg))
        }
    }
}

async fn run_action(
    operand: &dyn Operand,
    ctx: &ReconcileContext,
    target: &ObjectReference,
    action: &OperandAction,
) -> OperandOutcome {
    match action {
        OperandAction::Delete => match operand.delete(ctx, target).await {
            Ok(event) => OperandOutcome::Succeeded(event),
            Err(e) => {
                debug!(error = %e, "Delete failed");
                OperandOutcome::failed(e)
            }
        },
        OperandAction::Ensure(owner) => {
            let event = match operand.ensure(ctx, target, owner).await {
                Ok(event) => event,
                Err(e) => {
                    debug!(error = %e, "Ensure failed");
                    return OperandOutcome::failed(e);
                }
            };

            match operand.ready_check(ctx, target).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Operand not ready");
                    return OperandOutcome::NotReady(event);
                }
                Err(error) => {
                    debug!(error = %error, "Ready check failed");
                    return OperandOutcome::Failed { error, event };
                }
            }

            if let Err(error) = operand.post_ready(ctx, target).await {
                debug!(error = %error, "Post-ready hook failed");
                return OperandOutcome::Failed { error, event };
            }

            debug!(changed = event.is_some(), "Operand ensured");
            OperandOutcome::Succeeded(event)
        }
    }
}
