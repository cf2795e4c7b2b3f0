//! Composite operator.
//!
//! Facade over a prebuilt [`OperandGraph`] and an [`Executor`]. The graph
//! is validated once at construction; every reconcile pass then calls
//! [`CompositeOperator::ensure`] or [`CompositeOperator::cleanup`], which
//! walk the precomputed order forwards or backwards.
//!
//! # Example
//!
//! ```ignore
//! let operator = CompositeOperator::builder()
//!     .operands(vec![config_map, deployment, service])
//!     .strategy(ExecutionStrategy::Parallel)
//!     .event_recorder(Arc::new(TracingEventRecorder))
//!     .build()?;
//!
//! match operator.ensure(&ctx, &target, &owner).await {
//!     Ok(result) if result.requeue => schedule_after(result.requeue_after),
//!     Ok(_) => {}
//!     Err(e) => schedule_with_backoff(e),
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::ReconcileContext;
use crate::error::{ConstructionError, ReconcileError, Result};
use crate::events::EventRecorder;
use crate::executor::{ExecutionStrategy, Executor, OperandAction, PassOutcome, StepRequeuePolicy};
use crate::graph::OperandGraph;
use crate::object::{ObjectReference, OwnerReference};
use crate::observability;
use crate::operand::DynOperand;
use crate::order::ExecutionOrder;
use crate::settings::EngineSettings;

/// Delay before the next pass when an operand has not converged yet.
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(5);

/// Predicate deciding whether reconciliation of a target is paused.
pub type SuspensionCheck = Arc<dyn Fn(&ReconcileContext, &ObjectReference) -> bool + Send + Sync>;

/// What the reconcile loop should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileResult {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Nothing left to do.
    pub fn done() -> Self {
        Self::default()
    }

    /// Run another pass as soon as possible.
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    /// Run another pass after `delay`.
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(delay),
        }
    }
}

/// Runs a fixed set of operands in dependency order.
pub struct CompositeOperator {
    graph: OperandGraph,
    reverse_order: ExecutionOrder,
    executor: Executor,
    suspension_check: SuspensionCheck,
    retry_period: Duration,
}

impl CompositeOperator {
    pub fn builder() -> CompositeOperatorBuilder {
        CompositeOperatorBuilder::new()
    }

    /// Whether reconciliation of `target` is administratively paused.
    pub fn is_suspended(&self, ctx: &ReconcileContext, target: &ObjectReference) -> bool {
        (self.suspension_check)(ctx, target)
    }

    /// Drive every operand to its desired state, dependencies first.
    ///
    /// An operand that has not converged turns into a delayed requeue, not an
    /// error. Any `Err` means the caller should requeue with backoff.
    pub async fn ensure(
        &self,
        ctx: &ReconcileContext,
        target: &ObjectReference,
        owner: &OwnerReference,
    ) -> std::result::Result<ReconcileResult, ReconcileError> {
        if self.is_suspended(ctx, target) {
            info!(target_object = %target, "Reconciliation suspended, skipping ensure");
            return Ok(ReconcileResult::done());
        }

        let action = OperandAction::Ensure(owner.clone());
        let outcome = self
            .executor
            .execute(ctx, self.graph.order(), &action, target)
            .await;
        self.pass_result(outcome)
    }

    /// Tear every operand down, dependents first.
    pub async fn cleanup(
        &self,
        ctx: &ReconcileContext,
        target: &ObjectReference,
    ) -> std::result::Result<ReconcileResult, ReconcileError> {
        if self.is_suspended(ctx, target) {
            info!(target_object = %target, "Reconciliation suspended, skipping cleanup");
            return Ok(ReconcileResult::done());
        }

        let outcome = self
            .executor
            .execute(ctx, &self.reverse_order, &OperandAction::Delete, target)
            .await;
        self.pass_result(outcome)
    }

    fn pass_result(
        &self,
        outcome: PassOutcome,
    ) -> std::result::Result<ReconcileResult, ReconcileError> {
        match outcome {
            PassOutcome::Completed { .. } => Ok(ReconcileResult::done()),
            PassOutcome::RequeueRequested { .. } => Ok(ReconcileResult::requeue()),
            PassOutcome::NotReady { step, operands } => {
                debug!(step, operands = ?operands, retry_after = ?self.retry_period, "Waiting for operands to converge");
                Ok(ReconcileResult::requeue_after(self.retry_period))
            }
            PassOutcome::Failed { error, .. } => Err(ReconcileError::Operands(error)),
            PassOutcome::Cancelled { step } => Err(ReconcileError::Cancelled { step }),
        }
    }

    /// Forward execution order.
    pub fn order(&self) -> &ExecutionOrder {
        self.graph.order()
    }

    /// Teardown order.
    pub fn reverse_order(&self) -> &ExecutionOrder {
        &self.reverse_order
    }

    pub fn graph(&self) -> &OperandGraph {
        &self.graph
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.executor.strategy()
    }

    pub fn retry_period(&self) -> Duration {
        self.retry_period
    }
}

impl std::fmt::Debug for CompositeOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeOperator")
            .field("order", self.graph.order())
            .field("executor", &self.executor)
            .field("retry_period", &self.retry_period)
            .finish_non_exhaustive()
    }
}

/// Builder for [`CompositeOperator`].
pub struct CompositeOperatorBuilder {
    operands: Vec<DynOperand>,
    strategy: ExecutionStrategy,
    step_policy: StepRequeuePolicy,
    recorder: Option<Arc<dyn EventRecorder>>,
    suspension_check: Option<SuspensionCheck>,
    retry_period: Duration,
}

impl CompositeOperatorBuilder {
    pub fn new() -> Self {
        Self {
            operands: Vec::new(),
            strategy: ExecutionStrategy::default(),
            step_policy: StepRequeuePolicy::default(),
            recorder: None,
            suspension_check: None,
            retry_period: DEFAULT_RETRY_PERIOD,
        }
    }

    /// Add one operand.
    pub fn operand(mut self, operand: DynOperand) -> Self {
        self.operands.push(operand);
        self
    }

    /// Add several operands.
    pub fn operands(mut self, operands: impl IntoIterator<Item = DynOperand>) -> Self {
        self.operands.extend(operands);
        self
    }

    pub fn strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn step_requeue_policy(mut self, step_policy: StepRequeuePolicy) -> Self {
        self.step_policy = step_policy;
        self
    }

    /// Sink for change events. Required.
    pub fn event_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Predicate pausing reconciliation. Defaults to never suspended.
    pub fn suspension_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&ReconcileContext, &ObjectReference) -> bool + Send + Sync + 'static,
    {
        self.suspension_check = Some(Arc::new(check));
        self
    }

    /// Delay before retrying operands that have not converged.
    pub fn retry_period(mut self, retry_period: Duration) -> Self {
        self.retry_period = retry_period;
        self
    }

    /// Apply strategy, step requeue policy and retry period from settings.
    ///
    /// `settings.logging` is applied to the engine subscriber when
    /// [`observability::init_tracing`] installed one.
    pub fn with_settings(self, settings: &EngineSettings) -> Self {
        if let Err(e) = observability::set_engine_level(&settings.logging) {
            warn!(error = %e, "Ignoring engine logging settings");
        }
        self.strategy(settings.strategy)
            .step_requeue_policy(settings.step_requeue_policy)
            .retry_period(settings.retry_period())
    }

    /// Validate the operand graph and assemble the operator.
    pub fn build(self) -> Result<CompositeOperator> {
        let recorder = self
            .recorder
            .ok_or(ConstructionError::MissingCollaborator("event recorder"))?;
        let graph = OperandGraph::build(self.operands)?;
        let reverse_order = graph.order().reverse();
        let executor = Executor::new(self.strategy, recorder).with_step_policy(self.step_policy);

        info!(
            operands = graph.len(),
            steps = graph.order().len(),
            strategy = %self.strategy,
            order = %graph.order(),
            "Composite operator ready"
        );

        let suspension_check: SuspensionCheck = match self.suspension_check {
            Some(check) => check,
            None => Arc::new(|_: &ReconcileContext, _: &ObjectReference| false),
        };

        Ok(CompositeOperator {
            graph,
            reverse_order,
            executor,
            suspension_check,
            retry_period: self.retry_period,
        })
    }
}

impl Default for CompositeOperatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
