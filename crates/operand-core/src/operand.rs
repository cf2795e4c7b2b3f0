//! The operand contract.
//!
//! An operand is one idempotent unit of reconcile work: it knows how to drive
//! some slice of the world towards the state described by the parent object
//! (`ensure`), how to tear that slice down again (`delete`), and how to tell
//! whether the last `ensure` has converged (`ready_check`).
//!
//! Operands are shared between the graph and the tasks of a pass, so they
//! are handed around as `Arc<dyn Operand>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::ReconcileContext;
use crate::error::OperandError;
use crate::events::ChangeEvent;
use crate::object::{ObjectReference, OwnerReference};

/// Whether a successful change forces the caller to start a new pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeueStrategy {
    /// Requeue only when something failed.
    #[default]
    OnError,
    /// Requeue whenever this operand applied a change, so later steps run
    /// against settled state.
    Always,
}

/// Result of a forward or reverse action: `Some` when a change was applied.
pub type ActionResult = Result<Option<ChangeEvent>, OperandError>;

/// Shared handle to an operand.
pub type DynOperand = Arc<dyn Operand>;

/// Trait implemented by every unit of reconcile work.
///
/// # Implementation Notes
///
/// - `ensure` and `delete` must be idempotent; a pass that stops early is
///   simply run again later from the first step.
/// - Honor the context's cancellation in any long-running I/O. The engine
///   waits for every operand of a step and will not abort a stuck one.
/// - Operands in the same step may run concurrently and receive the same
///   target and owner reference.
///
/// # Example
///
/// ```ignore
/// struct ConfigMapOperand { client: Client }
///
/// #[async_trait]
/// impl Operand for ConfigMapOperand {
///     fn name(&self) -> &str { "configmap" }
///     fn requires(&self) -> &[String] { &[] }
///
///     async fn ensure(&self, ctx: &ReconcileContext, target: &ObjectReference,
///                     owner: &OwnerReference) -> ActionResult {
///         let created = self.client.apply_config_map(target, owner).await?;
///         Ok(created.then(|| ChangeEvent::normal("ConfigMapCreated", "created")))
///     }
///
///     async fn delete(&self, ctx: &ReconcileContext, target: &ObjectReference) -> ActionResult {
///         self.client.delete_config_map(target).await?;
///         Ok(None)
///     }
/// }
/// ```
#[async_trait]
pub trait Operand: Send + Sync {
    /// Unique name of this operand within its graph.
    fn name(&self) -> &str;

    /// Names of the operands that must succeed before this one runs.
    fn requires(&self) -> &[String];

    /// Requeue policy applied when this operand reports a change.
    fn requeue_strategy(&self) -> RequeueStrategy {
        RequeueStrategy::OnError
    }

    /// Drive this operand's resources to the desired state.
    async fn ensure(
        &self,
        ctx: &ReconcileContext,
        target: &ObjectReference,
        owner: &OwnerReference,
    ) -> ActionResult;

    /// Remove this operand's resources.
    async fn delete(&self, ctx: &ReconcileContext, target: &ObjectReference) -> ActionResult;

    /// Report whether the effect of the last `ensure` has converged.
    ///
    /// Default implementation reports ready immediately.
    async fn ready_check(
        &self,
        _ctx: &ReconcileContext,
        _target: &ObjectReference,
    ) -> Result<bool, OperandError> {
        Ok(true)
    }

    /// Called once readiness is confirmed, before dependents may run.
    async fn post_ready(
        &self,
        _ctx: &ReconcileContext,
        _target: &ObjectReference,
    ) -> Result<(), OperandError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal {
        requires: Vec<String>,
    }

    #[async_trait]
    impl Operand for Minimal {
        fn name(&self) -> &str {
            "minimal"
        }

        fn requires(&self) -> &[String] {
            &self.requires
        }

        async fn ensure(
            &self,
            _ctx: &ReconcileContext,
            _target: &ObjectReference,
            _owner: &OwnerReference,
        ) -> ActionResult {
            Ok(None)
        }

        async fn delete(&self, _ctx: &ReconcileContext, _target: &ObjectReference) -> ActionResult {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_defaults() {
        let op = Minimal { requires: vec![] };
        let ctx = ReconcileContext::new();
        let target = ObjectReference::new("v1", "Thing", "t");

        assert_eq!(op.requeue_strategy(), RequeueStrategy::OnError);
        assert!(op.ready_check(&ctx, &target).await.expect("ready check"));
        assert!(op.post_ready(&ctx, &target).await.is_ok());
    }
}
