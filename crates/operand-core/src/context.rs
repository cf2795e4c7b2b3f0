//! Per-pass execution context.
//!
//! Carries cancellation and the tracing span of the current reconcile pass
//! into every operand call. Cloning is cheap; a clone observes the same
//! cancellation.

use tokio_util::sync::CancellationToken;
use tracing::Span;

#[derive(Debug, Clone)]
pub struct ReconcileContext {
    cancellation: CancellationToken,
    span: Span,
}

impl ReconcileContext {
    /// Context that is never cancelled, attached to the current span.
    pub fn new() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            span: Span::current(),
        }
    }

    /// Context driven by an existing cancellation token.
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            span: Span::current(),
        }
    }

    /// Replace the parent span used for pass and operand spans.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Child context: cancelled when this one is, but can be cancelled alone.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            span: self.span.clone(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this context and every child.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

impl Default for ReconcileContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_follows_parent() {
        let parent = ReconcileContext::new();
        let child = parent.child();
        assert!(!child.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_is_local() {
        let parent = ReconcileContext::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves() {
        let ctx = ReconcileContext::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        ctx.cancel();
        handle.await.expect("waiter finished");
    }
}
