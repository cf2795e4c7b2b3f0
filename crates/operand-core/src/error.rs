use std::fmt;

use thiserror::Error;

/// Errors raised while assembling a [`CompositeOperator`](crate::CompositeOperator).
///
/// These are never produced during a reconcile pass: a graph that builds
/// once stays valid for the lifetime of the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("Duplicate operand: {0}")]
    DuplicateOperand(String),

    #[error("Operand {operand} requires unknown operand {dependency}")]
    UnknownDependency { operand: String, dependency: String },

    #[error("Dependency cycle detected among operands: {}", .remaining.join(", "))]
    Cycle { remaining: Vec<String> },

    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}

impl ConstructionError {
    /// Create a new UnknownDependency error
    pub fn unknown_dependency(operand: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            operand: operand.into(),
            dependency: dependency.into(),
        }
    }
}

/// Error type returned by operand implementations.
#[derive(Debug, Error)]
pub enum OperandError {
    /// The operand action failed with a message.
    #[error("Operand execution failed: {0}")]
    Execution(String),

    /// A call to the remote API failed.
    #[error("API error: {0}")]
    Api(String),

    /// The readiness probe itself failed (as opposed to reporting "not ready").
    #[error("Readiness check failed: {0}")]
    ReadyCheck(String),

    /// The operand panicked while running. Only caught under `panic = "unwind"`.
    #[error("Operand panicked: {0}")]
    Panicked(String),

    /// The spawned task was aborted before it finished.
    #[error("Operand task aborted: {0}")]
    Aborted(String),

    /// Generic error with source.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OperandError {
    /// Create an execution error from a string.
    pub fn execution(msg: impl Into<String>) -> Self {
        OperandError::Execution(msg.into())
    }

    /// Create an API error from a string.
    pub fn api(msg: impl Into<String>) -> Self {
        OperandError::Api(msg.into())
    }

    /// Create a readiness check error from a string.
    pub fn ready_check(msg: impl Into<String>) -> Self {
        OperandError::ReadyCheck(msg.into())
    }
}

/// A single operand failure, tagged with the operand that produced it.
#[derive(Debug, Error)]
#[error("{operand}: {source}")]
pub struct OperandFailure {
    pub operand: String,
    #[source]
    pub source: OperandError,
}

impl OperandFailure {
    pub fn new(operand: impl Into<String>, source: OperandError) -> Self {
        Self {
            operand: operand.into(),
            source,
        }
    }
}

/// Every failure collected from one step, in operand name order.
#[derive(Debug)]
pub struct AggregateError {
    failures: Vec<OperandFailure>,
}

impl AggregateError {
    /// Build an aggregate from collected failures, sorted by operand name.
    pub fn new(mut failures: Vec<OperandFailure>) -> Self {
        failures.sort_by(|a, b| a.operand.cmp(&b.operand));
        Self { failures }
    }

    pub fn failures(&self) -> &[OperandFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names of the operands that failed.
    pub fn operands(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.operand.as_str()).collect()
    }

    pub fn into_failures(self) -> Vec<OperandFailure> {
        self.failures
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.as_slice() {
            [] => write!(f, "no operand failures"),
            [single] => write!(f, "{single}"),
            many => {
                write!(f, "{} operands failed: ", many.len())?;
                for (i, failure) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{failure}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| f as &(dyn std::error::Error + 'static))
    }
}

/// Error surfaced to the reconcile loop by `ensure` / `cleanup`.
///
/// Any error implies the caller should requeue the parent object.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Operands(#[from] AggregateError),

    #[error("Reconcile pass cancelled before step {step}")]
    Cancelled { step: usize },
}

impl ReconcileError {
    /// Operand failures carried by this error, if any.
    pub fn failures(&self) -> &[OperandFailure] {
        match self {
            Self::Operands(agg) => agg.failures(),
            Self::Cancelled { .. } => &[],
        }
    }
}

/// Result type for construction-time operations
pub type Result<T> = std::result::Result<T, ConstructionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_error_display() {
        let err = ConstructionError::unknown_dependency("web", "db");
        assert_eq!(err.to_string(), "Operand web requires unknown operand db");

        let err = ConstructionError::Cycle {
            remaining: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected among operands: a, b"
        );
    }

    #[test]
    fn test_aggregate_sorted_and_displayed() {
        let agg = AggregateError::new(vec![
            OperandFailure::new("zeta", OperandError::execution("boom")),
            OperandFailure::new("alpha", OperandError::api("conflict")),
        ]);

        assert_eq!(agg.operands(), vec!["alpha", "zeta"]);
        assert_eq!(
            agg.to_string(),
            "2 operands failed: alpha: API error: conflict; zeta: Operand execution failed: boom"
        );
    }

    #[test]
    fn test_single_failure_display() {
        let agg = AggregateError::new(vec![OperandFailure::new(
            "db",
            OperandError::execution("timeout"),
        )]);
        assert_eq!(agg.to_string(), "db: Operand execution failed: timeout");

        let err = ReconcileError::from(agg);
        assert_eq!(err.failures().len(), 1);
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: OperandError = anyhow::anyhow!("wrapped").into();
        assert_eq!(err.to_string(), "wrapped");
    }
}
