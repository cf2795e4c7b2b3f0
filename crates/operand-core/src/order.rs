//! Leveled execution order.
//!
//! An [`ExecutionOrder`] is a sequence of [`Step`]s. Operands inside a step
//! have no dependency on each other; every dependency of an operand sits in
//! a strictly earlier step. Steps are kept sorted by operand name so that
//! display and dispatch enumeration are deterministic.

use std::fmt;

use crate::operand::DynOperand;

/// One barrier-synchronized phase of an execution order.
#[derive(Clone)]
pub struct Step {
    operands: Vec<DynOperand>,
}

impl Step {
    /// Build a step, sorting its members by name.
    pub fn new(mut operands: Vec<DynOperand>) -> Self {
        operands.sort_by(|a, b| a.name().cmp(b.name()));
        Self { operands }
    }

    /// Members of this step in name order.
    pub fn operands(&self) -> &[DynOperand] {
        &self.operands
    }

    pub fn names(&self) -> Vec<&str> {
        self.operands.iter().map(|op| op.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operands.iter().any(|op| op.name() == name)
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }
}

impl PartialEq for Step {
    fn eq(&self, other: &Self) -> bool {
        self.names() == other.names()
    }
}

impl Eq for Step {}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names().join(", "))
    }
}

/// Ordered sequence of steps produced from an operand graph.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ExecutionOrder {
    steps: Vec<Step>,
}

impl ExecutionOrder {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total number of operands across all steps.
    pub fn operand_count(&self) -> usize {
        self.steps.iter().map(Step::len).sum()
    }

    /// Same steps in reverse sequence, used for teardown.
    pub fn reverse(&self) -> Self {
        Self {
            steps: self.steps.iter().rev().cloned().collect(),
        }
    }

    /// Index of the step holding `name`, if any.
    pub fn step_of(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.contains(name))
    }

    /// Operand names per step, each step in name order.
    pub fn step_names(&self) -> Vec<Vec<String>> {
        self.steps
            .iter()
            .map(|step| step.names().into_iter().map(str::to_string).collect())
            .collect()
    }
}

impl<'a> IntoIterator for &'a ExecutionOrder {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.steps.iter()).finish()
    }
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str("[]");
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReconcileContext;
    use crate::object::{ObjectReference, OwnerReference};
    use crate::operand::{ActionResult, Operand};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Named(&'static str);

    #[async_trait]
    impl Operand for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn requires(&self) -> &[String] {
            &[]
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

    fn step(names: &[&'static str]) -> Step {
        Step::new(
            names
                .iter()
                .map(|n| Arc::new(Named(*n)) as DynOperand)
                .collect(),
        )
    }

    fn sample() -> ExecutionOrder {
        ExecutionOrder::new(vec![step(&["b", "a"]), step(&["c"]), step(&["f", "d"])])
    }

    #[test]
    fn test_step_sorted_by_name() {
        assert_eq!(step(&["zeta", "alpha", "mid"]).names(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_reverse_is_involution() {
        let order = sample();
        let reversed = order.reverse();

        assert_eq!(
            reversed.step_names(),
            vec![vec!["d", "f"], vec!["c"], vec!["a", "b"]]
        );
        assert_eq!(reversed.reverse(), order);
    }

    #[test]
    fn test_reverse_preserves_membership() {
        let order = sample();
        let reversed = order.reverse();
        assert_eq!(order.operand_count(), reversed.operand_count());
        for (forward, backward) in order.iter().zip(reversed.iter().rev()) {
            assert_eq!(forward, backward);
        }
    }

    #[test]
    fn test_display_and_lookup() {
        let order = sample();
        assert_eq!(order.to_string(), "[a, b] -> [c] -> [d, f]");
        assert_eq!(order.step_of("f"), Some(2));
        assert_eq!(order.step_of("missing"), None);
        assert_eq!(ExecutionOrder::default().to_string(), "[]");
    }
}
