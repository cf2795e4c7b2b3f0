//! Dependency graph of operands.
//!
//! The graph is validated and leveled once, when it is built, and is
//! immutable afterwards. Leveling is a multi-source layering: operands with
//! no requirements sit at level 0, every other operand sits one level above
//! its deepest requirement.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{ConstructionError, Result};
use crate::operand::DynOperand;
use crate::order::{ExecutionOrder, Step};

/// Validated operand graph with its leveled execution order.
#[derive(Clone)]
pub struct OperandGraph {
    operands: BTreeMap<String, DynOperand>,
    levels: BTreeMap<String, usize>,
    order: ExecutionOrder,
}

impl OperandGraph {
    /// Validate the operands and compute their execution order.
    ///
    /// Fails on duplicate names, on requirements naming an unknown operand
    /// and on dependency cycles. Validation walks operands in name order so
    /// the reported error is the same on every run.
    pub fn build(operands: Vec<DynOperand>) -> Result<Self> {
        let mut by_name: BTreeMap<String, DynOperand> = BTreeMap::new();
        for operand in operands {
            let name = operand.name().to_string();
            if by_name.contains_key(&name) {
                return Err(ConstructionError::DuplicateOperand(name));
            }
            by_name.insert(name, operand);
        }

        for (name, operand) in &by_name {
            let requires: BTreeSet<&str> = operand.requires().iter().map(String::as_str).collect();
            if let Some(missing) = requires.iter().find(|dep| !by_name.contains_key(**dep)) {
                return Err(ConstructionError::unknown_dependency(name, *missing));
            }
        }

        let levels = assign_levels(&by_name)?;

        let depth = levels.values().max().map_or(0, |max| max + 1);
        let mut buckets: Vec<Vec<DynOperand>> = vec![Vec::new(); depth];
        for (name, level) in &levels {
            buckets[*level].push(by_name[name].clone());
        }
        let order = ExecutionOrder::new(buckets.into_iter().map(Step::new).collect());

        debug!(operands = by_name.len(), steps = order.len(), order = %order, "Built operand graph");

        Ok(Self {
            operands: by_name,
            levels,
            order,
        })
    }

    /// Forward execution order.
    pub fn order(&self) -> &ExecutionOrder {
        &self.order
    }

    /// Level assigned to an operand.
    pub fn level(&self, name: &str) -> Option<usize> {
        self.levels.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&DynOperand> {
        self.operands.get(name)
    }

    /// Operand names in name order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operands.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }
}

impl std::fmt::Debug for OperandGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperandGraph")
            .field("levels", &self.levels)
            .field("order", &self.order)
            .finish()
    }
}

/// Repeat full passes over the unassigned operands until a pass assigns
/// nothing. Anything left over sits on, or behind, a cycle.
fn assign_levels(operands: &BTreeMap<String, DynOperand>) -> Result<BTreeMap<String, usize>> {
    let mut levels: BTreeMap<String, usize> = BTreeMap::new();

    for (name, operand) in operands {
        if operand.requires().is_empty() {
            levels.insert(name.clone(), 0);
        }
    }

    loop {
        let mut assigned = Vec::new();
        for (name, operand) in operands {
            if levels.contains_key(name) {
                continue;
            }
            let deepest = operand
                .requires()
                .iter()
                .map(|dep| levels.get(dep).copied())
                .collect::<Option<Vec<usize>>>()
                .and_then(|deps| deps.into_iter().max());
            if let Some(deepest) = deepest {
                assigned.push((name.clone(), deepest + 1));
            }
        }

        if assigned.is_empty() {
            break;
        }
        levels.extend(assigned);
    }

    if levels.len() < operands.len() {
        let remaining: Vec<String> = operands
            .keys()
            .filter(|name| !levels.contains_key(*name))
            .cloned()
            .collect();
        return Err(ConstructionError::Cycle { remaining });
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReconcileContext;
    use crate::object::{ObjectReference, OwnerReference};
    use crate::operand::{ActionResult, Operand};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Node {
        name: String,
        requires: Vec<String>,
    }

    #[async_trait]
    impl Operand for Node {
        fn name(&self) -> &str {
            &self.name
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

    fn node(name: &str, requires: &[&str]) -> DynOperand {
        Arc::new(Node {
            name: name.to_string(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn diamond() -> Vec<DynOperand> {
        vec![
            node("A", &[]),
            node("B", &[]),
            node("C", &["B"]),
            node("D", &["A", "C"]),
            node("E", &["D"]),
            node("F", &["C"]),
        ]
    }

    #[test]
    fn test_leveled_order() {
        let graph = OperandGraph::build(diamond()).expect("valid graph");

        assert_eq!(
            graph.order().step_names(),
            vec![vec!["A", "B"], vec!["C"], vec!["D", "F"], vec!["E"]]
        );
        assert_eq!(
            graph.order().reverse().step_names(),
            vec![vec!["E"], vec!["D", "F"], vec!["C"], vec!["A", "B"]]
        );
    }

    #[test]
    fn test_levels_are_minimal() {
        let operands = diamond();
        let requires: BTreeMap<String, Vec<String>> = operands
            .iter()
            .map(|op| (op.name().to_string(), op.requires().to_vec()))
            .collect();
        let graph = OperandGraph::build(operands).expect("valid graph");

        for (name, deps) in &requires {
            let level = graph.level(name).expect("assigned");
            if deps.is_empty() {
                assert_eq!(level, 0, "{name} has no requirements");
                continue;
            }
            let deepest = deps
                .iter()
                .map(|d| graph.level(d).expect("dep assigned"))
                .max()
                .expect("non-empty");
            assert_eq!(level, deepest + 1, "{name} is one above its deepest dep");
        }
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let mut operands = diamond();
        operands.reverse();
        let graph = OperandGraph::build(operands).expect("valid graph");
        assert_eq!(graph.order().to_string(), "[A, B] -> [C] -> [D, F] -> [E]");
    }

    #[test]
    fn test_duplicate_name() {
        let err = OperandGraph::build(vec![node("A", &[]), node("A", &[])]).unwrap_err();
        assert_eq!(err, ConstructionError::DuplicateOperand("A".into()));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = OperandGraph::build(vec![node("A", &[]), node("B", &["A", "Z"])]).unwrap_err();
        assert_eq!(err, ConstructionError::unknown_dependency("B", "Z"));
    }

    #[test]
    fn test_cycle_reports_remaining_operands() {
        let operands = vec![
            node("A", &[]),
            node("B", &["A", "D"]),
            node("C", &["B"]),
            node("D", &["C"]),
            node("E", &["D"]),
        ];
        let err = OperandGraph::build(operands).unwrap_err();
        assert_eq!(
            err,
            ConstructionError::Cycle {
                remaining: vec!["B".into(), "C".into(), "D".into(), "E".into()]
            }
        );
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = OperandGraph::build(vec![node("A", &["A"])]).unwrap_err();
        assert!(matches!(err, ConstructionError::Cycle { .. }));
    }

    #[test]
    fn test_empty_graph() {
        let graph = OperandGraph::build(Vec::new()).expect("empty graph is valid");
        assert!(graph.is_empty());
        assert!(graph.order().is_empty());
    }
}
