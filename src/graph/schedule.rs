use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

use crate::graph::Graph;
use crate::model::OperatorId;

impl Graph {
    /// Order the operators so every producer runs before its consumers.
    ///
    /// Each pass over the unplaced operators appends, in their current
    /// order, every operator whose inputs are graph inputs or come from an
    /// already placed operator. Returns `false` and keeps the current order
    /// when a pass places nothing, which means the graph has a cycle.
    pub fn topo_sort(&mut self) -> bool {
        if self.sorted {
            return true;
        }

        let mut placed: HashSet<OperatorId> = HashSet::with_capacity(self.operator_order.len());
        let mut order = Vec::with_capacity(self.operator_order.len());

        while order.len() < self.operator_order.len() {
            let mut modified = false;
            for &id in &self.operator_order {
                if placed.contains(&id) {
                    continue;
                }
                let ready = self.operators.get(&id).map_or(false, |op| {
                    op.inputs().iter().all(|input| {
                        match self.tensors.get(input).and_then(|t| t.source()) {
                            Some(source) => placed.contains(&source),
                            None => true,
                        }
                    })
                });
                if ready {
                    placed.insert(id);
                    order.push(id);
                    modified = true;
                }
            }
            if !modified {
                warn!(
                    "Scheduling stopped after {} of {} operators, the graph has a cycle",
                    order.len(),
                    self.operator_order.len()
                );
                return false;
            }
        }

        debug!("Scheduled {} operators", order.len());
        self.operator_order = order;
        self.sorted = true;
        true
    }

    /// Operators forming a dependency cycle, if any.
    ///
    /// The ids of the first cycle found are returned in ascending order.
    pub fn find_cycle(&self) -> Option<Vec<OperatorId>> {
        let mut dependencies = DiGraph::<OperatorId, ()>::new();
        let nodes: HashMap<OperatorId, _> = self
            .operator_order
            .iter()
            .map(|&id| (id, dependencies.add_node(id)))
            .collect();

        for op in self.operators() {
            for &pred in op.predecessors() {
                if let (Some(&from), Some(&to)) = (nodes.get(&pred), nodes.get(&op.id())) {
                    dependencies.add_edge(from, to, ());
                }
            }
        }

        tarjan_scc(&dependencies)
            .into_iter()
            .find(|component| {
                component.len() > 1
                    || component
                        .first()
                        .map_or(false, |&node| dependencies.contains_edge(node, node))
            })
            .map(|component| {
                let mut cycle: Vec<OperatorId> =
                    component.into_iter().map(|node| dependencies[node]).collect();
                cycle.sort();
                cycle
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::CpuRuntime;
    use crate::ops::{DataType, OperatorKind};

    #[test]
    fn test_sort_places_producers_first() {
        let mut graph = Graph::new(Arc::new(CpuRuntime::new())).unwrap();
        let a = graph.add_tensor(vec![2], DataType::Float32);
        let hidden = graph.add_tensor(vec![2], DataType::Float32);
        let consumer = graph.add_operator(OperatorKind::relu(), &[hidden], None).unwrap();
        let producer = graph
            .add_operator(OperatorKind::relu(), &[a], Some(&[hidden]))
            .unwrap();
        assert!(!graph.is_sorted());

        assert!(graph.topo_sort());
        assert!(graph.is_sorted());
        let order: Vec<OperatorId> = graph.operators().map(|op| op.id()).collect();
        assert_eq!(order, vec![producer, consumer]);
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_adding_operator_clears_sorted_flag() {
        let mut graph = Graph::new(Arc::new(CpuRuntime::new())).unwrap();
        let a = graph.add_tensor(vec![2], DataType::Float32);
        graph.add_operator(OperatorKind::relu(), &[a], None).unwrap();
        assert!(graph.topo_sort());
        graph.add_operator(OperatorKind::relu(), &[a], None).unwrap();
        assert!(!graph.is_sorted());
    }

    #[test]
    fn test_cycle_keeps_order() {
        let mut graph = Graph::new(Arc::new(CpuRuntime::new())).unwrap();
        let x = graph.add_tensor(vec![2], DataType::Float32);
        let y = graph.add_tensor(vec![2], DataType::Float32);
        let first = graph.add_operator(OperatorKind::relu(), &[x], Some(&[y])).unwrap();
        let second = graph.add_operator(OperatorKind::relu(), &[y], Some(&[x])).unwrap();

        assert!(!graph.topo_sort());
        assert!(!graph.is_sorted());
        let order: Vec<OperatorId> = graph.operators().map(|op| op.id()).collect();
        assert_eq!(order, vec![first, second]);
        assert_eq!(graph.find_cycle(), Some(vec![first, second]));
    }
}
