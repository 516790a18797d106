use std::time::Instant;

use log::debug;

use crate::error::Result;
use crate::graph::Graph;
use crate::model::{OperatorId, TensorId};
use crate::ops::transpose::{is_self_inverse, swaps_last_two_axes};
use crate::ops::OperatorKind;
use crate::optimization::graph_optimizer::{OptimizationPass, PassResult};

/// Two back-to-back transposes with the same permutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransposePair {
    pub first: OperatorId,
    pub second: OperatorId,
    /// Input of the first transpose
    pub input: TensorId,
    /// Tensor between the two transposes
    pub middle: TensorId,
    /// Output of the second transpose
    pub output: TensorId,
    /// Sole consumer of `output`
    pub consumer: OperatorId,
}

/// A last-two-axes transpose feeding a MatMul
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransposeMatMul {
    pub transpose: OperatorId,
    pub matmul: OperatorId,
    /// Input of the transpose
    pub input: TensorId,
    /// Output of the transpose, read by the MatMul
    pub output: TensorId,
}

/// Sole consumer of `tensor`, if it has exactly one
fn sole_consumer(graph: &Graph, tensor: TensorId) -> Option<OperatorId> {
    match graph.tensor(tensor)?.targets() {
        [consumer] => Some(*consumer),
        _ => None,
    }
}

fn transpose_permutation(graph: &Graph, op: OperatorId) -> Option<&[usize]> {
    match graph.operator(op)?.kind() {
        OperatorKind::Transpose { permute } => Some(permute),
        _ => None,
    }
}

/// Removes pairs of identical transposes.
///
/// `T(p) -> T(p) -> D` becomes `D` reading the first transpose's input. The
/// two transposes and both tensors they produced are removed.
pub struct TransposeFusion {
    name: String,
}

impl Default for TransposeFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl TransposeFusion {
    pub fn new() -> Self {
        Self {
            name: "TransposeFusion".to_string(),
        }
    }

    /// Match the pattern starting at `first`
    pub fn find_match(&self, graph: &Graph, first: OperatorId) -> Option<TransposePair> {
        let permute = transpose_permutation(graph, first)?;
        // Two equal transposes cancel only if the permutation is its own inverse
        if !is_self_inverse(permute) {
            return None;
        }
        let first_op = graph.operator(first)?;
        let input = *first_op.inputs().first()?;
        let middle = first_op.output();

        let second = sole_consumer(graph, middle)?;
        if transpose_permutation(graph, second)? != permute {
            return None;
        }
        let output = graph.operator(second)?.output();
        let consumer = sole_consumer(graph, output)?;

        Some(TransposePair {
            first,
            second,
            input,
            middle,
            output,
            consumer,
        })
    }

    /// Rewrite one matched pair
    pub fn apply(&self, graph: &mut Graph, pair: &TransposePair) {
        graph.reroute_input(pair.consumer, pair.output, pair.input);
        graph.erase_operator(pair.second);
        graph.erase_operator(pair.first);
        graph.erase_tensor(pair.middle);
        graph.erase_tensor(pair.output);
        debug!(
            "Fused transposes {} and {}, operator {} now reads tensor {}",
            pair.first, pair.second, pair.consumer, pair.input
        );
    }
}

impl OptimizationPass for TransposeFusion {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let start_time = Instant::now();
        let mut count = 0;

        let candidates: Vec<OperatorId> = graph.operators().map(|op| op.id()).collect();
        for id in candidates {
            // Earlier rewrites may have removed this operator
            if let Some(pair) = self.find_match(graph, id) {
                self.apply(graph, &pair);
                count += 1;
            }
        }

        Ok(PassResult {
            name: self.name.clone(),
            optimizations_applied: count,
            duration: start_time.elapsed(),
            changed: count > 0,
        })
    }
}

/// Folds a last-two-axes transpose into the MatMul that reads it.
///
/// The MatMul's transpose flag for that operand is toggled and the operand
/// is repointed to the transpose's input.
pub struct TransposeMatMulFusion {
    name: String,
}

impl Default for TransposeMatMulFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl TransposeMatMulFusion {
    pub fn new() -> Self {
        Self {
            name: "TransposeMatMulFusion".to_string(),
        }
    }

    /// Match the pattern starting at `transpose`
    pub fn find_match(&self, graph: &Graph, transpose: OperatorId) -> Option<TransposeMatMul> {
        if !swaps_last_two_axes(transpose_permutation(graph, transpose)?) {
            return None;
        }
        let op = graph.operator(transpose)?;
        let input = *op.inputs().first()?;
        let output = op.output();

        let matmul = sole_consumer(graph, output)?;
        match graph.operator(matmul)?.kind() {
            OperatorKind::MatMul { .. } => Some(TransposeMatMul {
                transpose,
                matmul,
                input,
                output,
            }),
            _ => None,
        }
    }

    /// Rewrite one match
    pub fn apply(&self, graph: &mut Graph, pattern: &TransposeMatMul) -> Result<()> {
        let slots = graph.reroute_input(pattern.matmul, pattern.output, pattern.input);
        if let Some(op) = graph.operator_mut(pattern.matmul) {
            if let OperatorKind::MatMul {
                trans_a, trans_b, ..
            } = op.kind_mut()
            {
                for slot in &slots {
                    match slot {
                        0 => *trans_a = !*trans_a,
                        _ => *trans_b = !*trans_b,
                    }
                }
            }
        }
        graph.erase_operator(pattern.transpose);
        graph.erase_tensor(pattern.output);

        // Cached m/n/k follow the new operands
        graph.refresh_operator(pattern.matmul)?;
        debug!(
            "Fused transpose {} into matmul {} (operand slots {:?})",
            pattern.transpose, pattern.matmul, slots
        );
        Ok(())
    }
}

impl OptimizationPass for TransposeMatMulFusion {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let start_time = Instant::now();
        let mut count = 0;

        let candidates: Vec<OperatorId> = graph.operators().map(|op| op.id()).collect();
        for id in candidates {
            if let Some(pattern) = self.find_match(graph, id) {
                self.apply(graph, &pattern)?;
                count += 1;
            }
        }

        Ok(PassResult {
            name: self.name.clone(),
            optimizations_applied: count,
            duration: start_time.elapsed(),
            changed: count > 0,
        })
    }

    fn dependencies(&self) -> Vec<&str> {
        vec!["TransposeFusion"]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::CpuRuntime;
    use crate::ops::{DataType, OpType};

    fn graph() -> Graph {
        Graph::new(Arc::new(CpuRuntime::new())).unwrap()
    }

    #[test]
    fn test_transpose_pair_removed() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3, 4], DataType::Float32);
        let other = graph.add_tensor(vec![2, 3, 4], DataType::Float32);
        let t1 = graph
            .add_operator(OperatorKind::transpose(vec![0, 2, 1]), &[x], None)
            .unwrap();
        let middle = graph.operator(t1).unwrap().output();
        let t2 = graph
            .add_operator(OperatorKind::transpose(vec![0, 2, 1]), &[middle], None)
            .unwrap();
        let y = graph.operator(t2).unwrap().output();
        let add = graph.add_operator(OperatorKind::add(), &[y, other], None).unwrap();

        let result = TransposeFusion::new().run(&mut graph).unwrap();
        assert_eq!(result.optimizations_applied, 1);
        assert!(result.changed);

        assert_eq!(graph.num_operators(), 1);
        assert_eq!(graph.operator(add).unwrap().inputs(), &[x, other]);
        assert_eq!(graph.tensor(x).unwrap().targets(), &[add]);
        assert!(graph.tensor(middle).is_none());
        assert!(graph.tensor(y).is_none());
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_different_permutations_are_kept() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3, 4], DataType::Float32);
        let t1 = graph
            .add_operator(OperatorKind::transpose(vec![0, 2, 1]), &[x], None)
            .unwrap();
        let middle = graph.operator(t1).unwrap().output();
        let t2 = graph
            .add_operator(OperatorKind::transpose(vec![1, 0, 2]), &[middle], None)
            .unwrap();
        let y = graph.operator(t2).unwrap().output();
        graph.add_operator(OperatorKind::relu(), &[y], None).unwrap();

        let result = TransposeFusion::new().run(&mut graph).unwrap();
        assert_eq!(result.optimizations_applied, 0);
        assert_eq!(graph.num_operators(), 3);
    }

    #[test]
    fn test_equal_cyclic_permutations_are_kept() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3, 4], DataType::Float32);
        let t1 = graph
            .add_operator(OperatorKind::transpose(vec![2, 0, 1]), &[x], None)
            .unwrap();
        let middle = graph.operator(t1).unwrap().output();
        let t2 = graph
            .add_operator(OperatorKind::transpose(vec![2, 0, 1]), &[middle], None)
            .unwrap();
        let y = graph.operator(t2).unwrap().output();
        assert_eq!(graph.tensor(y).unwrap().shape(), &[3, 4, 2]);
        let relu = graph.add_operator(OperatorKind::relu(), &[y], None).unwrap();

        assert!(TransposeFusion::new().find_match(&graph, t1).is_none());
        let result = TransposeFusion::new().run(&mut graph).unwrap();
        assert_eq!(result.optimizations_applied, 0);
        assert_eq!(graph.operator(relu).unwrap().inputs(), &[y]);
    }

    #[test]
    fn test_pair_without_consumer_is_kept() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3], DataType::Float32);
        let t1 = graph.add_operator(OperatorKind::transpose(vec![1, 0]), &[x], None).unwrap();
        let middle = graph.operator(t1).unwrap().output();
        graph
            .add_operator(OperatorKind::transpose(vec![1, 0]), &[middle], None)
            .unwrap();

        assert!(TransposeFusion::new().find_match(&graph, t1).is_none());
    }

    #[test]
    fn test_shared_intermediate_is_kept() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3], DataType::Float32);
        let t1 = graph.add_operator(OperatorKind::transpose(vec![1, 0]), &[x], None).unwrap();
        let middle = graph.operator(t1).unwrap().output();
        let t2 = graph
            .add_operator(OperatorKind::transpose(vec![1, 0]), &[middle], None)
            .unwrap();
        let y = graph.operator(t2).unwrap().output();
        graph.add_operator(OperatorKind::relu(), &[y], None).unwrap();
        graph.add_operator(OperatorKind::relu(), &[middle], None).unwrap();

        assert!(TransposeFusion::new().find_match(&graph, t1).is_none());
    }

    #[test]
    fn test_chain_of_four_collapses() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3], DataType::Float32);
        let mut current = x;
        for _ in 0..4 {
            let t = graph
                .add_operator(OperatorKind::transpose(vec![1, 0]), &[current], None)
                .unwrap();
            current = graph.operator(t).unwrap().output();
        }
        let relu = graph.add_operator(OperatorKind::relu(), &[current], None).unwrap();

        let result = TransposeFusion::new().run(&mut graph).unwrap();
        assert_eq!(result.optimizations_applied, 2);
        assert_eq!(graph.num_operators(), 1);
        assert_eq!(graph.operator(relu).unwrap().inputs(), &[x]);
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_transpose_folded_into_matmul() {
        let mut graph = graph();
        let a = graph.add_tensor(vec![3, 2], DataType::Float32);
        let b = graph.add_tensor(vec![3, 4], DataType::Float32);
        let t = graph.add_operator(OperatorKind::transpose(vec![1, 0]), &[a], None).unwrap();
        let a_t = graph.operator(t).unwrap().output();
        let matmul = graph
            .add_operator(OperatorKind::matmul(false, false), &[a_t, b], None)
            .unwrap();
        let c = graph.operator(matmul).unwrap().output();

        let result = TransposeMatMulFusion::new().run(&mut graph).unwrap();
        assert_eq!(result.optimizations_applied, 1);

        let op = graph.operator(matmul).unwrap();
        assert_eq!(op.inputs(), &[a, b]);
        assert_eq!(
            op.kind(),
            &OperatorKind::MatMul {
                trans_a: true,
                trans_b: false,
                m: 2,
                n: 3,
                k: 4
            }
        );
        assert!(op.predecessors().is_empty());
        assert_eq!(graph.tensor(c).unwrap().shape(), &[2, 4]);
        assert!(graph.tensor(a_t).is_none());
        assert_eq!(graph.num_operators(), 1);
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_batched_operand_b_is_folded() {
        let mut graph = graph();
        let a = graph.add_tensor(vec![5, 2, 3], DataType::Float32);
        let b = graph.add_tensor(vec![5, 4, 3], DataType::Float32);
        let t = graph
            .add_operator(OperatorKind::transpose(vec![0, 2, 1]), &[b], None)
            .unwrap();
        let b_t = graph.operator(t).unwrap().output();
        let matmul = graph
            .add_operator(OperatorKind::matmul(false, false), &[a, b_t], None)
            .unwrap();

        TransposeMatMulFusion::new().run(&mut graph).unwrap();
        let op = graph.operator(matmul).unwrap();
        assert_eq!(op.inputs(), &[a, b]);
        assert!(matches!(
            op.kind(),
            OperatorKind::MatMul { trans_a: false, trans_b: true, .. }
        ));
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_batch_axis_permutation_is_not_folded() {
        let mut graph = graph();
        let a = graph.add_tensor(vec![2, 2, 3], DataType::Float32);
        let b = graph.add_tensor(vec![2, 3, 4], DataType::Float32);
        let t = graph
            .add_operator(OperatorKind::transpose(vec![1, 0, 2]), &[a], None)
            .unwrap();
        let a_t = graph.operator(t).unwrap().output();
        graph
            .add_operator(OperatorKind::matmul(false, false), &[a_t, b], None)
            .unwrap();

        let result = TransposeMatMulFusion::new().run(&mut graph).unwrap();
        assert_eq!(result.optimizations_applied, 0);
        assert!(graph.operators().any(|op| op.op_type() == OpType::Transpose));
    }
}
