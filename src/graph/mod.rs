mod builder;
mod planning;
mod rewrite;
mod schedule;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::config::PlannerOptions;
use crate::error::{Error, Result};
use crate::memory::{Allocator, Runtime};
use crate::model::{FamilyId, IdGenerator, OperatorId, TensorId};
use crate::ops::{DataType, Operator, Shape, Tensor};
use crate::optimization::graph_optimizer::{GraphOptimizer, OptimizationStats};

/// A dataflow graph of operators and tensors.
///
/// The graph owns every tensor and operator; edges between them are stored
/// as ids on both ends and kept symmetric by the graph's own mutators.
/// Tensors and operators keep their insertion order, which `topo_sort`
/// replaces with a schedule for the operators.
#[derive(Debug)]
pub struct Graph {
    runtime: Arc<dyn Runtime>,
    options: PlannerOptions,
    ids: IdGenerator,
    tensors: HashMap<TensorId, Tensor>,
    tensor_order: Vec<TensorId>,
    operators: HashMap<OperatorId, Operator>,
    operator_order: Vec<OperatorId>,
    sorted: bool,
    allocator: Allocator,
}

impl Graph {
    /// Create an empty graph on `runtime` with default planner options
    pub fn new(runtime: Arc<dyn Runtime>) -> Result<Self> {
        Self::with_options(runtime, PlannerOptions::default())
    }

    /// Create an empty graph on `runtime`
    pub fn with_options(runtime: Arc<dyn Runtime>, options: PlannerOptions) -> Result<Self> {
        options.validate()?;
        let allocator = Allocator::new(runtime.clone(), options.memory_capacity, options.alignment)?;

        Ok(Self {
            runtime,
            options,
            ids: IdGenerator::new(),
            tensors: HashMap::new(),
            tensor_order: Vec::new(),
            operators: HashMap::new(),
            operator_order: Vec::new(),
            sorted: false,
            allocator,
        })
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    /// Add a fresh tensor with a new family
    pub fn add_tensor(&mut self, shape: Shape, data_type: DataType) -> TensorId {
        let id = self.ids.tensor_id();
        let fuid = self.ids.family_id();
        self.insert_tensor(Tensor::new(id, fuid, shape, data_type, self.runtime.clone()));
        id
    }

    /// Add a clone of `tensor`, typically one owned by another graph.
    ///
    /// The clone keeps the shape, element type and family id but gets a new
    /// instance id and no edges. Both graphs must share a runtime.
    pub fn add_tensor_from(&mut self, tensor: &Tensor) -> Result<TensorId> {
        let same_runtime = Arc::as_ptr(&self.runtime) as *const ()
            == Arc::as_ptr(tensor.runtime()) as *const ();
        if !same_runtime {
            return Err(Error::RuntimeMismatch(format!(
                "tensor {} lives on runtime {}, graph uses {}",
                tensor.id(),
                tensor.runtime().name(),
                self.runtime.name()
            )));
        }

        let id = self.ids.tensor_id();
        self.insert_tensor(Tensor::new(
            id,
            tensor.fuid(),
            tensor.shape().to_vec(),
            tensor.data_type(),
            self.runtime.clone(),
        ));
        Ok(id)
    }

    fn insert_tensor(&mut self, tensor: Tensor) {
        self.tensor_order.push(tensor.id());
        self.tensors.insert(tensor.id(), tensor);
    }

    pub fn tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(&id)
    }

    /// Mutable access for shape updates and data transfers
    pub fn tensor_mut(&mut self, id: TensorId) -> Option<&mut Tensor> {
        self.tensors.get_mut(&id)
    }

    pub fn operator(&self, id: OperatorId) -> Option<&Operator> {
        self.operators.get(&id)
    }

    pub(crate) fn operator_mut(&mut self, id: OperatorId) -> Option<&mut Operator> {
        self.operators.get_mut(&id)
    }

    /// Find the tensor belonging to family `fuid`
    pub fn get_tensor(&self, fuid: FamilyId) -> Option<&Tensor> {
        self.tensors().find(|tensor| tensor.fuid() == fuid)
    }

    /// Tensors in insertion order
    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> + '_ {
        self.tensor_order.iter().filter_map(move |id| self.tensors.get(id))
    }

    /// Operators in their current order, which is the schedule once sorted
    pub fn operators(&self) -> impl Iterator<Item = &Operator> + '_ {
        self.operator_order.iter().filter_map(move |id| self.operators.get(id))
    }

    pub fn num_tensors(&self) -> usize {
        self.tensor_order.len()
    }

    pub fn num_operators(&self) -> usize {
        self.operator_order.len()
    }

    /// Whether the operator order is a valid schedule
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Planner for the graph's memory
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Apply the fusion passes selected by the planner options
    pub fn optimize(&mut self) -> Result<OptimizationStats> {
        let level = self.options.optimization_level;
        GraphOptimizer::new().optimize(self, level)
    }

    pub(crate) fn lookup_tensor(&self, id: TensorId) -> Result<&Tensor> {
        self.tensors
            .get(&id)
            .ok_or_else(|| Error::InvalidGraph(format!("tensor {} is not in the graph", id)))
    }

    pub(crate) fn lookup_operator(&self, id: OperatorId) -> Result<&Operator> {
        self.operators
            .get(&id)
            .ok_or_else(|| Error::InvalidGraph(format!("operator {} is not in the graph", id)))
    }

    /// Check every structural invariant of the graph.
    ///
    /// Edges must be recorded on both ends, predecessor and successor lists
    /// must match what the tensors imply, every tensor must be connected to
    /// some operator and family ids must be unique.
    pub fn check_valid(&self) -> Result<()> {
        if self.tensor_order.len() != self.tensors.len()
            || self.operator_order.len() != self.operators.len()
        {
            return Err(Error::InvalidGraph(
                "entity order does not match the owned entities".to_string(),
            ));
        }

        let mut families = HashSet::new();
        for tensor in self.tensors() {
            let id = tensor.id();
            if tensor.source().is_none() && tensor.targets().is_empty() {
                return Err(Error::InvalidGraph(format!(
                    "tensor {} is not connected to any operator",
                    id
                )));
            }
            if !families.insert(tensor.fuid()) {
                return Err(Error::InvalidGraph(format!(
                    "family id {} is used by more than one tensor",
                    tensor.fuid()
                )));
            }
            if let Some(source) = tensor.source() {
                if !self.lookup_operator(source)?.outputs().contains(&id) {
                    return Err(Error::InvalidGraph(format!(
                        "tensor {} names operator {} as source, which does not output it",
                        id, source
                    )));
                }
            }
            for &target in tensor.targets() {
                if !self.lookup_operator(target)?.inputs().contains(&id) {
                    return Err(Error::InvalidGraph(format!(
                        "tensor {} names operator {} as target, which does not consume it",
                        id, target
                    )));
                }
            }
        }

        for op in self.operators() {
            let id = op.id();
            let mut expected_predecessors = HashSet::new();
            for &input in op.inputs() {
                let tensor = self.lookup_tensor(input)?;
                if !tensor.targets().contains(&id) {
                    return Err(Error::InvalidGraph(format!(
                        "operator {} consumes tensor {}, which does not list it as target",
                        id, input
                    )));
                }
                expected_predecessors.extend(tensor.source());
            }

            let mut expected_successors = HashSet::new();
            for &output in op.outputs() {
                let tensor = self.lookup_tensor(output)?;
                if tensor.source() != Some(id) {
                    return Err(Error::InvalidGraph(format!(
                        "operator {} outputs tensor {}, which does not list it as source",
                        id, output
                    )));
                }
                expected_successors.extend(tensor.targets().iter().copied());
            }

            let predecessors: HashSet<OperatorId> = op.predecessors().iter().copied().collect();
            if predecessors != expected_predecessors {
                return Err(Error::InvalidGraph(format!(
                    "operator {} has predecessors {:?}, its inputs imply {:?}",
                    id, predecessors, expected_predecessors
                )));
            }
            let successors: HashSet<OperatorId> = op.successors().iter().copied().collect();
            if successors != expected_successors {
                return Err(Error::InvalidGraph(format!(
                    "operator {} has successors {:?}, its outputs imply {:?}",
                    id, successors, expected_successors
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph Tensors:")?;
        for tensor in self.tensors() {
            writeln!(f, "  {}", tensor)?;
        }
        writeln!(f, "Graph operators:")?;
        for op in self.operators() {
            writeln!(f, "  {}", op)?;
        }
        Ok(())
    }
}
