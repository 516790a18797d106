use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::memory::Runtime;
use crate::model::TensorId;
use crate::ops::{Operator, Tensor};

/// Options for execution engine
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Number of threads to use (0 = use system default)
    pub thread_count: usize,
}

impl ExecutionOptions {
    /// Create a new execution options object
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of threads to use
    pub fn set_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }
}

/// What a kernel can see while it runs: the planned graph and its runtime
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    graph: &'a Graph,
}

impl<'a> ExecutionContext<'a> {
    /// Create a context over a planned graph
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn runtime(&self) -> &'a dyn Runtime {
        self.graph.runtime().as_ref()
    }

    /// Get a tensor by id
    pub fn tensor(&self, id: TensorId) -> Result<&'a Tensor> {
        self.graph.lookup_tensor(id)
    }

    /// Input `slot` of `op`
    pub fn input(&self, op: &Operator, slot: usize) -> Result<&'a Tensor> {
        let id = op.inputs().get(slot).copied().ok_or_else(|| {
            Error::ExecutionError(format!("operator {} has no input {}", op.id(), slot))
        })?;
        self.tensor(id)
    }

    /// Every input of `op`, in slot order
    pub fn inputs(&self, op: &Operator) -> Result<Vec<&'a Tensor>> {
        op.inputs().iter().map(|&id| self.tensor(id)).collect()
    }

    /// The output of `op`
    pub fn output(&self, op: &Operator) -> Result<&'a Tensor> {
        self.tensor(op.output())
    }
}
