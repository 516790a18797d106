use log::debug;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::ops::registry::KernelRegistry;

use super::context::{ExecutionContext, ExecutionOptions};

/// Runs a planned graph operator by operator on the kernels of its runtime
#[derive(Debug)]
pub struct ExecutionEngine {
    registry: KernelRegistry,
    options: ExecutionOptions,
    thread_pool: Option<rayon::ThreadPool>,
}

impl ExecutionEngine {
    /// Create an engine with the CPU kernels registered
    pub fn new(options: ExecutionOptions) -> Result<Self> {
        Self::with_registry(KernelRegistry::with_cpu_kernels()?, options)
    }

    /// Create an engine over a caller-provided kernel registry
    pub fn with_registry(registry: KernelRegistry, options: ExecutionOptions) -> Result<Self> {
        let thread_pool = if options.thread_count > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.thread_count)
                .build()
                .map_err(|e| Error::ExecutionError(format!("failed to build thread pool: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            registry,
            options,
            thread_pool,
        })
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    /// Run every operator of `graph` in its current order.
    ///
    /// The graph must be sorted and its memory planned with
    /// `Graph::data_malloc`.
    pub fn run(&self, graph: &Graph) -> Result<()> {
        if !graph.is_sorted() {
            return Err(Error::NotSorted);
        }
        if !graph.allocator().is_materialized() {
            return Err(Error::ExecutionError(
                "graph memory has not been planned".to_string(),
            ));
        }

        match &self.thread_pool {
            Some(pool) => pool.install(|| self.run_operators(graph)),
            None => self.run_operators(graph),
        }
    }

    fn run_operators(&self, graph: &Graph) -> Result<()> {
        let context = ExecutionContext::new(graph);
        let device = graph.runtime().device();

        for op in graph.operators() {
            let op_type = op.kind().op_type();
            let kernel = self.registry.get_kernel(device, op_type).ok_or_else(|| {
                Error::UnsupportedFeature(format!("no {} kernel for {}", device, op_type))
            })?;
            debug!("Running operator {} ({})", op.id(), op_type);
            kernel.compute(op, &context)?;
        }
        Ok(())
    }
}
