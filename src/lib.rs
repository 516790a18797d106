pub mod config;
pub mod error;
pub mod execution;
pub mod graph;
pub mod kernels;
pub mod memory;
pub mod model;
pub mod ops;
pub mod optimization;

// Re-export commonly used types
pub use config::{OptimizationLevel, PlannerOptions};
pub use error::{Error, Result};
pub use execution::context::{ExecutionContext, ExecutionOptions};
pub use execution::engine::ExecutionEngine;
pub use graph::Graph;
pub use memory::{Allocator, Blob, CpuRuntime, Device, Runtime};
pub use model::{FamilyId, IdGenerator, OperatorId, TensorId};
pub use ops::registry::{Kernel, KernelRegistry};
pub use ops::{DataType, Element, OpType, Operator, OperatorKind, Tensor};
pub use optimization::graph_optimizer::{
    GraphOptimizer, OptimizationPass, OptimizationStats, PassResult,
};
