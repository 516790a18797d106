use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration parsing error: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Shape inference failed: {0}")]
    ShapeInference(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Runtime mismatch: {0}")]
    RuntimeMismatch(String),

    #[error("Operator {0} is already connected")]
    AlreadyConnected(usize),

    #[error("Graph must be topologically sorted first")]
    NotSorted,

    #[error("Graph contains a dependency cycle")]
    CyclicGraph,

    #[error("No free block of {requested} bytes (capacity: {capacity}, used: {used})")]
    CapacityExhausted {
        requested: usize,
        capacity: usize,
        used: usize,
    },

    #[error("Invalid free: {0}")]
    InvalidFree(String),

    #[error("Allocator was frozen when its backing memory was materialized")]
    AllocatorFrozen,

    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl Error {
    /// Whether this error signals a caller bug that must abort the build
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::InvalidOperator(_)
                | Error::ShapeInference(_)
                | Error::InvalidGraph(_)
                | Error::RuntimeMismatch(_)
                | Error::AlreadyConnected(_)
                | Error::NotSorted
                | Error::InvalidFree(_)
                | Error::AllocatorFrozen
        )
    }

    /// Whether the planning address space was too small for a request
    pub fn is_capacity_exhaustion(&self) -> bool {
        matches!(self, Error::CapacityExhausted { .. })
    }
}
