use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default size of the planning address space (512 MiB)
pub const DEFAULT_MEMORY_CAPACITY: usize = 512 << 20;

/// Default alignment quantum, the width of the widest supported element
pub const DEFAULT_ALIGNMENT: usize = std::mem::size_of::<u64>();

/// Which fusion rules `Graph::optimize` applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationLevel {
    /// No rewriting
    None,
    /// Only transpose/transpose fusion
    Basic,
    /// Transpose/transpose fusion followed by transpose/matmul fusion
    Standard,
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        OptimizationLevel::Standard
    }
}

/// Options for building and planning a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    /// Size in bytes of the simulated address space handed to the allocator
    pub memory_capacity: usize,
    /// Alignment quantum in bytes for every planned buffer
    pub alignment: usize,
    /// Rewrites applied by `Graph::optimize`
    pub optimization_level: OptimizationLevel,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            alignment: DEFAULT_ALIGNMENT,
            optimization_level: OptimizationLevel::Standard,
        }
    }
}

impl PlannerOptions {
    /// Create a new options object with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity of the planning address space
    pub fn set_memory_capacity(mut self, memory_capacity: usize) -> Self {
        self.memory_capacity = memory_capacity;
        self
    }

    /// Set the alignment quantum
    pub fn set_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the optimization level
    pub fn set_optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    /// Parse options from a JSON document, missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: PlannerOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check that the options describe a usable planner
    pub fn validate(&self) -> Result<()> {
        check_alignment(self.alignment)
    }
}

/// Alignment must be a power of two no smaller than `DEFAULT_ALIGNMENT`, so
/// every planned offset suits every supported element type.
pub(crate) fn check_alignment(alignment: usize) -> Result<()> {
    if !alignment.is_power_of_two() || alignment < DEFAULT_ALIGNMENT {
        return Err(Error::InvalidConfig(format!(
            "alignment must be a power of two of at least {} bytes, got {}",
            DEFAULT_ALIGNMENT, alignment
        )));
    }
    Ok(())
}
