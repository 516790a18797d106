use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::debug;

use crate::config::OptimizationLevel;
use crate::error::{Error, Result};
use crate::graph::Graph;

/// Result of running an optimization pass
#[derive(Debug, Clone)]
pub struct PassResult {
    /// Name of the pass
    pub name: String,
    /// Number of rewrites applied
    pub optimizations_applied: usize,
    /// Duration of the pass
    pub duration: Duration,
    /// Whether the pass made any changes
    pub changed: bool,
}

/// Statistics from running optimization passes
#[derive(Debug, Clone, Default)]
pub struct OptimizationStats {
    /// Results from each pass, in the order they ran
    pub pass_results: Vec<PassResult>,
    /// Total number of rewrites applied
    pub total_optimizations: usize,
    /// Total time spent optimizing
    pub total_duration: Duration,
}

impl OptimizationStats {
    /// Create a new optimization stats object
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass result
    pub fn add_pass_result(&mut self, result: PassResult) {
        self.total_optimizations += result.optimizations_applied;
        self.total_duration += result.duration;
        self.pass_results.push(result);
    }

    /// Rewrites applied by the pass called `name`
    pub fn applied(&self, name: &str) -> usize {
        self.pass_results
            .iter()
            .filter(|result| result.name == name)
            .map(|result| result.optimizations_applied)
            .sum()
    }
}

/// Trait for graph optimization passes
pub trait OptimizationPass: Send + Sync {
    /// Name of the pass
    fn name(&self) -> &str;

    /// Run the pass on the graph
    fn run(&self, graph: &mut Graph) -> Result<PassResult>;

    /// Dependencies of this pass (names of passes that must run before this one)
    fn dependencies(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// Graph optimizer that applies optimization passes
pub struct GraphOptimizer {
    /// Registered optimization passes
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphOptimizer {
    /// Create a new graph optimizer
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Register an optimization pass
    pub fn register_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    /// Register default passes
    pub fn with_default_passes(mut self) -> Self {
        for pass in Self::create_default_passes(OptimizationLevel::Standard) {
            self.register_pass(pass);
        }
        self
    }

    /// Create default passes for the given optimization level
    pub fn create_default_passes(level: OptimizationLevel) -> Vec<Box<dyn OptimizationPass>> {
        use crate::optimization::passes::fusion::{TransposeFusion, TransposeMatMulFusion};

        match level {
            OptimizationLevel::None => Vec::new(),
            OptimizationLevel::Basic => {
                vec![Box::new(TransposeFusion::new()) as Box<dyn OptimizationPass>]
            }
            OptimizationLevel::Standard => {
                vec![
                    Box::new(TransposeFusion::new()) as Box<dyn OptimizationPass>,
                    Box::new(TransposeMatMulFusion::new()) as Box<dyn OptimizationPass>,
                ]
            }
        }
    }

    /// Optimize the graph with the given optimization level
    pub fn optimize(&self, graph: &mut Graph, level: OptimizationLevel) -> Result<OptimizationStats> {
        let passes = Self::create_default_passes(level);
        self.run_passes(graph, &passes)
    }

    /// Run the registered passes
    pub fn run(&self, graph: &mut Graph) -> Result<OptimizationStats> {
        self.run_passes(graph, &self.passes)
    }

    /// Run multiple passes, each after the passes it depends on
    pub fn run_passes(
        &self,
        graph: &mut Graph,
        passes: &[Box<dyn OptimizationPass>],
    ) -> Result<OptimizationStats> {
        let mut stats = OptimizationStats::new();

        let sorted_passes = self.sort_passes_by_dependencies(passes)?;

        for pass in sorted_passes {
            let result = pass.run(graph)?;
            debug!(
                "Pass {} applied {} rewrites in {:?}",
                result.name, result.optimizations_applied, result.duration
            );
            stats.add_pass_result(result);
        }

        Ok(stats)
    }

    /// Sort passes by dependencies
    fn sort_passes_by_dependencies<'a>(
        &self,
        passes: &'a [Box<dyn OptimizationPass>],
    ) -> Result<Vec<&'a dyn OptimizationPass>> {
        let mut sorted_passes = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();

        let mut dep_graph: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut pass_map: HashMap<&str, &dyn OptimizationPass> = HashMap::new();

        for pass in passes {
            let name = pass.name();
            dep_graph.insert(name, pass.dependencies());
            pass_map.insert(name, pass.as_ref());
        }

        for pass in passes {
            let name = pass.name();
            if !visited.contains(name) {
                self.dfs_sort(
                    name,
                    &dep_graph,
                    &pass_map,
                    &mut visited,
                    &mut visiting,
                    &mut sorted_passes,
                )?;
            }
        }

        Ok(sorted_passes)
    }

    /// DFS helper for topological sort
    fn dfs_sort<'a, 'n>(
        &self,
        pass_name: &'n str,
        dep_graph: &HashMap<&'n str, Vec<&'n str>>,
        pass_map: &HashMap<&'n str, &'a dyn OptimizationPass>,
        visited: &mut HashSet<&'n str>,
        visiting: &mut HashSet<&'n str>,
        sorted_passes: &mut Vec<&'a dyn OptimizationPass>,
    ) -> Result<()> {
        if visited.contains(pass_name) {
            return Ok(());
        }

        if visiting.contains(pass_name) {
            return Err(Error::InvalidGraph(format!(
                "Cycle detected in optimization pass dependencies: {}",
                pass_name
            )));
        }

        visiting.insert(pass_name);

        if let Some(deps) = dep_graph.get(pass_name) {
            for &dep in deps {
                if !pass_map.contains_key(dep) {
                    return Err(Error::InvalidGraph(format!(
                        "Optimization pass '{}' depends on '{}', which is not registered",
                        pass_name, dep
                    )));
                }

                self.dfs_sort(dep, dep_graph, pass_map, visited, visiting, sorted_passes)?;
            }
        }

        visiting.remove(pass_name);
        visited.insert(pass_name);

        if let Some(&pass) = pass_map.get(pass_name) {
            sorted_passes.push(pass);
        }

        Ok(())
    }
}
