pub mod graph_optimizer;
pub mod passes;
