pub mod element_wise;
pub mod matmul;
