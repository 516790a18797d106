//! CPU kernels.
//!
//! Kernels work on ndarray views over the memory `Graph::data_malloc` bound
//! to each tensor. They read their inputs and overwrite their output.

use std::fmt::Debug;

use ndarray::LinalgScalar;
use num_traits::{Bounded, NumCast};

use crate::error::Error;
use crate::ops::{Element, Operator};

/// Run `$body` with `$t` bound to the Rust type of `$data_type`
macro_rules! dispatch_numeric {
    ($data_type:expr, $t:ident => $body:expr) => {
        match $data_type {
            $crate::ops::DataType::Float32 => {
                type $t = f32;
                $body
            }
            $crate::ops::DataType::Float64 => {
                type $t = f64;
                $body
            }
            $crate::ops::DataType::Int32 => {
                type $t = i32;
                $body
            }
            $crate::ops::DataType::Int64 => {
                type $t = i64;
                $body
            }
            $crate::ops::DataType::UInt32 => {
                type $t = u32;
                $body
            }
            other => Err($crate::error::Error::UnsupportedFeature(format!(
                "no CPU kernel for {} tensors",
                other
            ))),
        }
    };
}

mod concat;
mod element_wise;
mod matmul;
mod transpose;
mod unary;

pub use concat::ConcatKernel;
pub use element_wise::ElementWiseKernel;
pub use matmul::MatMulKernel;
pub use transpose::TransposeKernel;
pub use unary::{CastKernel, ClipKernel, ReluKernel};

/// Element types the CPU kernels compute on
pub trait Numeric: Element + LinalgScalar + PartialOrd + NumCast + Bounded + Debug + Send + Sync {}

impl<T> Numeric for T where T: Element + LinalgScalar + PartialOrd + NumCast + Bounded + Debug + Send + Sync {}

fn kind_mismatch(kernel: &str, op: &Operator) -> Error {
    Error::ExecutionError(format!(
        "{} cannot run operator {} ({})",
        kernel,
        op.id(),
        op.kind()
    ))
}

fn shape_mismatch(op: &Operator, expected: &[usize], found: &[usize]) -> Error {
    Error::ExecutionError(format!(
        "operator {} expects shape {:?}, found {:?}",
        op.id(),
        expected,
        found
    ))
}
