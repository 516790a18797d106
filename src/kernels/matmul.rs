use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayView2, ArrayViewD, Axis, Ix2};

use crate::error::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::kernels::{kind_mismatch, Numeric};
use crate::ops::registry::Kernel;
use crate::ops::{Operator, OperatorKind, Tensor};

/// Batched matrix product honouring the transpose flags
#[derive(Debug, Default, Clone, Copy)]
pub struct MatMulKernel;

impl Kernel for MatMulKernel {
    fn compute(&self, op: &Operator, context: &ExecutionContext) -> Result<()> {
        let (trans_a, trans_b) = match op.kind() {
            OperatorKind::MatMul {
                trans_a, trans_b, ..
            } => (*trans_a, *trans_b),
            _ => return Err(kind_mismatch("MatMulKernel", op)),
        };
        let a = context.input(op, 0)?;
        let b = context.input(op, 1)?;
        let c = context.output(op)?;

        dispatch_numeric!(c.data_type(), T => matmul::<T>(op, trans_a, trans_b, a, b, c))
    }
}

fn matmul<T: Numeric>(
    op: &Operator,
    trans_a: bool,
    trans_b: bool,
    a: &Tensor,
    b: &Tensor,
    c: &Tensor,
) -> Result<()> {
    let a = a.view::<T>()?;
    let b = b.view::<T>()?;
    // Output memory is disjoint from both inputs
    let mut c = unsafe { c.view_mut::<T>()? };

    if c.ndim() < 2 {
        return Err(Error::ExecutionError(format!(
            "operator {} writes a rank {} tensor",
            op.id(),
            c.ndim()
        )));
    }
    let batch = c.shape()[..c.ndim() - 2].to_vec();
    let batch_count: usize = batch.iter().product();

    for linear in 0..batch_count {
        let index = unravel(linear, &batch);
        let a_mat = matrix(op, a.view(), &index, trans_a)?;
        let b_mat = matrix(op, b.view(), &index, trans_b)?;

        let mut c_mat = c.view_mut();
        for &i in &index {
            c_mat = c_mat.index_axis_move(Axis(0), i);
        }
        let mut c_mat = c_mat
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::ExecutionError(e.to_string()))?;

        if a_mat.ncols() != b_mat.nrows()
            || c_mat.dim() != (a_mat.nrows(), b_mat.ncols())
        {
            return Err(Error::ExecutionError(format!(
                "operator {} cannot multiply {:?} by {:?} into {:?}",
                op.id(),
                a_mat.dim(),
                b_mat.dim(),
                c_mat.dim()
            )));
        }

        c_mat.fill(T::zero());
        general_mat_mul(T::one(), &a_mat, &b_mat, T::one(), &mut c_mat);
    }
    Ok(())
}

/// Row-major multi-index of `linear` within `shape`
fn unravel(mut linear: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (slot, &dim) in index.iter_mut().zip(shape).rev() {
        *slot = linear % dim;
        linear /= dim;
    }
    index
}

/// The matrix of `operand` used for output batch position `index`.
///
/// Operand batch axes are right-aligned with the output's; size-1 axes
/// broadcast.
fn matrix<'a, T: Numeric>(
    op: &Operator,
    operand: ArrayViewD<'a, T>,
    index: &[usize],
    transpose: bool,
) -> Result<ArrayView2<'a, T>> {
    let batch_rank = operand.ndim().saturating_sub(2);
    if operand.ndim() < 2 || batch_rank > index.len() {
        return Err(Error::ExecutionError(format!(
            "operator {} cannot broadcast an operand of shape {:?}",
            op.id(),
            operand.shape()
        )));
    }

    let mut view = operand;
    for &i in &index[index.len() - batch_rank..] {
        let size = view.len_of(Axis(0));
        let i = if size == 1 { 0 } else { i };
        if i >= size {
            return Err(Error::ExecutionError(format!(
                "operator {} cannot broadcast batch axis of size {}",
                op.id(),
                size
            )));
        }
        view = view.index_axis_move(Axis(0), i);
    }

    let view = view
        .into_dimensionality::<Ix2>()
        .map_err(|e| Error::ExecutionError(e.to_string()))?;
    Ok(if transpose { view.reversed_axes() } else { view })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unravel() {
        assert_eq!(unravel(0, &[]), Vec::<usize>::new());
        assert_eq!(unravel(5, &[2, 3]), vec![1, 2]);
        assert_eq!(unravel(3, &[2, 1, 2]), vec![1, 0, 1]);
    }
}
