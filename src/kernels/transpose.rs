use crate::error::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::kernels::{kind_mismatch, shape_mismatch, Numeric};
use crate::ops::registry::Kernel;
use crate::ops::transpose::is_permutation;
use crate::ops::{Operator, OperatorKind, Tensor};

#[derive(Debug, Default, Clone, Copy)]
pub struct TransposeKernel;

impl Kernel for TransposeKernel {
    fn compute(&self, op: &Operator, context: &ExecutionContext) -> Result<()> {
        let permute = match op.kind() {
            OperatorKind::Transpose { permute } => permute.as_slice(),
            _ => return Err(kind_mismatch("TransposeKernel", op)),
        };
        let input = context.input(op, 0)?;
        let output = context.output(op)?;
        if permute.len() != input.rank() || !is_permutation(permute) {
            return Err(Error::ExecutionError(format!(
                "operator {} cannot permute a rank {} tensor with {:?}",
                op.id(),
                input.rank(),
                permute
            )));
        }

        dispatch_numeric!(output.data_type(), T => transpose::<T>(op, permute, input, output))
    }
}

fn transpose<T: Numeric>(
    op: &Operator,
    permute: &[usize],
    input: &Tensor,
    output: &Tensor,
) -> Result<()> {
    let permuted = input.view::<T>()?.permuted_axes(permute);
    // Output memory is disjoint from the input
    let mut output = unsafe { output.view_mut::<T>()? };
    if output.shape() != permuted.shape() {
        return Err(shape_mismatch(op, output.shape(), permuted.shape()));
    }
    output.assign(&permuted);
    Ok(())
}
