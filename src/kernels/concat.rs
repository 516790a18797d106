use ndarray::{Axis, Slice};

use crate::error::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::kernels::{kind_mismatch, shape_mismatch, Numeric};
use crate::ops::concat::normalize_axis;
use crate::ops::registry::Kernel;
use crate::ops::{Operator, OperatorKind, Tensor};

#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatKernel;

impl Kernel for ConcatKernel {
    fn compute(&self, op: &Operator, context: &ExecutionContext) -> Result<()> {
        let axis = match op.kind() {
            OperatorKind::Concat { axis } => *axis,
            _ => return Err(kind_mismatch("ConcatKernel", op)),
        };
        let inputs = context.inputs(op)?;
        let output = context.output(op)?;
        let axis = normalize_axis(axis, output.rank())?;

        dispatch_numeric!(output.data_type(), T => concat::<T>(op, axis, &inputs, output))
    }
}

fn concat<T: Numeric>(op: &Operator, axis: usize, inputs: &[&Tensor], output: &Tensor) -> Result<()> {
    // Output memory is disjoint from every input
    let mut output = unsafe { output.view_mut::<T>()? };
    let total = output.len_of(Axis(axis));

    let mut start = 0;
    for input in inputs {
        let view = input.view::<T>()?;
        if view.ndim() != output.ndim() {
            return Err(shape_mismatch(op, output.shape(), view.shape()));
        }
        let len = view.len_of(Axis(axis));
        if start + len > total {
            return Err(Error::ExecutionError(format!(
                "operator {} inputs overflow concat axis of size {}",
                op.id(),
                total
            )));
        }

        let mut part = output.slice_axis_mut(Axis(axis), Slice::from(start..start + len));
        if part.shape() != view.shape() {
            return Err(shape_mismatch(op, part.shape(), view.shape()));
        }
        part.assign(&view);
        start += len;
    }
    Ok(())
}
