use ndarray::Zip;

use crate::error::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::kernels::{kind_mismatch, shape_mismatch, Numeric};
use crate::ops::registry::Kernel;
use crate::ops::{OpType, Operator, OperatorKind, Tensor};

/// Add, Sub, Mul and Div with broadcasting
#[derive(Debug, Default, Clone, Copy)]
pub struct ElementWiseKernel;

impl Kernel for ElementWiseKernel {
    fn compute(&self, op: &Operator, context: &ExecutionContext) -> Result<()> {
        let op_type = match op.kind() {
            OperatorKind::ElementWise(op_type) => *op_type,
            _ => return Err(kind_mismatch("ElementWiseKernel", op)),
        };
        let a = context.input(op, 0)?;
        let b = context.input(op, 1)?;
        let c = context.output(op)?;

        dispatch_numeric!(c.data_type(), T => binary::<T>(op, op_type, a, b, c))
    }
}

fn binary<T: Numeric>(
    op: &Operator,
    op_type: OpType,
    a: &Tensor,
    b: &Tensor,
    c: &Tensor,
) -> Result<()> {
    let f: fn(T, T) -> T = match op_type {
        OpType::Add => |x, y| x + y,
        OpType::Sub => |x, y| x - y,
        OpType::Mul => |x, y| x * y,
        OpType::Div => |x, y| x / y,
        other => {
            return Err(Error::ExecutionError(format!(
                "{} is not an element-wise operator",
                other
            )))
        }
    };

    let a = a.view::<T>()?;
    let b = b.view::<T>()?;
    if op_type == OpType::Div
        && !T::DATA_TYPE.is_floating_point()
        && b.iter().any(|&y| y == T::zero())
    {
        return Err(Error::ExecutionError(format!(
            "operator {} divides by zero",
            op.id()
        )));
    }

    // Output memory is disjoint from both inputs
    let mut c = unsafe { c.view_mut::<T>()? };
    let dim = c.raw_dim();
    let a = a
        .broadcast(dim.clone())
        .ok_or_else(|| shape_mismatch(op, c.shape(), a.shape()))?;
    let b = b
        .broadcast(dim)
        .ok_or_else(|| shape_mismatch(op, c.shape(), b.shape()))?;

    Zip::from(&mut c)
        .and(&a)
        .and(&b)
        .par_for_each(|z, &x, &y| *z = f(x, y));
    Ok(())
}
