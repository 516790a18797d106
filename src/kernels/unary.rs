use ndarray::Zip;
use num_traits::{NumCast, Zero};

use crate::error::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::kernels::{kind_mismatch, shape_mismatch, Numeric};
use crate::ops::registry::Kernel;
use crate::ops::{Operator, OperatorKind, Tensor};

#[derive(Debug, Default, Clone, Copy)]
pub struct ReluKernel;

#[derive(Debug, Default, Clone, Copy)]
pub struct ClipKernel;

#[derive(Debug, Default, Clone, Copy)]
pub struct CastKernel;

impl Kernel for ReluKernel {
    fn compute(&self, op: &Operator, context: &ExecutionContext) -> Result<()> {
        if !matches!(op.kind(), OperatorKind::Relu) {
            return Err(kind_mismatch("ReluKernel", op));
        }
        let input = context.input(op, 0)?;
        let output = context.output(op)?;
        dispatch_numeric!(output.data_type(), T => {
            map::<T>(op, input, output, |x| if x > T::zero() { x } else { T::zero() })
        })
    }
}

impl Kernel for ClipKernel {
    fn compute(&self, op: &Operator, context: &ExecutionContext) -> Result<()> {
        let (min, max) = match op.kind() {
            OperatorKind::Clip { min, max } => (*min, *max),
            _ => return Err(kind_mismatch("ClipKernel", op)),
        };
        let input = context.input(op, 0)?;
        let output = context.output(op)?;
        dispatch_numeric!(output.data_type(), T => {
            let lo = min.map(bound::<T>);
            let hi = max.map(bound::<T>);
            map::<T>(op, input, output, move |x| {
                let x = match lo {
                    Some(lo) if x < lo => lo,
                    _ => x,
                };
                match hi {
                    Some(hi) if x > hi => hi,
                    _ => x,
                }
            })
        })
    }
}

impl Kernel for CastKernel {
    fn compute(&self, op: &Operator, context: &ExecutionContext) -> Result<()> {
        if !matches!(op.kind(), OperatorKind::Cast { .. }) {
            return Err(kind_mismatch("CastKernel", op));
        }
        let input = context.input(op, 0)?;
        let output = context.output(op)?;
        dispatch_numeric!(input.data_type(), S => {
            dispatch_numeric!(output.data_type(), D => cast::<S, D>(op, input, output))
        })
    }
}

/// Apply `f` to every element of `input`, writing `output`
fn map<T: Numeric>(
    op: &Operator,
    input: &Tensor,
    output: &Tensor,
    f: impl Fn(T) -> T + Sync + Send,
) -> Result<()> {
    let input = input.view::<T>()?;
    // Output memory is disjoint from the input
    let mut output = unsafe { output.view_mut::<T>()? };
    if output.shape() != input.shape() {
        return Err(shape_mismatch(op, output.shape(), input.shape()));
    }
    Zip::from(&mut output)
        .and(&input)
        .par_for_each(|o, &x| *o = f(x));
    Ok(())
}

/// Convert a clip bound to `T`, saturating at the ends of its range
fn bound<T: Numeric>(value: f64) -> T {
    let lo = T::min_value().to_f64().unwrap_or(f64::MIN);
    let hi = T::max_value().to_f64().unwrap_or(f64::MAX);
    <T as NumCast>::from(value.clamp(lo, hi)).unwrap_or(if value < 0.0 {
        T::min_value()
    } else {
        T::max_value()
    })
}

fn cast<S: Numeric, D: Numeric>(op: &Operator, input: &Tensor, output: &Tensor) -> Result<()> {
    let input = input.view::<S>()?;
    // Output memory is disjoint from the input
    let mut output = unsafe { output.view_mut::<D>()? };
    if output.shape() != input.shape() {
        return Err(shape_mismatch(op, output.shape(), input.shape()));
    }
    for (o, &x) in output.iter_mut().zip(input.iter()) {
        *o = <D as NumCast>::from(x).ok_or_else(|| {
            Error::ExecutionError(format!(
                "operator {} cannot represent {:?} as {}",
                op.id(),
                x,
                D::DATA_TYPE
            ))
        })?;
    }
    Ok(())
}
