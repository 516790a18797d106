use crate::error::{Error, Result};
use crate::ops::tensor::Shape;

/// Turn `axis` into an index in `0..rank`; it must satisfy `-rank <= axis < rank`
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let rank_i = rank as i64;
    if axis < -rank_i || axis >= rank_i {
        return Err(Error::InvalidOperator(format!(
            "Concat axis {} out of range for rank {}",
            axis, rank
        )));
    }
    Ok(axis.rem_euclid(rank_i) as usize)
}

/// Output shape of a concatenation along `axis`.
///
/// Every input must have the same rank and agree on every axis except the
/// concatenation axis, whose sizes are summed.
pub fn infer_shape(axis: i64, inputs: &[&[usize]]) -> Option<Shape> {
    let first = inputs.first()?;
    let axis = normalize_axis(axis, first.len()).ok()?;

    let mut output: Shape = first.to_vec();
    output[axis] = 0;
    for shape in inputs {
        if shape.len() != first.len() {
            return None;
        }
        for (dim, (&size, &expected)) in shape.iter().zip(first.iter()).enumerate() {
            if dim != axis && size != expected {
                return None;
            }
        }
        output[axis] += shape[axis];
    }
    Some(output)
}
