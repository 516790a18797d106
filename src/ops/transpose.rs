use crate::error::{Error, Result};
use crate::ops::tensor::Shape;

/// Whether `permute` holds every index in `0..len` exactly once
pub fn is_permutation(permute: &[usize]) -> bool {
    let mut seen = vec![false; permute.len()];
    for &axis in permute {
        if axis >= permute.len() || seen[axis] {
            return false;
        }
        seen[axis] = true;
    }
    true
}

/// Whether `permute` only exchanges the last two axes
pub fn swaps_last_two_axes(permute: &[usize]) -> bool {
    let rank = permute.len();
    rank >= 2
        && permute[..rank - 2].iter().enumerate().all(|(i, &axis)| i == axis)
        && permute[rank - 2] == rank - 1
        && permute[rank - 1] == rank - 2
}

/// Whether applying `permute` twice restores the original axis order
pub fn is_self_inverse(permute: &[usize]) -> bool {
    permute
        .iter()
        .enumerate()
        .all(|(i, &axis)| permute.get(axis) == Some(&i))
}

/// Fill an empty permutation with the identity and validate the result
pub fn bind_permutation(permute: &mut Vec<usize>, rank: usize) -> Result<()> {
    if permute.is_empty() {
        *permute = (0..rank).collect();
    }
    if permute.len() != rank || !is_permutation(permute) {
        return Err(Error::InvalidOperator(format!(
            "{:?} is not a permutation of a rank {} tensor",
            permute, rank
        )));
    }
    Ok(())
}

/// Output axis `i` takes input axis `permute[i]`
pub fn infer_shape(permute: &[usize], input: &[usize]) -> Option<Shape> {
    if permute.len() != input.len() || !is_permutation(permute) {
        return None;
    }
    Some(permute.iter().map(|&axis| input[axis]).collect())
}
