use crate::ops::tensor::{broadcast_shapes, Shape};

/// Matrix dimensions of a (possibly transposed) product `op(A) x op(B)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatMulDims {
    /// Rows of `op(A)` and of the output
    pub m: usize,
    /// Contracted size
    pub n: usize,
    /// Columns of `op(B)` and of the output
    pub k: usize,
}

/// Output shape and matrix dimensions of a batched matrix product.
///
/// Both operands need rank 2 or more. The trailing two axes are the matrix,
/// any leading axes are batch axes and broadcast like element-wise operands.
pub fn infer_shape(
    a_shape: &[usize],
    b_shape: &[usize],
    trans_a: bool,
    trans_b: bool,
) -> Option<(Shape, MatMulDims)> {
    let a_rank = a_shape.len();
    let b_rank = b_shape.len();
    if a_rank < 2 || b_rank < 2 {
        return None;
    }

    let (a_rows, a_cols) = (a_shape[a_rank - 2], a_shape[a_rank - 1]);
    let (b_rows, b_cols) = (b_shape[b_rank - 2], b_shape[b_rank - 1]);

    let (m, a_inner) = if trans_a { (a_cols, a_rows) } else { (a_rows, a_cols) };
    let (b_inner, k) = if trans_b { (b_cols, b_rows) } else { (b_rows, b_cols) };

    // Contracting dimensions must match
    if a_inner != b_inner {
        return None;
    }

    let mut output_shape = broadcast_batch_dims(&a_shape[..a_rank - 2], &b_shape[..b_rank - 2])?;
    output_shape.push(m);
    output_shape.push(k);

    Some((output_shape, MatMulDims { m, n: a_inner, k }))
}

/// Broadcast the leading batch axes of two operands
pub fn broadcast_batch_dims(a_batch: &[usize], b_batch: &[usize]) -> Option<Vec<usize>> {
    broadcast_shapes(a_batch, b_batch)
}
