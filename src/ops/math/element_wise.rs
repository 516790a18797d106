use crate::ops::tensor::{broadcast_shapes, Shape};

/// Output shape of a binary element-wise operator.
///
/// `[3, 1, 5]` and `[4, 5]` give `[3, 4, 5]`; `[2, 3]` and `[2, 4]` give `None`.
pub fn infer_shape(a: &[usize], b: &[usize]) -> Option<Shape> {
    broadcast_shapes(a, b)
}
