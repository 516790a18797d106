use crate::ops::tensor::Shape;

/// Relu, Clip and Cast map each element independently, so the output has the
/// input's shape
pub fn infer_shape(input: &[usize]) -> Shape {
    input.to_vec()
}
