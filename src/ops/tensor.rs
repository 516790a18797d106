use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn};
use strum_macros::{Display, EnumIter};

use crate::error::{Error, Result};
use crate::memory::runtime::{Blob, Runtime};
use crate::model::{FamilyId, OperatorId, TensorId};

/// Shape of a tensor
pub type Shape = Vec<usize>;

/// Element types a tensor can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum DataType {
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
}

impl DataType {
    /// Get the size in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::Float64 => 8,
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 => 4,
            DataType::Int64 => 8,
            DataType::UInt8 => 1,
            DataType::UInt16 => 2,
            DataType::UInt32 => 4,
            DataType::UInt64 => 8,
            DataType::Bool => 1,
        }
    }

    /// Check if data type is a floating point type
    pub fn is_floating_point(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }
}

/// Rust types that can be read from or written to tensor memory
pub trait Element: Copy + Send + Sync + 'static {
    const DATA_TYPE: DataType;
}

macro_rules! impl_element {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(impl Element for $t {
            const DATA_TYPE: DataType = DataType::$dtype;
        })*
    };
}

impl_element!(
    f32 => Float32,
    f64 => Float64,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    bool => Bool,
);

/// A tensor owned by a graph.
///
/// Edges to operators are stored as ids. The source is the operator that
/// produces the tensor, the targets are the operators that consume it.
#[derive(Debug)]
pub struct Tensor {
    id: TensorId,
    fuid: FamilyId,
    shape: Shape,
    data_type: DataType,
    runtime: Arc<dyn Runtime>,
    source: Option<OperatorId>,
    targets: Vec<OperatorId>,
    data: Option<Blob>,
}

/// A clone is unbound: the planned memory belongs to the graph that bound
/// the original and is released with it.
impl Clone for Tensor {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            fuid: self.fuid,
            shape: self.shape.clone(),
            data_type: self.data_type,
            runtime: Arc::clone(&self.runtime),
            source: self.source,
            targets: self.targets.clone(),
            data: None,
        }
    }
}

impl Tensor {
    pub(crate) fn new(
        id: TensorId,
        fuid: FamilyId,
        shape: Shape,
        data_type: DataType,
        runtime: Arc<dyn Runtime>,
    ) -> Self {
        Self {
            id,
            fuid,
            shape,
            data_type,
            runtime,
            source: None,
            targets: Vec::new(),
            data: None,
        }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Family id shared with every clone of this tensor
    pub fn fuid(&self) -> FamilyId {
        self.fuid
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    /// Operator producing this tensor, if any
    pub fn source(&self) -> Option<OperatorId> {
        self.source
    }

    /// Operators consuming this tensor, in the order they were connected
    pub fn targets(&self) -> &[OperatorId] {
        &self.targets
    }

    /// Memory the tensor is bound to, once planned
    pub fn data(&self) -> Option<Blob> {
        self.data
    }

    /// Number of elements
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Total byte footprint
    pub fn bytes(&self) -> usize {
        self.size() * self.data_type.size_in_bytes()
    }

    /// Replace the shape in place.
    ///
    /// A tensor bound to planned memory keeps its shape; its block was sized
    /// for the old one.
    pub(crate) fn set_shape(&mut self, shape: Shape) -> Result<()> {
        if self.data.is_some() && shape != self.shape {
            return Err(Error::InvalidGraph(format!(
                "tensor {} is bound to planned memory, cannot reshape {:?} to {:?}",
                self.id, self.shape, shape
            )));
        }
        self.shape = shape;
        Ok(())
    }

    pub(crate) fn set_source(&mut self, source: Option<OperatorId>) {
        self.source = source;
    }

    pub(crate) fn add_target(&mut self, op: OperatorId) {
        if !self.targets.contains(&op) {
            self.targets.push(op);
        }
    }

    pub(crate) fn remove_target(&mut self, op: OperatorId) {
        self.targets.retain(|&target| target != op);
    }

    pub(crate) fn set_data(&mut self, blob: Blob) {
        self.data = Some(blob);
    }

    fn bound_blob<T: Element>(&self) -> Result<Blob> {
        if T::DATA_TYPE != self.data_type {
            return Err(Error::ExecutionError(format!(
                "tensor {} holds {} elements, not {}",
                self.id,
                self.data_type,
                T::DATA_TYPE
            )));
        }
        self.data.ok_or_else(|| {
            Error::ExecutionError(format!("tensor {} has no memory bound", self.id))
        })
    }

    /// Overwrite the tensor's memory with `values`
    pub fn copy_from_slice<T: Element>(&mut self, values: &[T]) -> Result<()> {
        let blob = self.bound_blob::<T>()?;
        if values.len() != self.size() {
            return Err(Error::ExecutionError(format!(
                "tensor {} holds {} elements, got {}",
                self.id,
                self.size(),
                values.len()
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(values.as_ptr(), blob.as_ptr() as *mut T, values.len());
        }
        Ok(())
    }

    /// Copy the tensor's memory out in row-major order
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        Ok(self.view::<T>()?.iter().copied().collect())
    }

    /// Read-only view of the tensor's memory
    pub fn view<T: Element>(&self) -> Result<ArrayViewD<'_, T>> {
        let blob = self.bound_blob::<T>()?;
        // The blob covers `bytes()` bytes aligned to the allocator quantum.
        Ok(unsafe { ArrayViewD::from_shape_ptr(IxDyn(&self.shape), blob.as_ptr() as *const T) })
    }

    /// Mutable view of the tensor's memory.
    ///
    /// # Safety
    /// No other view of this tensor may be alive while the returned view is.
    pub(crate) unsafe fn view_mut<T: Element>(&self) -> Result<ArrayViewMutD<'_, T>> {
        let blob = self.bound_blob::<T>()?;
        Ok(ArrayViewMutD::from_shape_ptr(IxDyn(&self.shape), blob.as_ptr() as *mut T))
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor {} (fuid {}) shape {:?} {} on {}, data: ",
            self.id,
            self.fuid,
            self.shape,
            self.data_type,
            self.runtime.name()
        )?;
        match self.data {
            Some(blob) => write!(f, "{:p}", blob.as_ptr())?,
            None => write!(f, "none")?,
        }
        match self.source {
            Some(source) => write!(f, ", source: {}", source)?,
            None => write!(f, ", source: none")?,
        }
        let targets: Vec<usize> = self.targets.iter().map(|op| op.0).collect();
        write!(f, ", targets: {:?}", targets)
    }
}

/// Broadcast two shapes against each other.
///
/// Shapes are right-aligned and the shorter one is padded with leading 1s.
/// Each aligned pair must be equal or contain a 1; a 1 takes the other
/// side's size, so `[1]` against `[0]` gives `[0]`. Returns `None` when the
/// shapes are incompatible.
pub fn broadcast_shapes(shape1: &[usize], shape2: &[usize]) -> Option<Shape> {
    let rank1 = shape1.len();
    let rank2 = shape2.len();
    let result_rank = std::cmp::max(rank1, rank2);

    let mut result_shape = Vec::with_capacity(result_rank);

    for i in 0..result_rank {
        let dim1 = if i >= result_rank - rank1 {
            shape1[i - (result_rank - rank1)]
        } else {
            1
        };

        let dim2 = if i >= result_rank - rank2 {
            shape2[i - (result_rank - rank2)]
        } else {
            1
        };

        let dim = if dim1 == 1 {
            dim2
        } else if dim2 == 1 || dim1 == dim2 {
            dim1
        } else {
            return None;
        };
        result_shape.push(dim);
    }

    Some(result_shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::runtime::CpuRuntime;
    use strum::IntoEnumIterator;

    #[test]
    fn test_broadcasting() {
        assert_eq!(broadcast_shapes(&[3, 1, 5], &[4, 5]), Some(vec![3, 4, 5]));
        assert_eq!(broadcast_shapes(&[2, 3], &[2, 3]), Some(vec![2, 3]));
        assert_eq!(broadcast_shapes(&[], &[7]), Some(vec![7]));
        assert_eq!(broadcast_shapes(&[1], &[0]), Some(vec![0]));
        assert_eq!(broadcast_shapes(&[2, 3], &[2, 4]), None);
    }

    #[test]
    fn test_sizes() {
        let tensor = Tensor::new(
            TensorId(1),
            FamilyId(1),
            vec![2, 3, 4],
            DataType::Float32,
            Arc::new(CpuRuntime::new()),
        );
        assert_eq!(tensor.size(), 24);
        assert_eq!(tensor.bytes(), 96);
        assert_eq!(tensor.rank(), 3);
    }

    #[test]
    fn test_element_widths_match_rust_types() {
        assert_eq!(DataType::Float32.size_in_bytes(), std::mem::size_of::<f32>());
        assert_eq!(DataType::UInt64.size_in_bytes(), std::mem::size_of::<u64>());
        assert!(DataType::iter().all(|dtype| dtype.size_in_bytes() <= 8));
    }

    #[test]
    fn test_unbound_access_fails() {
        let tensor = Tensor::new(
            TensorId(1),
            FamilyId(1),
            vec![2],
            DataType::Float32,
            Arc::new(CpuRuntime::new()),
        );
        assert!(tensor.to_vec::<f32>().is_err());
    }

    #[test]
    fn test_bound_tensor_rejects_reshape() {
        let mut tensor = Tensor::new(
            TensorId(1),
            FamilyId(1),
            vec![2, 3],
            DataType::Float32,
            Arc::new(CpuRuntime::new()),
        );
        tensor.set_shape(vec![3, 2]).unwrap();
        tensor.set_data(Blob::new(std::ptr::NonNull::dangling()));

        assert!(matches!(tensor.set_shape(vec![6, 2]), Err(Error::InvalidGraph(_))));
        assert_eq!(tensor.shape(), &[3, 2]);
        tensor.set_shape(vec![3, 2]).unwrap();
    }

    #[test]
    fn test_clone_is_unbound() {
        let mut tensor = Tensor::new(
            TensorId(1),
            FamilyId(2),
            vec![4],
            DataType::Int32,
            Arc::new(CpuRuntime::new()),
        );
        tensor.add_target(OperatorId(3));
        tensor.set_data(Blob::new(std::ptr::NonNull::dangling()));

        let copy = tensor.clone();
        assert!(tensor.data().is_some());
        assert!(copy.data().is_none());
        assert!(copy.to_vec::<i32>().is_err());
        assert_eq!(copy.fuid(), FamilyId(2));
        assert_eq!(copy.shape(), &[4]);
        assert_eq!(copy.targets(), &[OperatorId(3)]);
    }

    #[test]
    fn test_targets_are_deduplicated() {
        let mut tensor = Tensor::new(
            TensorId(1),
            FamilyId(1),
            vec![2],
            DataType::Float32,
            Arc::new(CpuRuntime::new()),
        );
        tensor.add_target(OperatorId(4));
        tensor.add_target(OperatorId(4));
        tensor.add_target(OperatorId(5));
        assert_eq!(tensor.targets(), &[OperatorId(4), OperatorId(5)]);
        tensor.remove_target(OperatorId(4));
        assert_eq!(tensor.targets(), &[OperatorId(5)]);
    }
}
