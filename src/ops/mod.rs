pub mod activations;
pub mod concat;
pub mod math;
pub mod registry;
pub mod tensor;
pub mod transpose;

use std::fmt;

use strum_macros::{Display, EnumIter, EnumString};

use crate::error::{Error, Result};
use crate::model::{OperatorId, TensorId};
pub use tensor::{broadcast_shapes, DataType, Element, Shape, Tensor};

/// Type tag of an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum OpType {
    Unknown,
    Add,
    Cast,
    Clip,
    Concat,
    Div,
    Mul,
    MatMul,
    Relu,
    Sub,
    Transpose,
}

impl OpType {
    /// Whether the tag names a binary element-wise operator
    pub fn is_element_wise(&self) -> bool {
        matches!(self, OpType::Add | OpType::Sub | OpType::Mul | OpType::Div)
    }
}

/// Operator kinds and their attributes
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorKind {
    /// Binary Add, Sub, Mul or Div with broadcasting
    ElementWise(OpType),
    /// Concatenation along `axis`; negative axes count from the back
    Concat { axis: i64 },
    /// Batched matrix product. `m`, `n` and `k` are refreshed by shape inference:
    /// `m` rows of the output, `n` the contracted size, `k` output columns
    MatMul {
        trans_a: bool,
        trans_b: bool,
        m: usize,
        n: usize,
        k: usize,
    },
    /// Axis permutation; empty means identity
    Transpose { permute: Vec<usize> },
    Relu,
    /// Clamp into `[min, max]`; a missing bound is unbounded
    Clip { min: Option<f64>, max: Option<f64> },
    /// Element type conversion
    Cast { to: DataType },
}

impl OperatorKind {
    pub fn add() -> Self {
        OperatorKind::ElementWise(OpType::Add)
    }

    pub fn sub() -> Self {
        OperatorKind::ElementWise(OpType::Sub)
    }

    pub fn mul() -> Self {
        OperatorKind::ElementWise(OpType::Mul)
    }

    pub fn div() -> Self {
        OperatorKind::ElementWise(OpType::Div)
    }

    pub fn concat(axis: i64) -> Self {
        OperatorKind::Concat { axis }
    }

    pub fn matmul(trans_a: bool, trans_b: bool) -> Self {
        OperatorKind::MatMul {
            trans_a,
            trans_b,
            m: 0,
            n: 0,
            k: 0,
        }
    }

    pub fn transpose(permute: Vec<usize>) -> Self {
        OperatorKind::Transpose { permute }
    }

    pub fn relu() -> Self {
        OperatorKind::Relu
    }

    pub fn clip(min: Option<f64>, max: Option<f64>) -> Self {
        OperatorKind::Clip { min, max }
    }

    pub fn cast(to: DataType) -> Self {
        OperatorKind::Cast { to }
    }

    /// Type tag of this kind
    pub fn op_type(&self) -> OpType {
        match self {
            OperatorKind::ElementWise(op_type) => *op_type,
            OperatorKind::Concat { .. } => OpType::Concat,
            OperatorKind::MatMul { .. } => OpType::MatMul,
            OperatorKind::Transpose { .. } => OpType::Transpose,
            OperatorKind::Relu => OpType::Relu,
            OperatorKind::Clip { .. } => OpType::Clip,
            OperatorKind::Cast { .. } => OpType::Cast,
        }
    }

    /// Number of inputs, `None` for variadic kinds
    pub fn num_inputs(&self) -> Option<usize> {
        match self {
            OperatorKind::ElementWise(_) | OperatorKind::MatMul { .. } => Some(2),
            OperatorKind::Concat { .. } => None,
            OperatorKind::Transpose { .. }
            | OperatorKind::Relu
            | OperatorKind::Clip { .. }
            | OperatorKind::Cast { .. } => Some(1),
        }
    }

    /// Number of outputs
    pub fn num_outputs(&self) -> usize {
        1
    }

    /// Check that `count` inputs fit this kind
    pub fn check_arity(&self, count: usize) -> Result<()> {
        let ok = match self.num_inputs() {
            Some(expected) => count == expected,
            None => count >= 1,
        };
        if !ok {
            return Err(Error::InvalidOperator(format!(
                "{} cannot take {} inputs",
                self.op_type(),
                count
            )));
        }
        Ok(())
    }

    /// Normalize attributes against the input shapes at construction time.
    ///
    /// Fills the identity permutation of an empty Transpose, turns a
    /// negative concat axis into its positive form and rejects attributes
    /// that can never describe a valid operator.
    pub fn bind(&mut self, inputs: &[&[usize]]) -> Result<()> {
        self.check_arity(inputs.len())?;
        match self {
            OperatorKind::ElementWise(op_type) => {
                if !op_type.is_element_wise() {
                    return Err(Error::InvalidOperator(format!(
                        "{} is not an element-wise operator",
                        op_type
                    )));
                }
            }
            OperatorKind::Concat { axis } => {
                let rank = inputs[0].len();
                *axis = concat::normalize_axis(*axis, rank)? as i64;
            }
            OperatorKind::Transpose { permute } => {
                transpose::bind_permutation(permute, inputs[0].len())?;
            }
            OperatorKind::MatMul { .. }
            | OperatorKind::Relu
            | OperatorKind::Clip { .. }
            | OperatorKind::Cast { .. } => {}
        }
        Ok(())
    }

    /// Derive output shapes from input shapes, `None` if they are incompatible
    pub fn infer_shape(&mut self, inputs: &[&[usize]]) -> Option<Vec<Shape>> {
        let expected = self.num_inputs();
        if inputs.is_empty() || expected.map_or(false, |n| n != inputs.len()) {
            return None;
        }
        let shape = match self {
            OperatorKind::ElementWise(_) => math::element_wise::infer_shape(inputs[0], inputs[1])?,
            OperatorKind::Concat { axis } => concat::infer_shape(*axis, inputs)?,
            OperatorKind::MatMul {
                trans_a,
                trans_b,
                m,
                n,
                k,
            } => {
                let (shape, dims) =
                    math::matmul::infer_shape(inputs[0], inputs[1], *trans_a, *trans_b)?;
                *m = dims.m;
                *n = dims.n;
                *k = dims.k;
                shape
            }
            OperatorKind::Transpose { permute } => transpose::infer_shape(permute, inputs[0])?,
            OperatorKind::Relu | OperatorKind::Clip { .. } | OperatorKind::Cast { .. } => {
                activations::infer_shape(inputs[0])
            }
        };
        Some(vec![shape])
    }

    /// Derive output types; every kind but Cast keeps the first input's type
    pub fn infer_data_type(&self, inputs: &[DataType]) -> Vec<DataType> {
        match self {
            OperatorKind::Cast { to } => vec![*to],
            _ => inputs.first().copied().into_iter().collect(),
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::ElementWise(op_type) => write!(f, "{}", op_type),
            OperatorKind::Concat { axis } => write!(f, "Concat(axis={})", axis),
            OperatorKind::MatMul {
                trans_a,
                trans_b,
                m,
                n,
                k,
            } => write!(
                f,
                "MatMul({}{}, mnk=[{}, {}, {}])",
                if *trans_a { "A^T" } else { "A" },
                if *trans_b { "B^T" } else { "B" },
                m,
                n,
                k
            ),
            OperatorKind::Transpose { permute } => write!(f, "Transpose(permute={:?})", permute),
            OperatorKind::Relu => write!(f, "Relu"),
            OperatorKind::Clip { min, max } => write!(f, "Clip(min={:?}, max={:?})", min, max),
            OperatorKind::Cast { to } => write!(f, "Cast(to={})", to),
        }
    }
}

/// An operator owned by a graph.
///
/// `predecessors` and `successors` are derived from the tensors: A is a
/// predecessor of B exactly when some output of A is an input of B.
#[derive(Debug, Clone)]
pub struct Operator {
    id: OperatorId,
    kind: OperatorKind,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    predecessors: Vec<OperatorId>,
    successors: Vec<OperatorId>,
}

impl Operator {
    pub(crate) fn new(
        id: OperatorId,
        kind: OperatorKind,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> Self {
        Self {
            id,
            kind,
            inputs,
            outputs,
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn id(&self) -> OperatorId {
        self.id
    }

    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }

    pub fn op_type(&self) -> OpType {
        self.kind.op_type()
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// First output; every kind has exactly one
    pub fn output(&self) -> TensorId {
        self.outputs[0]
    }

    pub fn predecessors(&self) -> &[OperatorId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[OperatorId] {
        &self.successors
    }

    pub(crate) fn kind_mut(&mut self) -> &mut OperatorKind {
        &mut self.kind
    }

    pub(crate) fn add_predecessor(&mut self, op: OperatorId) {
        if !self.predecessors.contains(&op) {
            self.predecessors.push(op);
        }
    }

    pub(crate) fn remove_predecessor(&mut self, op: OperatorId) {
        self.predecessors.retain(|&p| p != op);
    }

    pub(crate) fn add_successor(&mut self, op: OperatorId) {
        if !self.successors.contains(&op) {
            self.successors.push(op);
        }
    }

    pub(crate) fn remove_successor(&mut self, op: OperatorId) {
        self.successors.retain(|&s| s != op);
    }

    /// Point every input slot holding `old` at `new`, returning the slots changed
    pub(crate) fn replace_input(&mut self, old: TensorId, new: TensorId) -> Vec<usize> {
        let mut slots = Vec::new();
        for (slot, input) in self.inputs.iter_mut().enumerate() {
            if *input == old {
                *input = new;
                slots.push(slot);
            }
        }
        slots
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |list: &[TensorId]| list.iter().map(|t| t.0).collect::<Vec<_>>();
        let ops = |list: &[OperatorId]| list.iter().map(|o| o.0).collect::<Vec<_>>();
        write!(
            f,
            "Operator {} {}, inputs: {:?}, outputs: {:?}, pred: {:?}, succ: {:?}",
            self.id,
            self.kind,
            ids(&self.inputs),
            ids(&self.outputs),
            ops(&self.predecessors),
            ops(&self.successors)
        )
    }
}
