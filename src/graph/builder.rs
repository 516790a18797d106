use log::debug;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::model::{OperatorId, TensorId};
use crate::ops::{DataType, Operator, OperatorKind, Shape};

impl Graph {
    /// Construct an operator bound to this graph and connect it.
    ///
    /// With `outputs` set to `None` the output tensors are created from the
    /// inferred shapes and types; supplied outputs must match them.
    pub fn add_operator(
        &mut self,
        kind: OperatorKind,
        inputs: &[TensorId],
        outputs: Option<&[TensorId]>,
    ) -> Result<OperatorId> {
        let (kind, shapes, data_types) = self.prepare_kind(kind, inputs)?;
        let outputs = match outputs {
            Some(outputs) => {
                self.check_outputs(&kind, outputs, &shapes, &data_types)?;
                outputs.to_vec()
            }
            None => shapes
                .into_iter()
                .zip(data_types)
                .map(|(shape, data_type)| self.add_tensor(shape, data_type))
                .collect(),
        };

        let op = Operator::new(self.ids.operator_id(), kind, inputs.to_vec(), outputs);
        self.add_operator_and_connect(op)
    }

    /// Construct an operator without touching the graph's topology.
    ///
    /// Inputs and outputs must already exist; the operator is validated
    /// against them and returned unconnected.
    pub fn build_operator(
        &mut self,
        kind: OperatorKind,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> Result<Operator> {
        let (kind, shapes, data_types) = self.prepare_kind(kind, inputs)?;
        self.check_outputs(&kind, outputs, &shapes, &data_types)?;
        Ok(Operator::new(
            self.ids.operator_id(),
            kind,
            inputs.to_vec(),
            outputs.to_vec(),
        ))
    }

    /// Duplicate an operator's attributes onto new inputs and outputs.
    ///
    /// The clone has no edges and is validated like a freshly built operator.
    pub fn clone_operator(
        &mut self,
        id: OperatorId,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> Result<Operator> {
        let kind = self.lookup_operator(id)?.kind().clone();
        self.build_operator(kind, inputs, outputs)
    }

    /// Add `op` to the graph and record its edges on both ends.
    ///
    /// Every input gets `op` as a target and every output gets `op` as its
    /// source; predecessor and successor lists follow from those tensors.
    pub fn add_operator_and_connect(&mut self, mut op: Operator) -> Result<OperatorId> {
        let id = op.id();
        if self.operators.contains_key(&id) {
            return Err(Error::AlreadyConnected(id.0));
        }
        for &input in op.inputs() {
            self.lookup_tensor(input)?;
        }
        for &output in op.outputs() {
            let tensor = self.lookup_tensor(output)?;
            if op.inputs().contains(&output) {
                return Err(Error::InvalidOperator(format!(
                    "operator {} reads and writes tensor {}",
                    id, output
                )));
            }
            if let Some(source) = tensor.source() {
                return Err(Error::InvalidOperator(format!(
                    "tensor {} is already produced by operator {}",
                    output, source
                )));
            }
        }

        self.sorted = false;

        for input in op.inputs().to_vec() {
            let source = match self.tensors.get_mut(&input) {
                Some(tensor) => {
                    tensor.add_target(id);
                    tensor.source()
                }
                None => None,
            };
            if let Some(source) = source {
                if let Some(pred) = self.operators.get_mut(&source) {
                    pred.add_successor(id);
                }
                op.add_predecessor(source);
            }
        }

        for output in op.outputs().to_vec() {
            let targets = match self.tensors.get_mut(&output) {
                Some(tensor) => {
                    tensor.set_source(Some(id));
                    tensor.targets().to_vec()
                }
                None => Vec::new(),
            };
            for target in targets {
                if let Some(succ) = self.operators.get_mut(&target) {
                    succ.add_predecessor(id);
                }
                op.add_successor(target);
            }
        }

        debug!("Connected {}", op);
        self.operator_order.push(id);
        self.operators.insert(id, op);
        Ok(id)
    }

    /// Replace the shape of tensor `id`.
    ///
    /// Run `shape_infer` afterwards to propagate the change. Fails once the
    /// tensor is bound to planned memory.
    pub fn set_shape(&mut self, id: TensorId, shape: Shape) -> Result<()> {
        self.tensors
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidGraph(format!("tensor {} is not in the graph", id)))?
            .set_shape(shape)
    }

    /// Re-derive every output shape in schedule order.
    ///
    /// Outputs whose shape changed are updated in place through their family
    /// id. Requires a successful `topo_sort`.
    pub fn shape_infer(&mut self) -> Result<()> {
        if !self.sorted {
            return Err(Error::NotSorted);
        }

        for id in self.operator_order.clone() {
            let shapes = self.refresh_operator(id)?;
            let outputs = self.lookup_operator(id)?.outputs().to_vec();

            for (output, shape) in outputs.into_iter().zip(shapes) {
                let fuid = self.lookup_tensor(output)?.fuid();
                let target = self
                    .tensor_order
                    .iter()
                    .copied()
                    .find(|t| self.tensors.get(t).map_or(false, |t| t.fuid() == fuid))
                    .ok_or_else(|| {
                        Error::InvalidGraph(format!("no tensor of family {}", fuid))
                    })?;
                if let Some(tensor) = self.tensors.get_mut(&target) {
                    if tensor.shape() != shape.as_slice() {
                        debug!(
                            "Tensor {} reshaped from {:?} to {:?}",
                            target,
                            tensor.shape(),
                            shape
                        );
                        tensor.set_shape(shape)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Run an operator's shape inference against its current inputs.
    ///
    /// Cached attributes such as MatMul's m/n/k are refreshed as a side
    /// effect. Returns the derived output shapes.
    pub(crate) fn refresh_operator(&mut self, id: OperatorId) -> Result<Vec<Shape>> {
        let mut input_shapes = Vec::new();
        for &input in self.lookup_operator(id)?.inputs() {
            input_shapes.push(self.lookup_tensor(input)?.shape().to_vec());
        }
        let views: Vec<&[usize]> = input_shapes.iter().map(Vec::as_slice).collect();

        let op = self
            .operators
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidGraph(format!("operator {} is not in the graph", id)))?;
        let shapes = op.kind_mut().infer_shape(&views).ok_or_else(|| {
            Error::ShapeInference(format!(
                "operator {} ({}) cannot take input shapes {:?}",
                id,
                op.op_type(),
                input_shapes
            ))
        })?;
        if shapes.len() != op.outputs().len() {
            return Err(Error::ShapeInference(format!(
                "operator {} inferred {} outputs but has {}",
                id,
                shapes.len(),
                op.outputs().len()
            )));
        }
        Ok(shapes)
    }

    /// Validate arity, bind attributes and infer output shapes and types
    fn prepare_kind(
        &self,
        mut kind: OperatorKind,
        inputs: &[TensorId],
    ) -> Result<(OperatorKind, Vec<Shape>, Vec<DataType>)> {
        let mut input_shapes = Vec::with_capacity(inputs.len());
        let mut input_types = Vec::with_capacity(inputs.len());
        for &input in inputs {
            let tensor = self.lookup_tensor(input)?;
            input_shapes.push(tensor.shape().to_vec());
            input_types.push(tensor.data_type());
        }

        if input_types.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(Error::InvalidOperator(format!(
                "{} inputs mix element types {:?}",
                kind.op_type(),
                input_types
            )));
        }

        let views: Vec<&[usize]> = input_shapes.iter().map(Vec::as_slice).collect();
        kind.bind(&views)?;
        let shapes = kind.infer_shape(&views).ok_or_else(|| {
            Error::ShapeInference(format!(
                "{} cannot take input shapes {:?}",
                kind, input_shapes
            ))
        })?;
        let data_types = kind.infer_data_type(&input_types);

        Ok((kind, shapes, data_types))
    }

    fn check_outputs(
        &self,
        kind: &OperatorKind,
        outputs: &[TensorId],
        shapes: &[Shape],
        data_types: &[DataType],
    ) -> Result<()> {
        if outputs.len() != kind.num_outputs() {
            return Err(Error::InvalidOperator(format!(
                "{} produces {} outputs, {} supplied",
                kind.op_type(),
                kind.num_outputs(),
                outputs.len()
            )));
        }
        for ((&output, shape), &data_type) in outputs.iter().zip(shapes).zip(data_types) {
            let tensor = self.lookup_tensor(output)?;
            if tensor.shape() != shape.as_slice() {
                return Err(Error::ShapeInference(format!(
                    "output tensor {} has shape {:?}, {} produces {:?}",
                    output,
                    tensor.shape(),
                    kind.op_type(),
                    shape
                )));
            }
            if tensor.data_type() != data_type {
                return Err(Error::InvalidOperator(format!(
                    "output tensor {} holds {}, {} produces {}",
                    output,
                    tensor.data_type(),
                    kind.op_type(),
                    data_type
                )));
            }
        }
        Ok(())
    }
}
