use crate::graph::Graph;
use crate::model::{OperatorId, TensorId};

impl Graph {
    /// Make `consumer` read `to` wherever it reads `from`.
    ///
    /// Tensor targets and operator predecessor/successor lists are updated
    /// on both ends. Returns the input slots that were repointed.
    pub(crate) fn reroute_input(
        &mut self,
        consumer: OperatorId,
        from: TensorId,
        to: TensorId,
    ) -> Vec<usize> {
        let slots = match self.operators.get_mut(&consumer) {
            Some(op) => op.replace_input(from, to),
            None => return Vec::new(),
        };
        if slots.is_empty() {
            return slots;
        }

        let old_source = self.tensors.get_mut(&from).and_then(|tensor| {
            tensor.remove_target(consumer);
            tensor.source()
        });
        let new_source = self.tensors.get_mut(&to).and_then(|tensor| {
            tensor.add_target(consumer);
            tensor.source()
        });

        if let Some(old_source) = old_source {
            if !self.still_feeds(old_source, consumer) {
                if let Some(op) = self.operators.get_mut(&consumer) {
                    op.remove_predecessor(old_source);
                }
                if let Some(op) = self.operators.get_mut(&old_source) {
                    op.remove_successor(consumer);
                }
            }
        }
        if let Some(new_source) = new_source {
            if let Some(op) = self.operators.get_mut(&consumer) {
                op.add_predecessor(new_source);
            }
            if let Some(op) = self.operators.get_mut(&new_source) {
                op.add_successor(consumer);
            }
        }

        self.sorted = self.sorted && self.respects_order(consumer);
        slots
    }

    /// Remove an operator together with every edge that mentions it
    pub(crate) fn erase_operator(&mut self, id: OperatorId) {
        let op = match self.operators.remove(&id) {
            Some(op) => op,
            None => return,
        };
        self.operator_order.retain(|&other| other != id);

        for input in op.inputs() {
            if let Some(tensor) = self.tensors.get_mut(input) {
                tensor.remove_target(id);
            }
        }
        for output in op.outputs() {
            if let Some(tensor) = self.tensors.get_mut(output) {
                if tensor.source() == Some(id) {
                    tensor.set_source(None);
                }
            }
        }
        for pred in op.predecessors() {
            if let Some(other) = self.operators.get_mut(pred) {
                other.remove_successor(id);
            }
        }
        for succ in op.successors() {
            if let Some(other) = self.operators.get_mut(succ) {
                other.remove_predecessor(id);
            }
        }
    }

    /// Remove a tensor that no operator references any more
    pub(crate) fn erase_tensor(&mut self, id: TensorId) {
        if self.tensors.remove(&id).is_some() {
            self.tensor_order.retain(|&other| other != id);
        }
    }

    /// Whether some output of `producer` is still an input of `consumer`
    fn still_feeds(&self, producer: OperatorId, consumer: OperatorId) -> bool {
        match (self.operators.get(&producer), self.operators.get(&consumer)) {
            (Some(producer), Some(consumer)) => producer
                .outputs()
                .iter()
                .any(|output| consumer.inputs().contains(output)),
            _ => false,
        }
    }

    /// Whether every predecessor of `id` comes before it in the operator order
    fn respects_order(&self, id: OperatorId) -> bool {
        let position = |op: &OperatorId| self.operator_order.iter().position(|other| other == op);
        let own = match position(&id) {
            Some(own) => own,
            None => return false,
        };
        self.operators.get(&id).map_or(false, |op| {
            op.predecessors()
                .iter()
                .all(|pred| position(pred).map_or(false, |p| p < own))
        })
    }
}
