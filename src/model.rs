use std::fmt;

/// Instance identifier of a tensor inside a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub usize);

/// Instance identifier of an operator inside a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId(pub usize);

/// Family identifier shared by a tensor and all of its clones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyId(pub usize);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out identifiers for the entities of one graph.
///
/// Tensors and operators draw instance ids from the same counter, so an
/// instance id is unique across both kinds of entity. Family ids use their
/// own counter. Both start at 1.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next_instance: usize,
    next_family: usize,
}

impl IdGenerator {
    /// Create a generator whose first ids are 1
    pub fn new() -> Self {
        Self {
            next_instance: 1,
            next_family: 1,
        }
    }

    fn next_instance(&mut self) -> usize {
        let id = self.next_instance;
        self.next_instance += 1;
        id
    }

    /// Generate a new tensor instance id
    pub fn tensor_id(&mut self) -> TensorId {
        TensorId(self.next_instance())
    }

    /// Generate a new operator instance id
    pub fn operator_id(&mut self) -> OperatorId {
        OperatorId(self.next_instance())
    }

    /// Generate a new family id
    pub fn family_id(&mut self) -> FamilyId {
        let id = self.next_family;
        self.next_family += 1;
        FamilyId(id)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
