use std::collections::HashMap;
use std::fmt::Debug;

use crate::error::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::memory::Device;
use crate::ops::{OpType, Operator};

/// Computation of one operator kind on one device
pub trait Kernel: Send + Sync + Debug {
    /// Read the operator's inputs and write its output through the context
    fn compute(&self, op: &Operator, context: &ExecutionContext) -> Result<()>;
}

/// Registry of kernels keyed by device and operator type
#[derive(Debug, Default)]
pub struct KernelRegistry {
    kernels: HashMap<(Device, OpType), Box<dyn Kernel>>,
}

impl KernelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            kernels: HashMap::new(),
        }
    }

    /// Register a kernel
    pub fn register_kernel(
        &mut self,
        device: Device,
        op_type: OpType,
        kernel: Box<dyn Kernel>,
    ) -> Result<()> {
        let key = (device, op_type);

        if self.kernels.contains_key(&key) {
            return Err(Error::InvalidOperator(format!(
                "A {} kernel for {} is already registered",
                device, op_type
            )));
        }

        self.kernels.insert(key, kernel);
        Ok(())
    }

    /// Get the kernel for an operator type on a device
    pub fn get_kernel(&self, device: Device, op_type: OpType) -> Option<&dyn Kernel> {
        self.kernels.get(&(device, op_type)).map(|kernel| kernel.as_ref())
    }

    /// Number of registered kernels
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Register the CPU kernels of every operator type
    pub fn register_cpu_kernels(&mut self) -> Result<()> {
        use crate::kernels::{
            CastKernel, ClipKernel, ConcatKernel, ElementWiseKernel, MatMulKernel, ReluKernel,
            TransposeKernel,
        };

        for op_type in [OpType::Add, OpType::Sub, OpType::Mul, OpType::Div] {
            self.register_kernel(Device::Cpu, op_type, Box::new(ElementWiseKernel))?;
        }
        self.register_kernel(Device::Cpu, OpType::MatMul, Box::new(MatMulKernel))?;
        self.register_kernel(Device::Cpu, OpType::Transpose, Box::new(TransposeKernel))?;
        self.register_kernel(Device::Cpu, OpType::Concat, Box::new(ConcatKernel))?;
        self.register_kernel(Device::Cpu, OpType::Relu, Box::new(ReluKernel))?;
        self.register_kernel(Device::Cpu, OpType::Clip, Box::new(ClipKernel))?;
        self.register_kernel(Device::Cpu, OpType::Cast, Box::new(CastKernel))?;
        Ok(())
    }

    /// Create a registry holding the CPU kernels
    pub fn with_cpu_kernels() -> Result<Self> {
        let mut registry = Self::new();
        registry.register_cpu_kernels()?;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::ReluKernel;
    use strum::IntoEnumIterator;

    #[test]
    fn test_cpu_kernels_cover_catalogue() {
        let registry = KernelRegistry::with_cpu_kernels().unwrap();
        for op_type in OpType::iter() {
            let registered = registry.get_kernel(Device::Cpu, op_type).is_some();
            assert_eq!(registered, op_type != OpType::Unknown, "{}", op_type);
        }
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = KernelRegistry::new();
        registry
            .register_kernel(Device::Cpu, OpType::Relu, Box::new(ReluKernel))
            .unwrap();
        let result = registry.register_kernel(Device::Cpu, OpType::Relu, Box::new(ReluKernel));
        assert!(matches!(result, Err(Error::InvalidOperator(_))));
    }
}
