use log::info;

use crate::error::{Error, Result};
use crate::graph::Graph;

impl Graph {
    /// Plan memory for every tensor and bind it.
    ///
    /// Each tensor gets an offset sized to its byte footprint, then the
    /// allocator materializes one backing buffer and every tensor is bound
    /// to `base + offset`. Fails with `CyclicGraph` if the graph cannot be
    /// scheduled.
    pub fn data_malloc(&mut self) -> Result<()> {
        if !self.topo_sort() {
            return Err(Error::CyclicGraph);
        }

        let mut offsets = Vec::with_capacity(self.tensor_order.len());
        for &id in &self.tensor_order {
            let bytes = self.lookup_tensor(id)?.bytes();
            offsets.push((id, self.allocator.alloc(bytes)?));
        }

        let base = self.allocator.get_ptr()?;
        for (id, offset) in offsets {
            if let Some(tensor) = self.tensors.get_mut(&id) {
                // Every offset lies below the allocator's high-water mark,
                // which the backing buffer covers.
                tensor.set_data(unsafe { base.add(offset) });
            }
        }

        info!(
            "Planned {} tensors into {} bytes",
            self.tensor_order.len(),
            self.allocator.peak()
        );
        self.allocator.info();
        Ok(())
    }
}
