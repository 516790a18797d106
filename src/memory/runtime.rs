use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::fmt::Debug;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use log::error;
use strum_macros::{Display, EnumIter};

use crate::error::{Error, Result};

/// Alignment of every backing allocation made by the CPU runtime
pub const BACKING_ALIGNMENT: usize = 64;

/// Device a runtime executes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[non_exhaustive]
pub enum Device {
    #[strum(serialize = "CPU")]
    Cpu,
}

/// The seam through which the planner obtains real memory.
///
/// The graph and its allocator never touch the system allocator directly;
/// they ask the runtime that owns their tensors.
pub trait Runtime: Send + Sync + Debug {
    /// Allocate `bytes` bytes of zeroed memory
    fn alloc(&self, bytes: usize) -> Result<NonNull<u8>>;

    /// Release memory previously returned by `alloc`
    fn dealloc(&self, ptr: NonNull<u8>);

    /// Device this runtime executes on
    fn device(&self) -> Device;

    /// Display name of the runtime
    fn name(&self) -> &str;

    /// Whether the runtime's memory is host memory
    fn is_cpu(&self) -> bool {
        self.device() == Device::Cpu
    }
}

/// Runtime backed by the Rust global allocator
#[derive(Debug)]
pub struct CpuRuntime {
    allocated: AtomicUsize,
    allocations: Mutex<HashMap<usize, Layout>>,
}

impl CpuRuntime {
    /// Create a new CPU runtime
    pub fn new() -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            allocations: Mutex::new(HashMap::new()),
        }
    }

    /// Bytes currently held by live allocations
    pub fn allocated_memory(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl Default for CpuRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for CpuRuntime {
    fn alloc(&self, bytes: usize) -> Result<NonNull<u8>> {
        // Zero-sized layouts are not allowed by the global allocator
        let size = std::cmp::max(1, bytes);

        let layout = Layout::from_size_align(size, BACKING_ALIGNMENT).map_err(|e| {
            Error::AllocationFailed(format!(
                "Invalid memory layout: size={}, alignment={}, error={}",
                size, BACKING_ALIGNMENT, e
            ))
        })?;

        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            Error::AllocationFailed(format!(
                "Failed to allocate memory: size={}, alignment={}",
                size, BACKING_ALIGNMENT
            ))
        })?;

        let mut allocations = match self.allocations.lock() {
            Ok(guard) => guard,
            Err(_) => {
                unsafe {
                    alloc::dealloc(ptr.as_ptr(), layout);
                }
                return Err(Error::AllocationFailed(
                    "Failed to lock allocations mutex".to_string(),
                ));
            }
        };
        allocations.insert(ptr.as_ptr() as usize, layout);
        self.allocated.fetch_add(size, Ordering::Relaxed);

        Ok(ptr)
    }

    fn dealloc(&self, ptr: NonNull<u8>) {
        let mut allocations = match self.allocations.lock() {
            Ok(guard) => guard,
            Err(_) => {
                error!("Failed to lock allocations mutex, leaking {:p}", ptr);
                return;
            }
        };

        match allocations.remove(&(ptr.as_ptr() as usize)) {
            Some(layout) => {
                unsafe {
                    alloc::dealloc(ptr.as_ptr(), layout);
                }
                self.allocated.fetch_sub(layout.size(), Ordering::Relaxed);
            }
            None => error!("Pointer {:p} was not allocated by this runtime", ptr),
        }
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn name(&self) -> &str {
        "CPU"
    }
}

impl Drop for CpuRuntime {
    fn drop(&mut self) {
        if let Ok(allocations) = self.allocations.get_mut() {
            for (ptr, layout) in allocations.drain() {
                unsafe {
                    alloc::dealloc(ptr as *mut u8, layout);
                }
            }
        }
    }
}

/// Handle to the memory a tensor is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blob {
    ptr: NonNull<u8>,
}

// SAFETY: a blob is an address into memory owned by a graph's allocator. It
// is only dereferenced by kernels, which the execution engine runs one at a
// time in schedule order.
unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

impl Blob {
    /// Wrap a base pointer
    pub fn new(ptr: NonNull<u8>) -> Self {
        Self { ptr }
    }

    /// Raw address of the blob
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn as_non_null(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Blob starting `offset` bytes after this one.
    ///
    /// # Safety
    /// `offset` must stay within the allocation this blob points into.
    pub(crate) unsafe fn add(&self, offset: usize) -> Blob {
        Blob {
            ptr: NonNull::new_unchecked(self.ptr.as_ptr().add(offset)),
        }
    }
}
