pub mod allocator;
pub mod runtime;

pub use allocator::Allocator;

pub use runtime::{
    Blob,
    CpuRuntime,
    Device,
    Runtime,
    BACKING_ALIGNMENT,
};
