use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{MapError, UnmapError};

/// Failures of the frame allocator and the page-table manager.
///
/// The two are mutually dependent (mapped allocations need page tables,
/// page tables need frames), so they share one error type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemoryError {
    #[error("out of memory: no run of {frames} free frames")]
    OutOfMemory { frames: usize },

    #[error("zero-sized frame request")]
    EmptyRequest,

    #[error("boot memory map has no usable region")]
    NoUsableMemory,

    #[error("couldn't find bitmap location for {bytes} bytes")]
    NoBitmapLocation { bytes: u64 },

    #[error("frame {addr} lies outside the boot kernel mapping")]
    OutsideBootWindow { addr: PhysicalAddress },

    #[error("frame {addr} is not managed by the frame bitmap")]
    UnmanagedFrame { addr: PhysicalAddress },

    #[error(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    Unmap(#[from] UnmapError),

    #[error("heap: {0}")]
    Heap(#[from] BuddyError),
}

/// Failures of the buddy heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BuddyError {
    #[error("allocation of {size} bytes exceeds the largest heap block")]
    TooLarge { size: usize },

    #[error("out of heap memory for {size} bytes")]
    OutOfMemory { size: usize },

    #[error("{addr} is not an allocated heap block")]
    NotAllocated { addr: VirtualAddress },

    #[error("{addr} lies outside the heap pool")]
    OutsidePool { addr: VirtualAddress },

    #[error("{addr} lies in the bitmap block of its heap page")]
    Reserved { addr: VirtualAddress },

    #[error("heap pool must be page aligned and a whole number of pages")]
    UnalignedPool,
}
