use crate::page_table::TableLevel;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Failure to install a mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// The leaf entry for the address is already present.
    #[error("virtual address {va} already mapped to {existing}")]
    AlreadyMapped {
        va: VirtualAddress,
        existing: PhysicalAddress,
    },
}

/// Failure to remove a mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum UnmapError {
    /// The walk hit an absent entry at `level`.
    #[error("virtual address {va} has not been mapped (absent at {level})")]
    NotMapped { va: VirtualAddress, level: TableLevel },
}
