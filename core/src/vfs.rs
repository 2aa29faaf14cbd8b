//! Character-device surface shared by drivers.

use core::any::Any;

use axerrno::AxResult;
use bitflags::bitflags;
use memory_addr::{PhysAddrRange, VirtAddr};

bitflags! {
    /// Page attributes requested for a device mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MmapFlags: u32 {
        /// I/O mapping, never swapped or core-dumped.
        const IO = 1 << 0;
        /// Strongly ordered, uncached.
        const UNCACHED = 1 << 1;
        /// Write-combined.
        const WRITE_COMBINE = 1 << 2;
        /// Never executable.
        const NO_EXEC = 1 << 3;
    }
}

/// What a device wants mapped for an `mmap` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMmap {
    /// Request rejected.
    None,
    /// Remap a physical range with the given attributes.
    Physical(PhysAddrRange, MmapFlags),
    /// Remap pages of an existing virtual allocation.
    Vmalloc { start: VirtAddr, size: usize },
}

/// Operations of an opened device node.
pub trait DeviceOps: Send + Sync {
    /// Handles a control command. `arg` is the marshaled request payload and
    /// is rewritten in place with the reply.
    fn ioctl(&self, cmd: u32, arg: &mut [u8]) -> AxResult<usize>;

    /// Resolves a mapping request at `offset` (in pages) of `length` bytes.
    fn mmap(&self, _offset: usize, _length: usize) -> DeviceMmap {
        DeviceMmap::None
    }

    fn as_any(&self) -> &dyn Any;
}
