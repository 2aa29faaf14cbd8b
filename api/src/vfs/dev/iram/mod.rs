//! On-chip IRAM pool
//!
//! A small SRAM block reserved at boot for accelerator working buffers.
//! Callers get a physical base (and a CPU address when the pool has been
//! mapped) and hand both back on release.

mod allocator;

use core::fmt;

use axerrno::AxError;
use memory_addr::{PhysAddr, VirtAddr};
use spin::Mutex;

pub use allocator::{Extent, ExtentAllocator, FreeOutcome};

/// i.MX6Q/DL IRAM physical base.
pub const IMX6_IRAM_BASE: usize = 0x0090_0000;
/// i.MX6Q/DL IRAM bytes available to drivers.
pub const IMX6_IRAM_SIZE: usize = 0x3F000;
/// Pool granule is one page.
pub const IRAM_PAGE_ORDER: u32 = 12;

/// IRAM pool errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IramError {
    /// No free extent large enough
    Exhausted,
    /// Block lies outside the pool or is misaligned
    InvalidRange,
    /// Block is already (partly) free
    DoubleFree,
}

impl fmt::Display for IramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "IRAM exhausted"),
            Self::InvalidRange => write!(f, "Address outside IRAM pool"),
            Self::DoubleFree => write!(f, "IRAM block already free"),
        }
    }
}

impl From<IramError> for AxError {
    fn from(err: IramError) -> Self {
        match err {
            IramError::Exhausted => AxError::NoMemory,
            IramError::InvalidRange | IramError::DoubleFree => AxError::InvalidInput,
        }
    }
}

pub type IramResult<T> = Result<T, IramError>;

/// A block handed out by [`IramPool::alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IramBlock {
    pub phys: PhysAddr,
    /// CPU mapping, if the pool is mapped.
    pub virt: Option<VirtAddr>,
    /// Requested size (not rounded).
    pub size: usize,
}

impl IramBlock {
    /// Inclusive last byte of the requested size.
    pub fn last(&self) -> PhysAddr {
        self.phys + self.size.saturating_sub(1)
    }
}

/// Fixed physical range managed by a first-fit [`ExtentAllocator`].
pub struct IramPool {
    phys_base: PhysAddr,
    virt_base: Option<VirtAddr>,
    extents: Mutex<ExtentAllocator>,
}

impl IramPool {
    /// Creates a pool over `[phys_base, phys_base + size)`.
    pub fn new(phys_base: PhysAddr, size: usize, order: u32) -> Self {
        info!(
            "IRAM pool: phys {:#x}, size {:#x}",
            phys_base.as_usize(),
            size
        );
        Self {
            phys_base,
            virt_base: None,
            extents: Mutex::new(ExtentAllocator::new(size, order)),
        }
    }

    /// The pool i.MX6Q/DL reserve for the VPU.
    pub fn imx6() -> Self {
        Self::new(
            PhysAddr::from_usize(IMX6_IRAM_BASE),
            IMX6_IRAM_SIZE,
            IRAM_PAGE_ORDER,
        )
    }

    /// Records where the pool is mapped in CPU address space.
    pub fn with_virt_base(mut self, virt_base: VirtAddr) -> Self {
        self.virt_base = Some(virt_base);
        self
    }

    pub fn phys_base(&self) -> PhysAddr {
        self.phys_base
    }

    pub fn free_bytes(&self) -> usize {
        self.extents.lock().free_bytes()
    }

    /// Allocates `size` bytes.
    pub fn alloc(&self, size: usize) -> IramResult<IramBlock> {
        let extent = self
            .extents
            .lock()
            .allocate(size)
            .ok_or(IramError::Exhausted)?;
        let block = IramBlock {
            phys: self.phys_base + extent.offset,
            virt: self.virt_base.map(|v| v + extent.offset),
            size,
        };
        debug!(
            "IRAM alloc {:#x} bytes at {:#x}",
            size,
            block.phys.as_usize()
        );
        Ok(block)
    }

    /// Returns a block previously handed out by [`alloc`](Self::alloc).
    ///
    /// Double frees and foreign blocks are logged and rejected; the pool is
    /// left untouched.
    pub fn free(&self, block: IramBlock) -> IramResult<()> {
        let offset = block
            .phys
            .as_usize()
            .checked_sub(self.phys_base.as_usize())
            .ok_or(IramError::InvalidRange)?;
        match self.extents.lock().free(Extent::new(offset, block.size)) {
            FreeOutcome::Freed => {
                debug!("IRAM free {:#x} bytes at {:#x}", block.size, block.phys.as_usize());
                Ok(())
            }
            FreeOutcome::OutOfRange => {
                error!("IRAM free of foreign block {:#x}", block.phys.as_usize());
                Err(IramError::InvalidRange)
            }
            FreeOutcome::Overlap => {
                error!("IRAM double free at {:#x}", block.phys.as_usize());
                Err(IramError::DoubleFree)
            }
        }
    }
}
