//! DMA buffer registry
//!
//! Every coherent buffer handed to user space is recorded here so that the
//! last close can reclaim whatever the sessions forgot to free.

use std::sync::Arc;
use std::vec::Vec;

use memory_addr::{PhysAddr, VirtAddr, align_up_4k};
use mxcvpu_core::hal::{DmaAllocator, DmaInfo};
use spin::Mutex;

use super::error::{VpuError, VpuResult};
use super::types::VpuMemDesc;

/// One coherent allocation. A zero `cpu_addr` means "not allocated".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalBuffer {
    pub cpu_addr: VirtAddr,
    pub phys_addr: PhysAddr,
    pub size: usize,
}

impl PhysicalBuffer {
    pub const fn null() -> Self {
        Self {
            cpu_addr: VirtAddr::from_usize(0),
            phys_addr: PhysAddr::from_usize(0),
            size: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.cpu_addr.as_usize() == 0
    }

    pub fn desc(&self) -> VpuMemDesc {
        VpuMemDesc {
            size: self.size as u64,
            phy_addr: self.phys_addr.as_usize() as u64,
            cpu_addr: self.cpu_addr.as_usize() as u64,
            virt_uaddr: 0,
        }
    }

    /// Whether `[phys, phys + len)` lies inside this buffer.
    pub fn contains_phys(&self, phys: PhysAddr, len: usize) -> bool {
        let start = self.phys_addr.as_usize();
        let Some(end) = phys.as_usize().checked_add(len) else {
            return false;
        };
        !self.is_null() && phys.as_usize() >= start && end <= start + self.size
    }

    fn dma_info(&self) -> DmaInfo {
        DmaInfo {
            cpu_addr: self.cpu_addr,
            bus_addr: self.phys_addr,
        }
    }
}

impl Default for PhysicalBuffer {
    fn default() -> Self {
        Self::null()
    }
}

/// Allocates a page-rounded coherent buffer.
pub fn alloc_dma_buffer(dma: &dyn DmaAllocator, size: usize) -> VpuResult<PhysicalBuffer> {
    if size == 0 {
        return Err(VpuError::ResourceExhausted);
    }
    let size = align_up_4k(size);
    let info = dma.alloc_coherent(size).ok_or_else(|| {
        error!("Physical memory allocation error ({:#x} bytes)", size);
        VpuError::ResourceExhausted
    })?;
    Ok(PhysicalBuffer {
        cpu_addr: info.cpu_addr,
        phys_addr: info.bus_addr,
        size,
    })
}

/// Frees `buf` and nulls it. Freeing a null buffer does nothing.
pub fn free_dma_buffer(dma: &dyn DmaAllocator, buf: &mut PhysicalBuffer) {
    if buf.is_null() {
        return;
    }
    // SAFETY: non-null buffers only come from `alloc_dma_buffer` and are
    // nulled right after their single free.
    unsafe { dma.dealloc_coherent(buf.dma_info(), buf.size) };
    *buf = PhysicalBuffer::null();
}

/// Insertion-ordered set of live buffers keyed by CPU address.
pub struct BufferRegistry {
    dma: Arc<dyn DmaAllocator>,
    buffers: Mutex<Vec<PhysicalBuffer>>,
}

impl BufferRegistry {
    pub fn new(dma: Arc<dyn DmaAllocator>) -> Self {
        Self {
            dma,
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Allocates a buffer of at least `size` bytes and records it.
    /// Nothing is recorded when the allocation fails.
    pub fn register(&self, size: usize) -> VpuResult<PhysicalBuffer> {
        let buf = alloc_dma_buffer(self.dma.as_ref(), size)?;
        self.buffers.lock().push(buf);
        debug!(
            "registered buffer cpu {:#x} phys {:#x} size {:#x}",
            buf.cpu_addr.as_usize(),
            buf.phys_addr.as_usize(),
            buf.size
        );
        Ok(buf)
    }

    /// Frees the buffer at `cpu_addr`. Unknown addresses are ignored.
    ///
    /// Returns whether a buffer was freed.
    pub fn unregister(&self, cpu_addr: VirtAddr) -> bool {
        let removed = {
            let mut buffers = self.buffers.lock();
            buffers
                .iter()
                .position(|b| b.cpu_addr == cpu_addr)
                .map(|idx| buffers.remove(idx))
        };
        match removed {
            Some(mut buf) => {
                free_dma_buffer(self.dma.as_ref(), &mut buf);
                true
            }
            None => {
                debug!("free of unknown buffer {:#x} ignored", cpu_addr.as_usize());
                false
            }
        }
    }

    /// Frees every recorded buffer in insertion order.
    pub fn drain_all(&self) -> usize {
        let drained: Vec<_> = core::mem::take(&mut *self.buffers.lock());
        let count = drained.len();
        for mut buf in drained {
            free_dma_buffer(self.dma.as_ref(), &mut buf);
        }
        if count > 0 {
            info!("reclaimed {} leaked buffers", count);
        }
        count
    }

    pub fn lookup(&self, cpu_addr: VirtAddr) -> Option<PhysicalBuffer> {
        self.buffers
            .lock()
            .iter()
            .find(|b| b.cpu_addr == cpu_addr)
            .copied()
    }

    /// Whether `[phys, phys + len)` lies inside one recorded buffer.
    pub fn contains_phys(&self, phys: PhysAddr, len: usize) -> bool {
        self.buffers
            .lock()
            .iter()
            .any(|b| b.contains_phys(phys, len))
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }
}

impl Drop for BufferRegistry {
    fn drop(&mut self) {
        self.drain_all();
    }
}
