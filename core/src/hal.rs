//! Hardware handles handed to drivers at probe time.

use core::ptr::{read_volatile, write_volatile};
use core::time::Duration;
use std::time::Instant;

use memory_addr::{PhysAddr, VirtAddr};

/// A window of 32-bit hardware registers addressed by byte offset.
pub trait RegisterIo: Send + Sync {
    /// Reads the register at `offset`.
    fn read(&self, offset: usize) -> u32;

    /// Writes `value` to the register at `offset`.
    fn write(&self, offset: usize, value: u32);

    /// Read-modify-write setting `bits`.
    fn set_bits(&self, offset: usize, bits: u32) {
        let value = self.read(offset);
        self.write(offset, value | bits);
    }

    /// Read-modify-write clearing `bits`.
    fn clear_bits(&self, offset: usize, bits: u32) {
        let value = self.read(offset);
        self.write(offset, value & !bits);
    }
}

/// An ioremapped register window.
pub struct MmioRegion {
    base: *mut u8,
    size: usize,
}

// SAFETY: register access goes through volatile loads/stores of whole words;
// ordering between callers is the owning driver's job.
unsafe impl Sync for MmioRegion {}
unsafe impl Send for MmioRegion {}

impl MmioRegion {
    /// Creates a register window.
    ///
    /// # Safety
    /// `base` must point to `size` bytes of mapped device memory that stays
    /// mapped for the lifetime of the region.
    pub const unsafe fn new(base: *mut u8, size: usize) -> Self {
        Self { base, size }
    }

    /// Window length in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl RegisterIo for MmioRegion {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.size);
        unsafe { read_volatile(self.base.add(offset) as *const u32) }
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.size);
        unsafe { write_volatile(self.base.add(offset) as *mut u32, value) }
    }
}

/// A gateable clock. `prepare_enable` and `disable_unprepare` must be
/// balanced by the caller; the provider keeps its own enable count.
pub trait ClockGate: Send + Sync {
    fn prepare_enable(&self);
    fn disable_unprepare(&self);
}

/// A voltage regulator feeding a device on platforms without a power
/// controller.
pub trait Regulator: Send + Sync {
    fn enable(&self);
    fn disable(&self);
}

/// Board-level power gate of an idle block (`true` gates power off).
pub trait PowerGate: Send + Sync {
    fn set_gated(&self, gated: bool);
}

/// Time source and delays.
pub trait Timer: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    /// Sleeps for at least `ms` milliseconds.
    fn msleep(&self, ms: u64);

    /// Busy-delays for at least `us` microseconds.
    fn udelay(&self, us: u64);
}

/// [`Timer`] backed by the host clock.
pub struct SystemTimer {
    origin: Instant,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for SystemTimer {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn msleep(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    fn udelay(&self, us: u64) {
        let end = Instant::now() + Duration::from_micros(us);
        while Instant::now() < end {
            core::hint::spin_loop();
        }
    }
}

/// A coherent DMA allocation: CPU mapping and device-visible address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaInfo {
    pub cpu_addr: VirtAddr,
    pub bus_addr: PhysAddr,
}

/// Physical (coherent) and virtual memory pools.
pub trait DmaAllocator: Send + Sync {
    /// Allocates `size` bytes (already page aligned by the caller) of
    /// physically contiguous, CPU-coherent memory.
    fn alloc_coherent(&self, size: usize) -> Option<DmaInfo>;

    /// Returns a coherent allocation to the pool.
    ///
    /// # Safety
    /// `info` and `size` must describe a live allocation returned by
    /// [`DmaAllocator::alloc_coherent`] that nobody accesses afterwards.
    unsafe fn dealloc_coherent(&self, info: DmaInfo, size: usize);

    /// Allocates `size` bytes of zeroed, user-mappable virtual memory with
    /// no contiguity guarantee.
    fn alloc_virtual(&self, size: usize) -> Option<VirtAddr>;

    /// Frees a virtual allocation.
    ///
    /// # Safety
    /// `addr` must come from [`DmaAllocator::alloc_virtual`] and not be
    /// accessed afterwards.
    unsafe fn dealloc_virtual(&self, addr: VirtAddr, size: usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmio_region_reads_back_words() {
        let mut backing = vec![0u32; 16];
        let region = unsafe { MmioRegion::new(backing.as_mut_ptr() as *mut u8, 64) };
        region.write(0x8, 0xdead_beef);
        region.set_bits(0x8, 0x1);
        region.clear_bits(0x8, 0xf000_0000);
        assert_eq!(region.read(0x8), 0x0ead_beef);
        assert_eq!(region.read(0x4), 0);
        assert_eq!(region.size(), 64);
        drop(region);
        assert_eq!(backing[2], 0x0ead_beef);
    }

    #[test]
    fn system_timer_is_monotonic() {
        let timer = SystemTimer::new();
        let t0 = timer.now();
        timer.udelay(50);
        assert!(timer.now() > t0);
    }
}
