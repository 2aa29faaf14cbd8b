//! In-memory stand-ins for the [`hal`](crate::hal) handles.
//!
//! Register banks keep every value in a map and can run a hook after each
//! write, which is how tests model bits that hardware clears on its own
//! (request/acknowledge handshakes, self-clearing resets).

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicUsize, Ordering};
use std::vec::Vec;

use core::time::Duration;

use hashbrown::HashMap;
use memory_addr::{PhysAddr, VirtAddr};
use spin::Mutex;

use crate::hal::{ClockGate, DmaAllocator, DmaInfo, PowerGate, Regulator, RegisterIo, Timer};

const MOCK_PAGE_SIZE: usize = 4096;

/// Hook run after every register write, with the bank already updated.
pub type WriteHook = Box<dyn Fn(&mut HashMap<usize, u32>, usize, u32) + Send + Sync>;

/// A register window backed by a map. Unwritten registers read as zero.
pub struct MockRegs {
    regs: Mutex<HashMap<usize, u32>>,
    writes: Mutex<Vec<(usize, u32)>>,
    hook: Mutex<Option<WriteHook>>,
}

impl MockRegs {
    pub fn new() -> Self {
        Self {
            regs: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        }
    }

    /// Creates a bank that runs `hook` after each write.
    pub fn with_hook(
        hook: impl Fn(&mut HashMap<usize, u32>, usize, u32) + Send + Sync + 'static,
    ) -> Self {
        let regs = Self::new();
        *regs.hook.lock() = Some(Box::new(hook));
        regs
    }

    /// Sets a register without logging a write or running the hook, the
    /// way hardware changes its own status bits.
    pub fn poke(&self, offset: usize, value: u32) {
        self.regs.lock().insert(offset, value);
    }

    pub fn peek(&self, offset: usize) -> u32 {
        self.regs.lock().get(&offset).copied().unwrap_or(0)
    }

    /// Zeroes every register, as after a power loss.
    pub fn clear(&self) {
        self.regs.lock().clear();
    }

    /// All values written to `offset`, oldest first.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.writes
            .lock()
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Every write as `(offset, value)`, oldest first.
    pub fn write_log(&self) -> Vec<(usize, u32)> {
        self.writes.lock().clone()
    }

    pub fn clear_log(&self) {
        self.writes.lock().clear();
    }
}

impl Default for MockRegs {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterIo for MockRegs {
    fn read(&self, offset: usize) -> u32 {
        self.peek(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        self.writes.lock().push((offset, value));
        let mut regs = self.regs.lock();
        regs.insert(offset, value);
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(&mut regs, offset, value);
        }
    }
}

/// A clock that counts enables.
#[derive(Default)]
pub struct MockClock {
    enabled: AtomicIsize,
    total_enables: AtomicUsize,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current enable count (negative means unbalanced disables).
    pub fn enable_count(&self) -> isize {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn total_enables(&self) -> usize {
        self.total_enables.load(Ordering::SeqCst)
    }
}

impl ClockGate for MockClock {
    fn prepare_enable(&self) {
        self.enabled.fetch_add(1, Ordering::SeqCst);
        self.total_enables.fetch_add(1, Ordering::SeqCst);
    }

    fn disable_unprepare(&self) {
        self.enabled.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A regulator that counts enables.
#[derive(Default)]
pub struct MockRegulator {
    enabled: AtomicIsize,
}

impl MockRegulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_count(&self) -> isize {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl Regulator for MockRegulator {
    fn enable(&self) {
        self.enabled.fetch_add(1, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.enabled.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A power gate remembering its last state and transition count.
#[derive(Default)]
pub struct MockPowerGate {
    gated: AtomicBool,
    transitions: AtomicUsize,
}

impl MockPowerGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_gated(&self) -> bool {
        self.gated.load(Ordering::SeqCst)
    }

    pub fn transitions(&self) -> usize {
        self.transitions.load(Ordering::SeqCst)
    }
}

impl PowerGate for MockPowerGate {
    fn set_gated(&self, gated: bool) {
        self.gated.store(gated, Ordering::SeqCst);
        self.transitions.fetch_add(1, Ordering::SeqCst);
    }
}

/// Virtual time: sleeping and delaying advance the clock instantly.
#[derive(Default)]
pub struct MockTimer {
    nanos: AtomicU64,
    delays_us: Mutex<Vec<u64>>,
}

impl MockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `udelay` request, oldest first.
    pub fn delays_us(&self) -> Vec<u64> {
        self.delays_us.lock().clone()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Timer for MockTimer {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn msleep(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
        std::thread::yield_now();
    }

    fn udelay(&self, us: u64) {
        self.delays_us.lock().push(us);
        self.advance(Duration::from_micros(us));
    }
}

struct MockAllocation {
    layout: Layout,
    bus_addr: PhysAddr,
}

/// A DMA pool backed by page-aligned heap memory, so CPU addresses can be
/// dereferenced. Bus addresses are synthetic and never overlap.
pub struct MockDmaAllocator {
    coherent: Mutex<HashMap<usize, MockAllocation>>,
    virtual_: Mutex<HashMap<usize, Layout>>,
    next_bus: AtomicUsize,
    fail: AtomicBool,
    limit: AtomicUsize,
}

impl MockDmaAllocator {
    /// Bus address of the first allocation.
    pub const BUS_BASE: usize = 0x1000_0000;

    pub fn new() -> Self {
        Self {
            coherent: Mutex::new(HashMap::new()),
            virtual_: Mutex::new(HashMap::new()),
            next_bus: AtomicUsize::new(Self::BUS_BASE),
            fail: AtomicBool::new(false),
            limit: AtomicUsize::new(usize::MAX),
        }
    }

    /// Makes every following allocation fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Caps the number of live coherent allocations.
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::SeqCst);
    }

    pub fn live_coherent(&self) -> usize {
        self.coherent.lock().len()
    }

    pub fn live_virtual(&self) -> usize {
        self.virtual_.lock().len()
    }

    fn page_layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size, MOCK_PAGE_SIZE).ok()
    }
}

impl Default for MockDmaAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAllocator for MockDmaAllocator {
    fn alloc_coherent(&self, size: usize) -> Option<DmaInfo> {
        if size == 0 || self.fail.load(Ordering::SeqCst) {
            return None;
        }
        let mut live = self.coherent.lock();
        if live.len() >= self.limit.load(Ordering::SeqCst) {
            return None;
        }
        let layout = Self::page_layout(size)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        let span = size.div_ceil(MOCK_PAGE_SIZE) * MOCK_PAGE_SIZE;
        let bus_addr = PhysAddr::from_usize(self.next_bus.fetch_add(span, Ordering::SeqCst));
        live.insert(ptr as usize, MockAllocation { layout, bus_addr });
        Some(DmaInfo {
            cpu_addr: VirtAddr::from_usize(ptr as usize),
            bus_addr,
        })
    }

    unsafe fn dealloc_coherent(&self, info: DmaInfo, size: usize) {
        let entry = self.coherent.lock().remove(&info.cpu_addr.as_usize());
        let Some(entry) = entry else {
            panic!("mock dma: freeing unknown cpu address {:#x}", info.cpu_addr.as_usize());
        };
        assert_eq!(entry.bus_addr, info.bus_addr, "mock dma: bus address mismatch");
        assert_eq!(entry.layout.size(), size, "mock dma: size mismatch");
        unsafe { dealloc(info.cpu_addr.as_mut_ptr(), entry.layout) };
    }

    fn alloc_virtual(&self, size: usize) -> Option<VirtAddr> {
        if size == 0 || self.fail.load(Ordering::SeqCst) {
            return None;
        }
        let layout = Self::page_layout(size)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        self.virtual_.lock().insert(ptr as usize, layout);
        Some(VirtAddr::from_usize(ptr as usize))
    }

    unsafe fn dealloc_virtual(&self, addr: VirtAddr, _size: usize) {
        let layout = self.virtual_.lock().remove(&addr.as_usize());
        let Some(layout) = layout else {
            panic!("mock vmalloc: freeing unknown address {:#x}", addr.as_usize());
        };
        unsafe { dealloc(addr.as_mut_ptr(), layout) };
    }
}

impl Drop for MockDmaAllocator {
    fn drop(&mut self) {
        for (addr, entry) in self.coherent.lock().drain() {
            unsafe { dealloc(addr as *mut u8, entry.layout) };
        }
        for (addr, layout) in self.virtual_.lock().drain() {
            unsafe { dealloc(addr as *mut u8, layout) };
        }
    }
}
