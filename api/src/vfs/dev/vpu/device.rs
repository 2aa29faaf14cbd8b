//! VPU device
//!
//! One [`VpuDevice`] exists per probed VPU. Every open file shares it; the
//! first open powers the codec up and the last close reclaims everything
//! the sessions left behind and powers it down.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use core::time::Duration;
use std::sync::Arc;

use memory_addr::{PAGE_SIZE_4K, PhysAddr, PhysAddrRange, VirtAddr, align_up_4k};
use mxcvpu_core::hal::{ClockGate, DmaAllocator, PowerGate, RegisterIo, Timer};
use spin::Mutex;

use super::buffer::{BufferRegistry, PhysicalBuffer, alloc_dma_buffer, free_dma_buffer};
use super::config::VpuConfig;
use super::error::{VpuError, VpuResult};
use super::file::VpuFile;
use super::irq::{self, CompletionChannel, IrqWorker};
use super::lock::SessionLock;
use super::platform::{ClockEnableGuard, PowerSupply, SrcReset};
use super::regs::*;
use super::types::{IramSetting, SavedContext, VpuMemDesc};
use crate::vfs::dev::iram::{IramBlock, IramPool};
use crate::vfs::{DeviceMmap, MmapFlags};

/// Platform handles the driver is probed with.
pub struct VpuResources {
    /// Codec register window.
    pub regs: Arc<dyn RegisterIo>,
    pub vpu_clk: Arc<dyn ClockGate>,
    pub power: PowerSupply,
    /// SRC domain reset; parts without one skip resets.
    pub reset: Option<Arc<SrcReset>>,
    /// i.MX51 idle power gate.
    pub idle_gate: Option<Arc<dyn PowerGate>>,
    pub dma: Arc<dyn DmaAllocator>,
    pub timer: Arc<dyn Timer>,
    pub iram: Option<Arc<IramPool>>,
}

/// Shared buffer backed by the growable virtual pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualBuffer {
    pub addr: VirtAddr,
    pub size: usize,
}

impl VirtualBuffer {
    const fn null() -> Self {
        Self {
            addr: VirtAddr::from_usize(0),
            size: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.addr.as_usize() == 0
    }

    pub fn desc(&self) -> VpuMemDesc {
        VpuMemDesc {
            size: self.size as u64,
            phy_addr: 0,
            cpu_addr: self.addr.as_usize() as u64,
            virt_uaddr: 0,
        }
    }
}

/// Codec work buffer. It is either allocated by the driver or borrowed
/// from the registry through `SET_BITWORK_MEM`.
#[derive(Debug, Clone, Copy)]
struct WorkBuffer {
    buf: PhysicalBuffer,
    owned: bool,
}

impl WorkBuffer {
    const fn none() -> Self {
        Self {
            buf: PhysicalBuffer::null(),
            owned: false,
        }
    }
}

struct SessionState {
    open_count: usize,
    share: PhysicalBuffer,
    vshare: VirtualBuffer,
    work: WorkBuffer,
    saved: Option<SavedContext>,
    /// User clock enables dropped at suspend, re-applied at resume.
    clk_usercount: usize,
}

/// The VPU device shared by all sessions.
pub struct VpuDevice {
    config: VpuConfig,
    res: VpuResources,
    lock: SessionLock,
    state: Mutex<SessionState>,
    registry: BufferRegistry,
    /// Clock enables requested through `CLKGATE_SETTING`.
    clk_from_ioc: AtomicUsize,
    channel: Arc<CompletionChannel>,
    worker: IrqWorker,
    iram: IramSetting,
    iram_block: Mutex<Option<IramBlock>>,
    next_file_id: AtomicU64,
    shut_down: AtomicBool,
}

impl VpuDevice {
    /// Brings the driver up: reserves IRAM and starts the deferred task.
    pub fn probe(config: VpuConfig, res: VpuResources) -> VpuResult<Arc<Self>> {
        let mut iram = IramSetting::default();
        let mut iram_block = None;
        if let (Some(pool), true) = (&res.iram, config.iram_size > 0) {
            match pool.alloc(config.iram_size) {
                Ok(block) => {
                    iram.start = block.phys.as_usize() as u32;
                    iram.end = block.last().as_usize() as u32;
                    iram_block = Some(block);
                }
                Err(e) => warn!("VPU runs without IRAM: {}", e),
            }
        }

        let channel = Arc::new(CompletionChannel::new());
        let worker = IrqWorker::start(channel.clone())?;
        let registry = BufferRegistry::new(res.dma.clone());

        info!(
            "VPU initialized: {:?}, IRAM [{:#x}, {:#x}]",
            config.soc, iram.start, iram.end
        );
        Ok(Arc::new(Self {
            config,
            res,
            lock: SessionLock::new(),
            state: Mutex::new(SessionState {
                open_count: 0,
                share: PhysicalBuffer::null(),
                vshare: VirtualBuffer::null(),
                work: WorkBuffer::none(),
                saved: None,
                clk_usercount: 0,
            }),
            registry,
            clk_from_ioc: AtomicUsize::new(0),
            channel,
            worker,
            iram,
            iram_block: Mutex::new(iram_block),
            next_file_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &VpuConfig {
        &self.config
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    pub fn user_clock_count(&self) -> usize {
        self.clk_from_ioc.load(Ordering::SeqCst)
    }

    pub(super) fn channel(&self) -> &CompletionChannel {
        &self.channel
    }

    fn clk(&self) -> &dyn ClockGate {
        self.res.vpu_clk.as_ref()
    }

    fn regs(&self) -> &dyn RegisterIo {
        self.res.regs.as_ref()
    }

    /// Polls `done` every `poll_interval` until `busy_timeout` expires.
    fn poll_until(&self, mut done: impl FnMut() -> bool) -> bool {
        let timer = self.res.timer.as_ref();
        let deadline = timer.now() + self.config.busy_timeout;
        let interval = self.config.poll_interval.as_millis().max(1) as u64;
        while !done() {
            if timer.now() >= deadline {
                return done();
            }
            timer.msleep(interval);
        }
        true
    }

    fn reset_domain(&self) -> VpuResult<()> {
        match &self.res.reset {
            Some(reset) => reset.reset_vpu(),
            None => {
                debug!("no VPU reset controller");
                Ok(())
            }
        }
    }

    fn set_idle_gate(&self, gated: bool) {
        if !self.config.soc.has_power_gate() {
            return;
        }
        if let Some(gate) = &self.res.idle_gate {
            gate.set_gated(gated);
        }
    }

    /// Opens a session. The first one powers the codec up.
    pub fn open(self: &Arc<Self>) -> VpuResult<VpuFile> {
        let _guard = self.lock.lock();
        let first = self.state.lock().open_count == 0;
        if first {
            self.res.power.acquire()?;
            if self.config.soc.is_imx6() {
                let _clk = ClockEnableGuard::new(self.clk());
                if self.regs().read(BIT_CUR_PC) != 0 {
                    debug!("Not power off before vpu open!");
                }
            }
        }
        self.state.lock().open_count += 1;
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        debug!("VPU open #{}", id);
        Ok(VpuFile::new(self.clone(), id))
    }

    /// Closes a session. The last one idles the codec, frees every session
    /// buffer and powers down.
    ///
    /// On [`VpuError::HardwareBusy`] the codec is left powered with its
    /// buffers allocated; the session is still counted as closed.
    pub fn release(&self) -> VpuResult<()> {
        let _guard = self.lock.lock();
        {
            let mut st = self.state.lock();
            if st.open_count == 0 {
                return Ok(());
            }
            st.open_count -= 1;
            if st.open_count > 0 {
                return Ok(());
            }
        }

        self.quiesce()?;

        self.registry.drain_all();
        {
            let mut st = self.state.lock();
            if !st.work.owned && !st.work.buf.is_null() {
                // borrowed from the registry, which is now empty
                st.work = WorkBuffer::none();
            }
            free_dma_buffer(self.res.dma.as_ref(), &mut st.share);
            if !st.vshare.is_null() {
                // SAFETY: `vshare` only ever holds an `alloc_virtual` result.
                unsafe { self.res.dma.dealloc_virtual(st.vshare.addr, st.vshare.size) };
                st.vshare = VirtualBuffer::null();
            }
        }

        let usercount = self.clk_from_ioc.swap(0, Ordering::SeqCst);
        for _ in 0..usercount {
            self.clk().disable_unprepare();
        }

        self.res.power.release()?;
        info!("VPU released");
        Ok(())
    }

    /// Waits for the codec to stop before power-off.
    fn quiesce(&self) -> VpuResult<()> {
        let regs = self.regs();
        let clk = self.clk();

        clk.prepare_enable();
        if regs.read(BIT_CUR_PC) != 0 {
            if !self.poll_until(|| regs.read(BIT_BUSY_FLAG) == 0) {
                warn!("VPU timeout during release");
            }
            clk.disable_unprepare();

            self.worker.cancel_sync();
            self.worker.flush();
            self.channel.reset();

            clk.prepare_enable();
            if regs.read(BIT_BUSY_FLAG) != 0 {
                if self.config.soc.fatal_on_busy_release() {
                    error!("fatal error: can't gate/power off when VPU is busy");
                    clk.disable_unprepare();
                    return Err(VpuError::HardwareBusy);
                }
                regs.write(GDI_BUS_CTRL, GDI_BUS_DRAIN_REQ);
                if !self.poll_until(|| regs.read(GDI_BUS_STATUS) == GDI_BUS_DRAINED) {
                    error!("fatal error: can't gate/power off when VPU is busy");
                    regs.write(GDI_BUS_CTRL, 0);
                    clk.disable_unprepare();
                    return Err(VpuError::HardwareBusy);
                }
                if let Err(e) = self.reset_domain() {
                    error!("VPU reset after bus drain failed: {}", e);
                }
            }
        }
        clk.disable_unprepare();
        Ok(())
    }

    /// `PHYMEM_ALLOC`: allocates a registry buffer of at least `desc.size`
    /// bytes and fills in the descriptor (with the rounded size).
    pub fn alloc_phys(&self, desc: &mut VpuMemDesc) -> VpuResult<()> {
        let _guard = self.lock.lock();
        let buf = self.registry.register(desc.size as usize)?;
        desc.size = buf.size as u64;
        desc.phy_addr = buf.phys_addr.as_usize() as u64;
        desc.cpu_addr = buf.cpu_addr.as_usize() as u64;
        Ok(())
    }

    /// `PHYMEM_FREE`: frees the registry buffer at `cpu_addr`, if any.
    pub fn free_phys(&self, cpu_addr: u64) {
        let _guard = self.lock.lock();
        let addr = VirtAddr::from_usize(cpu_addr as usize);
        if self.registry.unregister(addr) {
            let mut st = self.state.lock();
            if !st.work.owned && st.work.buf.cpu_addr == addr {
                st.work = WorkBuffer::none();
            }
        }
    }

    /// `WAIT4INT`. `signal` interrupts the wait.
    pub fn wait_interrupt(&self, timeout_ms: u64, signal: &AtomicBool) -> VpuResult<()> {
        self.channel
            .wait(Duration::from_millis(timeout_ms), signal)
    }

    /// `IRAM_SETTING`: `[0, 0]` when no IRAM was reserved.
    pub fn iram_setting(&self) -> IramSetting {
        self.iram
    }

    /// `CLKGATE_SETTING`.
    pub fn set_clock_gate(&self, enable: bool) {
        if enable {
            self.clk().prepare_enable();
            self.clk_from_ioc.fetch_add(1, Ordering::SeqCst);
            return;
        }
        let dropped = self
            .clk_from_ioc
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            self.clk().disable_unprepare();
        } else {
            warn!("VPU clock gate-off without gate-on ignored");
        }
    }

    /// `GET_SHARE_MEM`: returns the shared buffer, allocating `desc.size`
    /// bytes on first use.
    pub fn get_share_mem(&self, desc: &mut VpuMemDesc) -> VpuResult<()> {
        let _guard = self.lock.lock();
        let mut st = self.state.lock();
        if st.share.is_null() {
            st.share = alloc_dma_buffer(self.res.dma.as_ref(), desc.size as usize)?;
        }
        *desc = st.share.desc();
        Ok(())
    }

    /// `REQ_VSHARE_MEM`: like [`get_share_mem`](Self::get_share_mem) but from
    /// the virtual pool.
    pub fn req_vshare_mem(&self, desc: &mut VpuMemDesc) -> VpuResult<()> {
        let _guard = self.lock.lock();
        let mut st = self.state.lock();
        if st.vshare.is_null() {
            let size = align_up_4k(desc.size as usize);
            let addr = match size {
                0 => None,
                _ => self.res.dma.alloc_virtual(size),
            }
            .ok_or_else(|| {
                error!("vshare allocation of {:#x} bytes failed", size);
                VpuError::ResourceExhausted
            })?;
            st.vshare = VirtualBuffer { addr, size };
        }
        *desc = st.vshare.desc();
        Ok(())
    }

    /// `GET_WORK_ADDR`: returns the work buffer, allocating `desc.size`
    /// bytes if there is none.
    pub fn get_work_addr(&self, desc: &mut VpuMemDesc) -> VpuResult<()> {
        let _guard = self.lock.lock();
        let mut st = self.state.lock();
        if st.work.buf.is_null() {
            let buf = alloc_dma_buffer(self.res.dma.as_ref(), desc.size as usize)?;
            st.work = WorkBuffer { buf, owned: true };
        }
        *desc = st.work.buf.desc();
        Ok(())
    }

    /// `QUERY_BITWORK_MEM`.
    pub fn query_work_mem(&self) -> VpuMemDesc {
        self.state.lock().work.buf.desc()
    }

    /// `SET_BITWORK_MEM`: adopts a buffer from `PHYMEM_ALLOC` as the work
    /// buffer, or detaches it when `desc.cpu_addr` is 0.
    pub fn set_work_mem(&self, desc: &VpuMemDesc) -> VpuResult<()> {
        let _guard = self.lock.lock();
        let addr = VirtAddr::from_usize(desc.cpu_addr as usize);
        let new = if desc.cpu_addr == 0 {
            WorkBuffer::none()
        } else {
            let buf = self.registry.lookup(addr).ok_or_else(|| {
                warn!("work buffer {:#x} was not allocated by this device", desc.cpu_addr);
                VpuError::InvalidArgument
            })?;
            WorkBuffer { buf, owned: false }
        };

        let mut st = self.state.lock();
        if st.work.buf.cpu_addr == new.buf.cpu_addr {
            return Ok(());
        }
        if st.work.owned {
            free_dma_buffer(self.res.dma.as_ref(), &mut st.work.buf);
        }
        st.work = new;
        Ok(())
    }

    /// `SYS_SW_RESET`.
    pub fn sys_sw_reset(&self) -> VpuResult<()> {
        self.reset_domain()
    }

    /// `PHYMEM_CHECK`: reports in `desc.size` whether `desc.phy_addr` is a
    /// usable DRAM address (1) or not (0).
    pub fn check_phys(&self, desc: &mut VpuMemDesc) {
        let valid = self.config.dram_top.is_none_or(|top| desc.phy_addr <= top);
        debug!(
            "vpu: memory phy:{:#x} {} phy memory",
            desc.phy_addr,
            if valid { "is" } else { "isn't" }
        );
        desc.size = valid as u64;
    }

    /// `LOCK_DEV`: takes or drops the session lock across commands.
    pub fn lock_session(&self, lock: bool) {
        if lock {
            self.lock.acquire();
        } else {
            self.lock.release();
        }
    }

    /// System suspend.
    ///
    /// Fails with a retryable [`VpuError::Timeout`] if the codec does not go
    /// idle in time; nothing has been changed in that case.
    pub fn suspend(&self) -> VpuResult<()> {
        let _guard = self.lock.lock();
        if self.state.lock().open_count == 0 {
            self.set_idle_gate(true);
            return Ok(());
        }

        {
            let _clk = ClockEnableGuard::new(self.clk());
            if !self.poll_until(|| self.regs().read(BIT_BUSY_FLAG) == 0) {
                warn!("VPU busy, suspend deferred");
                return Err(VpuError::Timeout);
            }
        }

        let usercount = self.clk_from_ioc.load(Ordering::SeqCst);
        for _ in 0..usercount {
            self.clk().disable_unprepare();
        }
        self.state.lock().clk_usercount = usercount;

        if self.config.soc.skips_context_save() {
            return Ok(());
        }

        let has_work = !self.state.lock().work.buf.is_null();
        if has_work {
            let saved = {
                let _clk = ClockEnableGuard::new(self.clk());
                let regs = self.regs();
                let mut ctx = SavedContext {
                    regs: [0; CONTEXT_REG_COUNT],
                    pc: 0,
                };
                for (i, reg) in ctx.regs.iter_mut().enumerate() {
                    *reg = regs.read(context_reg(i));
                }
                ctx.pc = regs.read(BIT_CUR_PC);
                ctx
            };
            debug!("VPU context saved, pc {:#x}", saved.pc);
            self.state.lock().saved = Some(saved);
        }

        self.set_idle_gate(true);
        if let Err(e) = self.res.power.release() {
            error!("VPU power-down failed, suspend aborted: {}", e);
            self.set_idle_gate(false);
            let mut st = self.state.lock();
            st.saved = None;
            st.clk_usercount = 0;
            drop(st);
            for _ in 0..usercount {
                self.clk().prepare_enable();
            }
            return Err(e);
        }
        info!("VPU suspended");
        Ok(())
    }

    /// System resume.
    pub fn resume(&self) -> VpuResult<()> {
        let _guard = self.lock.lock();
        if self.state.lock().open_count == 0 {
            self.set_idle_gate(false);
            return Ok(());
        }

        let mut result = Ok(());
        if !self.config.soc.skips_context_save() {
            result = self.res.power.acquire();
            if result.is_ok() {
                self.set_idle_gate(false);
                result = self.restore_context();
            } else {
                error!("VPU power-up failed during resume");
                self.state.lock().saved = None;
            }
        }

        // user gates come back even if the codec did not
        let usercount = core::mem::take(&mut self.state.lock().clk_usercount);
        for _ in 0..usercount {
            self.clk().prepare_enable();
        }
        if result.is_ok() {
            info!("VPU resumed");
        }
        result
    }

    fn restore_context(&self) -> VpuResult<()> {
        let (work, saved) = {
            let mut st = self.state.lock();
            (st.work.buf, st.saved.take())
        };
        if work.is_null() {
            return Ok(());
        }

        let _clk = ClockEnableGuard::new(self.clk());
        let regs = self.regs();
        let pc = regs.read(BIT_CUR_PC);
        if pc != 0 {
            warn!("Not power off after suspend (PC={:#x})", pc);
            return Ok(());
        }
        let Some(saved) = saved else {
            warn!("VPU resume without saved context");
            return Ok(());
        };

        for (i, value) in saved.regs.iter().enumerate() {
            regs.write(context_reg(i), *value);
        }
        regs.write(BIT_RESET_CTRL, 0);
        regs.write(BIT_CODE_RUN, 0);
        if self.config.soc.needs_mbc_clear() {
            regs.write(MBC_SET_SUBBLK_EN, 0);
        }

        self.download_boot_code(&work)?;

        if saved.pc != 0 {
            regs.write(BIT_BUSY_FLAG, 1);
            regs.write(BIT_CODE_RUN, 1);
            let mut spins = 0;
            while regs.read(BIT_BUSY_FLAG) != 0 {
                spins += 1;
                if spins >= self.config.power_ack_spin_limit {
                    error!("VPU did not restart after resume");
                    return Err(VpuError::Timeout);
                }
                core::hint::spin_loop();
            }
        } else {
            warn!("PC=0 before suspend");
        }
        Ok(())
    }

    /// Feeds the boot code at the head of the work buffer through
    /// `BIT_CODE_DOWN`, second word of each pair first.
    fn download_boot_code(&self, work: &PhysicalBuffer) -> VpuResult<()> {
        if work.size < BOOT_CODE_BYTES || work.cpu_addr.as_usize() % 4 != 0 {
            error!(
                "work buffer {:#x} ({:#x} bytes) cannot hold boot code",
                work.cpu_addr.as_usize(),
                work.size
            );
            return Err(VpuError::InvalidArgument);
        }
        // SAFETY: the work buffer is a live coherent allocation (driver owned
        // or a registry entry) of at least BOOT_CODE_BYTES, word aligned.
        let code = unsafe {
            core::slice::from_raw_parts(work.cpu_addr.as_ptr() as *const u32, BOOT_CODE_BYTES / 4)
        };

        let regs = self.regs();
        for i in (0..BOOT_CODE_WORDS as u32).step_by(4) {
            let pair = (i / 2) as usize;
            for (n, data) in [code[pair + 1], code[pair]].into_iter().enumerate() {
                let addr = i + 2 * n as u32;
                regs.write(BIT_CODE_DOWN, (addr << 16) | (data >> 16));
                regs.write(BIT_CODE_DOWN, ((addr + 1) << 16) | (data & 0xFFFF));
            }
        }
        Ok(())
    }

    /// Codec interrupt line.
    pub fn handle_ipi_irq(&self) {
        irq::handle_ipi_irq(self.regs(), &self.channel, &self.worker);
    }

    /// JPEG interrupt line.
    pub fn handle_jpu_irq(&self) {
        if !self.config.has_jpu {
            warn!("JPU interrupt on a part without JPU");
            return;
        }
        irq::handle_jpu_irq(self.regs(), &self.channel, &self.worker);
    }

    /// Resolves an mmap at page offset `pgoff`.
    pub fn mmap(&self, pgoff: usize, length: usize) -> DeviceMmap {
        if pgoff == 0 {
            if length > self.config.regs_size {
                warn!("VPU register mmap of {:#x} bytes too large", length);
                return DeviceMmap::None;
            }
            return DeviceMmap::Physical(
                PhysAddrRange::from_start_size(PhysAddr::from_usize(self.config.regs_phys), length),
                MmapFlags::IO | MmapFlags::UNCACHED | MmapFlags::NO_EXEC,
            );
        }

        let st = self.state.lock();
        if !st.vshare.is_null() && pgoff == st.vshare.addr.as_usize() / PAGE_SIZE_4K {
            if length > st.vshare.size {
                warn!("vshare mmap of {:#x} bytes too large", length);
                return DeviceMmap::None;
            }
            return DeviceMmap::Vmalloc {
                start: st.vshare.addr,
                size: length,
            };
        }

        let Some(start) = pgoff.checked_mul(PAGE_SIZE_4K) else {
            return DeviceMmap::None;
        };
        let phys = PhysAddr::from_usize(start);
        let known = self.registry.contains_phys(phys, length)
            || st.share.contains_phys(phys, length)
            || st.work.buf.contains_phys(phys, length);
        if !known {
            warn!("mmap of unknown physical range {:#x}+{:#x}", start, length);
            return DeviceMmap::None;
        }
        debug!("mmap phys {:#x} size {:#x}", start, length);
        DeviceMmap::Physical(
            PhysAddrRange::from_start_size(phys, length),
            MmapFlags::IO | MmapFlags::WRITE_COMBINE,
        )
    }

    /// Driver unload: stops the deferred task, returns IRAM, frees the
    /// driver's work buffer and leaves the codec reset and powered down.
    pub fn shutdown(&self) -> VpuResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.worker.stop();

        if let (Some(pool), Some(block)) = (&self.res.iram, self.iram_block.lock().take()) {
            if let Err(e) = pool.free(block) {
                error!("VPU IRAM release failed: {}", e);
            }
        }

        {
            let mut st = self.state.lock();
            if st.work.owned {
                free_dma_buffer(self.res.dma.as_ref(), &mut st.work.buf);
            }
            st.work = WorkBuffer::none();
        }

        self.res.power.acquire()?;
        let reset = {
            let _clk = ClockEnableGuard::new(self.clk());
            self.reset_domain()
        };
        self.res.power.release()?;
        info!("VPU shut down");
        reset
    }
}
