//! VPU platform operations
//!
//! Power island sequencing through the GPC and ANATOP blocks, the SRC
//! domain reset, and the codec clock helpers the session code uses.

use std::sync::Arc;
use std::vec::Vec;

use kspin::SpinNoIrq;
use mxcvpu_core::hal::{ClockGate, Regulator, RegisterIo, Timer};
use spin::Mutex;

use super::error::{VpuError, VpuResult};
use super::regs::*;

/// LDO ramp: cycles per voltage step.
pub const LDO_RAMP_UP_UNIT_IN_CYCLES: u32 = 64;
/// LDO ramp time base (24 MHz oscillator).
pub const LDO_RAMP_UP_FREQ_IN_MHZ: u32 = 24;
/// Settle time when the LDO is bypassed and the real ramp is unknown.
pub const LDO_BYPASS_DELAY_US: u32 = 70;

/// Settle delay after raising VDDPU to `target` with ramp rate `step`.
pub const fn ldo_ramp_delay_us(target: u32, step: u32) -> u32 {
    if target == LDO_BYPASS_TARGET {
        LDO_BYPASS_DELAY_US
    } else {
        target * ((LDO_RAMP_UP_UNIT_IN_CYCLES << step) / LDO_RAMP_UP_FREQ_IN_MHZ + 1)
    }
}

/// Spins until `bits` read back clear at `offset`, at most `limit` reads.
fn spin_until_clear(regs: &dyn RegisterIo, offset: usize, bits: u32, limit: usize) -> bool {
    for _ in 0..limit {
        if regs.read(offset) & bits == 0 {
            return true;
        }
        core::hint::spin_loop();
    }
    regs.read(offset) & bits == 0
}

/// PU power island state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    PoweredDown,
    PoweringUp,
    PoweredUp,
    PoweringDown,
}

struct PuState {
    count: usize,
    state: PowerState,
}

/// The PU power island shared by the VPU and the GPUs.
///
/// Holders are counted: only the first `power_up` and the matching last
/// `power_down` touch hardware.
pub struct PuPowerDomain {
    gpc: Arc<dyn RegisterIo>,
    anatop: Arc<dyn RegisterIo>,
    /// Clocks the island needs running while it switches on.
    clocks: Vec<Arc<dyn ClockGate>>,
    timer: Arc<dyn Timer>,
    spin_limit: usize,
    inner: Mutex<PuState>,
}

impl PuPowerDomain {
    pub fn new(
        gpc: Arc<dyn RegisterIo>,
        anatop: Arc<dyn RegisterIo>,
        clocks: Vec<Arc<dyn ClockGate>>,
        timer: Arc<dyn Timer>,
        spin_limit: usize,
    ) -> Self {
        Self {
            gpc,
            anatop,
            clocks,
            timer,
            spin_limit,
            inner: Mutex::new(PuState {
                count: 0,
                state: PowerState::PoweredDown,
            }),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    pub fn state(&self) -> PowerState {
        self.inner.lock().state
    }

    /// Makes VDDPU track VDDSOC, or switches it off.
    fn set_pu_supply(&self, enable: bool) {
        let mut val = self.anatop.read(ANA_REG_CORE);
        val &= !(REG_CORE_TARGET_MASK << REG_CORE_REG1_OFFSET);
        if !enable {
            self.anatop.write(ANA_REG_CORE, val);
            return;
        }

        let vddsoc = val & (REG_CORE_TARGET_MASK << REG_CORE_REG2_OFFSET);
        val |= vddsoc >> (REG_CORE_REG2_OFFSET - REG_CORE_REG1_OFFSET);
        self.anatop.write(ANA_REG_CORE, val);

        let step = (self.anatop.read(ANA_MISC2) >> MISC2_REG1_STEP_OFFSET) & MISC2_STEP_MASK;
        let target = (vddsoc >> REG_CORE_REG2_OFFSET) & REG_CORE_TARGET_MASK;
        let delay = ldo_ramp_delay_us(target, step);
        debug!("VDDPU on, target {:#x}, step {}, settle {}us", target, step, delay);
        self.timer.udelay(delay as u64);
    }

    fn set_island_clocks(&self, enable: bool) {
        for clk in &self.clocks {
            if enable {
                clk.prepare_enable();
            } else {
                clk.disable_unprepare();
            }
        }
    }

    /// Takes a reference on the island, powering it on if it was off.
    pub fn power_up(&self) -> VpuResult<()> {
        let mut pu = self.inner.lock();
        if pu.count > 0 {
            pu.count += 1;
            return Ok(());
        }

        pu.state = PowerState::PoweringUp;
        self.set_pu_supply(true);
        self.set_island_clocks(true);
        self.gpc.set_bits(GPC_PGC_GPU_PGCR, GPC_PGC_PCR_ENABLE);
        self.gpc.set_bits(GPC_CNTR, GpcCntr::GPU_VPU_PUP_REQ.bits());
        let acked = spin_until_clear(
            self.gpc.as_ref(),
            GPC_CNTR,
            GpcCntr::GPU_VPU_PUP_REQ.bits(),
            self.spin_limit,
        );
        self.set_island_clocks(false);

        if !acked {
            error!("PU power-up request not acknowledged");
            self.set_pu_supply(false);
            pu.state = PowerState::PoweredDown;
            return Err(VpuError::Timeout);
        }
        pu.count = 1;
        pu.state = PowerState::PoweredUp;
        info!("PU island powered up");
        Ok(())
    }

    /// Drops a reference, powering the island off when it was the last.
    pub fn power_down(&self) -> VpuResult<()> {
        let mut pu = self.inner.lock();
        match pu.count {
            0 => {
                warn!("PU power-down without matching power-up");
                Ok(())
            }
            1 => {
                pu.state = PowerState::PoweringDown;
                self.gpc.set_bits(GPC_PGC_GPU_PGCR, GPC_PGC_PCR_ENABLE);
                self.gpc.set_bits(GPC_CNTR, GpcCntr::GPU_VPU_PDN_REQ.bits());
                let acked = spin_until_clear(
                    self.gpc.as_ref(),
                    GPC_CNTR,
                    GpcCntr::GPU_VPU_PDN_REQ.bits(),
                    self.spin_limit,
                );
                if !acked {
                    error!("PU power-down request not acknowledged");
                    pu.state = PowerState::PoweredUp;
                    return Err(VpuError::Timeout);
                }
                self.set_pu_supply(false);
                pu.count = 0;
                pu.state = PowerState::PoweredDown;
                info!("PU island powered down");
                Ok(())
            }
            _ => {
                pu.count -= 1;
                Ok(())
            }
        }
    }
}

/// VPU domain reset through the system reset controller.
pub struct SrcReset {
    regs: Arc<dyn RegisterIo>,
    /// `SRC_SCR` also carries unrelated reset bits.
    scr_lock: SpinNoIrq<()>,
    spin_limit: usize,
}

impl SrcReset {
    pub fn new(regs: Arc<dyn RegisterIo>, spin_limit: usize) -> Self {
        Self {
            regs,
            scr_lock: SpinNoIrq::new(()),
            spin_limit,
        }
    }

    /// Pulses the VPU reset and waits for the controller to release it.
    pub fn reset_vpu(&self) -> VpuResult<()> {
        self.regs.set_bits(SRC_SIMR, SRC_SIMR_MASK_VPU_RST);
        {
            let _guard = self.scr_lock.lock();
            self.regs.set_bits(SRC_SCR, SRC_SCR_VPU_RST);
        }
        if !spin_until_clear(self.regs.as_ref(), SRC_SCR, SRC_SCR_VPU_RST, self.spin_limit) {
            error!("VPU reset did not complete");
            return Err(VpuError::Timeout);
        }
        debug!("VPU domain reset done");
        Ok(())
    }
}

/// How the VPU gets its power.
pub enum PowerSupply {
    /// i.MX6: the shared PU island.
    Island(Arc<PuPowerDomain>),
    /// Older parts: a dedicated regulator.
    Regulator(Arc<dyn Regulator>),
    /// Nothing to switch.
    AlwaysOn,
}

impl PowerSupply {
    pub fn acquire(&self) -> VpuResult<()> {
        match self {
            Self::Island(pu) => pu.power_up(),
            Self::Regulator(reg) => {
                reg.enable();
                Ok(())
            }
            Self::AlwaysOn => Ok(()),
        }
    }

    pub fn release(&self) -> VpuResult<()> {
        match self {
            Self::Island(pu) => pu.power_down(),
            Self::Regulator(reg) => {
                reg.disable();
                Ok(())
            }
            Self::AlwaysOn => Ok(()),
        }
    }
}

/// Keeps a clock enabled for the guard's lifetime.
pub struct ClockEnableGuard<'a> {
    clk: &'a dyn ClockGate,
}

impl<'a> ClockEnableGuard<'a> {
    pub fn new(clk: &'a dyn ClockGate) -> Self {
        clk.prepare_enable();
        Self { clk }
    }
}

impl Drop for ClockEnableGuard<'_> {
    fn drop(&mut self) {
        self.clk.disable_unprepare();
    }
}
