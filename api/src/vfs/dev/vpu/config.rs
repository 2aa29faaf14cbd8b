//! SoC variants and driver tunables.

use core::time::Duration;

/// Supported SoCs. Power plumbing and a few hardware quirks differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocKind {
    Imx51,
    Imx53,
    Imx6Q,
    Imx6DL,
}

impl SocKind {
    pub const fn is_imx6(self) -> bool {
        matches!(self, Self::Imx6Q | Self::Imx6DL)
    }

    /// Board-level idle power gate toggled while no session is open.
    pub const fn has_power_gate(self) -> bool {
        matches!(self, Self::Imx51)
    }

    /// Register context is neither saved nor replayed across suspend.
    pub const fn skips_context_save(self) -> bool {
        matches!(self, Self::Imx53)
    }

    /// Last close gives up immediately while the codec is busy, with no
    /// bus handshake fallback.
    pub const fn fatal_on_busy_release(self) -> bool {
        matches!(self, Self::Imx51 | Self::Imx53)
    }

    /// `MBC_SET_SUBBLK_EN` must be cleared before the boot code reload.
    pub const fn needs_mbc_clear(self) -> bool {
        self.is_imx6()
    }
}

/// Driver configuration, fixed at probe.
#[derive(Debug, Clone)]
pub struct VpuConfig {
    pub soc: SocKind,
    /// IRAM bytes requested at probe; 0 disables IRAM.
    pub iram_size: usize,
    /// JPEG unit present with its own interrupt line.
    pub has_jpu: bool,
    /// Bound for busy-flag polls at close/suspend/resume.
    pub busy_timeout: Duration,
    /// Sleep between busy-flag polls.
    pub poll_interval: Duration,
    /// Iterations before a power-acknowledge or reset spin gives up.
    pub power_ack_spin_limit: usize,
    /// Highest valid DRAM physical address, if known.
    pub dram_top: Option<u64>,
    /// Register window length exposed through mmap offset 0.
    pub regs_phys: usize,
    pub regs_size: usize,
}

impl VpuConfig {
    pub fn for_soc(soc: SocKind) -> Self {
        let (iram_size, regs_phys) = match soc {
            SocKind::Imx6Q | SocKind::Imx6DL => (0x21000, 0x0204_0000),
            SocKind::Imx53 => (0, 0x63FF_4000),
            SocKind::Imx51 => (0, 0x83FF_4000),
        };
        Self {
            soc,
            iram_size,
            has_jpu: soc.is_imx6(),
            busy_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(1),
            power_ack_spin_limit: 1_000_000,
            dram_top: None,
            regs_phys,
            regs_size: 0x4000,
        }
    }
}

impl Default for VpuConfig {
    fn default() -> Self {
        Self::for_soc(SocKind::Imx6Q)
    }
}
