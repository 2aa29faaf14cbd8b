//! Register map of the VPU block and the SoC controllers around it.

use bitflags::bitflags;

// VPU (BIT processor) registers, byte offsets in the codec window.
pub const BIT_CODE_RUN: usize = 0x000;
pub const BIT_CODE_DOWN: usize = 0x004;
pub const BIT_INT_CLEAR: usize = 0x00C;
pub const BIT_INT_STATUS: usize = 0x010;
pub const BIT_CUR_PC: usize = 0x018;
pub const BIT_CODE_BUF_ADDR: usize = 0x100;
pub const BIT_RESET_CTRL: usize = 0x11C;
pub const BIT_BUSY_FLAG: usize = 0x160;
pub const BIT_INT_REASON: usize = 0x174;
pub const MBC_SET_SUBBLK_EN: usize = 0x4A0;
pub const GDI_BUS_CTRL: usize = 0x10F0;
pub const GDI_BUS_STATUS: usize = 0x10F4;
pub const MJPEG_PIC_STATUS_REG: usize = 0x3004;

/// Registers captured at suspend: `BIT_CODE_BUF_ADDR` onward.
pub const CONTEXT_REG_COUNT: usize = 64;
/// Boot code length in 16-bit words.
pub const BOOT_CODE_WORDS: usize = 2048;
/// Boot code length in bytes.
pub const BOOT_CODE_BYTES: usize = BOOT_CODE_WORDS * 2;

/// `BIT_INT_REASON` value for a finished picture.
pub const INT_REASON_CODEC_DONE: u32 = 0x8;
/// `MJPEG_PIC_STATUS_REG` bits marking a finished JPEG picture.
pub const MJPEG_DONE_MASK: u32 = 0x3;

/// Request written to `GDI_BUS_CTRL` to drain the bus before power-off.
pub const GDI_BUS_DRAIN_REQ: u32 = 0x11;
/// `GDI_BUS_STATUS` value once the bus is drained.
pub const GDI_BUS_DRAINED: u32 = 0x77;

/// Byte offset of context register `i`.
pub const fn context_reg(i: usize) -> usize {
    BIT_CODE_BUF_ADDR + i * 4
}

// GPC (general power controller).
pub const GPC_CNTR: usize = 0x000;
pub const GPC_PGC_GPU_PGCR: usize = 0x260;
/// `GPC_PGC_GPU_PGCR`: power the PU island down on the next request.
pub const GPC_PGC_PCR_ENABLE: u32 = 0x1;

bitflags! {
    /// `GPC_CNTR` request bits, cleared by hardware on completion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GpcCntr: u32 {
        const GPU_VPU_PDN_REQ = 1 << 0;
        const GPU_VPU_PUP_REQ = 1 << 1;
    }
}

// ANATOP (analog regulators).
pub const ANA_REG_CORE: usize = 0x140;
pub const ANA_MISC2: usize = 0x170;
/// VDDPU target field in `ANA_REG_CORE`.
pub const REG_CORE_REG1_OFFSET: u32 = 9;
/// VDDSOC target field in `ANA_REG_CORE`, source of the PU operating level.
pub const REG_CORE_REG2_OFFSET: u32 = 18;
pub const REG_CORE_TARGET_MASK: u32 = 0x1f;
/// Target value that bypasses the LDO.
pub const LDO_BYPASS_TARGET: u32 = 0x1f;
pub const MISC2_REG1_STEP_OFFSET: u32 = 26;
pub const MISC2_STEP_MASK: u32 = 0x3;

// SRC (system reset controller).
pub const SRC_SCR: usize = 0x000;
pub const SRC_SIMR: usize = 0x018;
pub const SRC_SCR_VPU_RST: u32 = 1 << 2;
pub const SRC_SIMR_MASK_VPU_RST: u32 = 1 << 1;
