//! VPU command codes and wire structures

use num_enum::TryFromPrimitive;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::regs::CONTEXT_REG_COUNT;

/// Command magic, `'V'`.
pub const VPU_IOC_MAGIC: u32 = b'V' as u32;

/// VPU control commands, `_IO('V', nr)`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum VpuIoctl {
    PhymemAlloc = 0x5600,
    PhymemFree = 0x5601,
    Wait4Int = 0x5602,
    PhymemDump = 0x5603,
    RegDump = 0x5604,
    IramSetting = 0x5606,
    ClkgateSetting = 0x5607,
    GetWorkAddr = 0x5608,
    ReqVshareMem = 0x5609,
    SysSwReset = 0x560B,
    GetShareMem = 0x560C,
    QueryBitworkMem = 0x560D,
    SetBitworkMem = 0x560E,
    PhymemCheck = 0x560F,
    LockDev = 0x5610,
}

/// Memory descriptor exchanged with user space.
///
/// `cpu_addr` is the driver-side handle; `virt_uaddr` is left for the
/// caller's own mapping.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct VpuMemDesc {
    pub size: u64,
    pub phy_addr: u64,
    pub cpu_addr: u64,
    pub virt_uaddr: u64,
}

/// IRAM region reported to user space, inclusive bounds.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IramSetting {
    pub start: u32,
    pub end: u32,
}

/// Register bank and program counter captured at suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedContext {
    pub regs: [u32; CONTEXT_REG_COUNT],
    pub pc: u32,
}
