//! i.MX VPU driver
//!
//! Arbitrates the video codec between user processes: DMA buffers handed
//! to user space, the PU power island and codec clock, the completion
//! interrupt, and register context across system suspend.
//!
//! ## Commands
//!
//! - `PHYMEM_ALLOC` / `PHYMEM_FREE`: coherent buffers, reclaimed at last close
//! - `WAIT4INT`: block until the codec signals completion
//! - `GET_SHARE_MEM` / `REQ_VSHARE_MEM`: buffers shared by all sessions
//! - `GET_WORK_ADDR`, `QUERY_BITWORK_MEM`, `SET_BITWORK_MEM`: codec work buffer
//! - `LOCK_DEV`: hold the session lock across several commands
//!
//! mmap offset 0 maps the registers; the vshare page offset maps the
//! virtual shared buffer; any other offset maps a buffer by physical page.

mod buffer;
mod config;
mod device;
mod error;
mod file;
mod irq;
mod lock;
mod platform;
pub mod regs;
mod types;

pub use buffer::{BufferRegistry, PhysicalBuffer};
pub use config::{SocKind, VpuConfig};
pub use device::{VirtualBuffer, VpuDevice, VpuResources};
pub use error::{VpuError, VpuResult};
pub use file::VpuFile;
pub use irq::{AsyncNotifier, CompletionChannel, IrqWorker};
pub use lock::{SessionGuard, SessionLock};
pub use platform::{ClockEnableGuard, PowerState, PowerSupply, PuPowerDomain, SrcReset, ldo_ramp_delay_us};
pub use types::{IramSetting, SavedContext, VPU_IOC_MAGIC, VpuIoctl, VpuMemDesc};
