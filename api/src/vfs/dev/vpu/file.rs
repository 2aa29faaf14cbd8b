//! Open VPU file
//!
//! Unmarshals command payloads and forwards them to the shared
//! [`VpuDevice`]. Dropping the file closes the session.

use core::any::Any;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axerrno::AxResult;
use zerocopy::{FromBytes, IntoBytes};

use super::device::VpuDevice;
use super::error::{VpuError, VpuResult};
use super::irq::AsyncNotifier;
use super::types::{VpuIoctl, VpuMemDesc};
use crate::vfs::{DeviceMmap, DeviceOps};

fn read_desc(arg: &[u8]) -> VpuResult<VpuMemDesc> {
    VpuMemDesc::read_from_bytes(arg).map_err(|_| VpuError::Marshaling)
}

fn write_desc(desc: &VpuMemDesc, arg: &mut [u8]) -> VpuResult<()> {
    desc.write_to(arg).map_err(|_| VpuError::Marshaling)
}

fn read_u32(arg: &[u8]) -> VpuResult<u32> {
    <[u8; 4]>::try_from(arg)
        .map(u32::from_le_bytes)
        .map_err(|_| VpuError::Marshaling)
}

/// A session on the VPU.
pub struct VpuFile {
    dev: Arc<VpuDevice>,
    id: u64,
    /// Raised to interrupt a blocked `WAIT4INT`.
    signal: AtomicBool,
    released: AtomicBool,
}

impl VpuFile {
    pub(super) fn new(dev: Arc<VpuDevice>, id: u64) -> Self {
        Self {
            dev,
            id,
            signal: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> &Arc<VpuDevice> {
        &self.dev
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Delivers a signal: a blocked or the next `WAIT4INT` returns
    /// [`VpuError::Interrupted`].
    pub fn interrupt(&self) {
        self.signal.store(true, Ordering::SeqCst);
        self.dev.channel().kick();
    }

    /// Registers (or with `None` removes) the completion callback.
    ///
    /// The callback runs on the deferred-task thread, which the last close
    /// waits for while holding the session lock. It must not block or call
    /// back into the device.
    pub fn set_async_notify(&self, notifier: Option<AsyncNotifier>) {
        match notifier {
            Some(n) => self.dev.channel().subscribe(self.id, n),
            None => self.dev.channel().unsubscribe(self.id),
        }
    }

    pub fn wait_interrupt(&self, timeout_ms: u64) -> VpuResult<()> {
        self.dev.wait_interrupt(timeout_ms, &self.signal)
    }

    /// Closes the session and reports how the release went.
    pub fn close(self) -> VpuResult<()> {
        self.release_once()
    }

    fn release_once(&self) -> VpuResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.dev.channel().unsubscribe(self.id);
        self.dev.release()
    }

    /// Runs one command. `arg` holds the request and receives the reply.
    pub fn dispatch(&self, cmd: u32, arg: &mut [u8]) -> VpuResult<usize> {
        let Ok(op) = VpuIoctl::try_from(cmd) else {
            error!("No such IOCTL, cmd is {:#x}", cmd);
            return Err(VpuError::InvalidHandle(cmd));
        };
        debug!("VPU ioctl {:?}", op);

        match op {
            VpuIoctl::PhymemAlloc => {
                let mut desc = read_desc(arg)?;
                self.dev.alloc_phys(&mut desc)?;
                write_desc(&desc, arg)?;
            }
            VpuIoctl::PhymemFree => {
                let desc = read_desc(arg)?;
                self.dev.free_phys(desc.cpu_addr);
            }
            VpuIoctl::Wait4Int => {
                let timeout = read_u32(arg)?;
                self.wait_interrupt(timeout as u64)?;
            }
            VpuIoctl::IramSetting => {
                self.dev
                    .iram_setting()
                    .write_to(arg)
                    .map_err(|_| VpuError::Marshaling)?;
            }
            VpuIoctl::ClkgateSetting => {
                let enable = read_u32(arg)?;
                self.dev.set_clock_gate(enable != 0);
            }
            VpuIoctl::GetShareMem => {
                let mut desc = read_desc(arg)?;
                self.dev.get_share_mem(&mut desc)?;
                write_desc(&desc, arg)?;
            }
            VpuIoctl::ReqVshareMem => {
                let mut desc = read_desc(arg)?;
                self.dev.req_vshare_mem(&mut desc)?;
                write_desc(&desc, arg)?;
            }
            VpuIoctl::GetWorkAddr => {
                let mut desc = read_desc(arg)?;
                self.dev.get_work_addr(&mut desc)?;
                write_desc(&desc, arg)?;
            }
            VpuIoctl::QueryBitworkMem => {
                write_desc(&self.dev.query_work_mem(), arg)?;
            }
            VpuIoctl::SetBitworkMem => {
                let desc = read_desc(arg)?;
                self.dev.set_work_mem(&desc)?;
            }
            VpuIoctl::SysSwReset => self.dev.sys_sw_reset()?,
            VpuIoctl::PhymemCheck => {
                let mut desc = read_desc(arg)?;
                self.dev.check_phys(&mut desc);
                write_desc(&desc, arg)?;
            }
            VpuIoctl::LockDev => {
                let lock = read_u32(arg)?;
                self.dev.lock_session(lock != 0);
            }
            VpuIoctl::RegDump | VpuIoctl::PhymemDump => {}
        }
        Ok(0)
    }
}

impl Drop for VpuFile {
    fn drop(&mut self) {
        if let Err(e) = self.release_once() {
            error!("VPU release failed: {}", e);
        }
    }
}

impl DeviceOps for VpuFile {
    fn ioctl(&self, cmd: u32, arg: &mut [u8]) -> AxResult<usize> {
        self.dispatch(cmd, arg).map_err(|e| {
            if !e.is_retryable() {
                warn!("VPU ioctl {:#x} failed: {}", cmd, e);
            }
            e.into()
        })
    }

    fn mmap(&self, offset: usize, length: usize) -> DeviceMmap {
        self.dev.mmap(offset, length)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_payloads_must_be_exact() {
        assert_eq!(read_u32(&1u32.to_le_bytes()), Ok(1));
        assert_eq!(read_u32(&[1, 0, 0]), Err(VpuError::Marshaling));
        assert_eq!(read_u32(&[0; 8]), Err(VpuError::Marshaling));
    }

    #[test]
    fn descriptor_payloads_must_be_exact() {
        let mut buf = [0u8; 32];
        let desc = VpuMemDesc {
            size: 3,
            ..Default::default()
        };
        write_desc(&desc, &mut buf).unwrap();
        assert_eq!(read_desc(&buf), Ok(desc));
        assert_eq!(read_desc(&buf[..31]), Err(VpuError::Marshaling));
        assert_eq!(write_desc(&desc, &mut [0u8; 40]), Err(VpuError::Marshaling));
    }
}
