//! Platform seams for the i.MX VPU driver.
//!
//! Drivers in `mxcvpu-api` never touch a clock framework, a DMA pool or an
//! ioremapped window directly. They receive the handles defined in [`hal`]
//! at probe time and expose themselves through the [`vfs::DeviceOps`]
//! surface.

pub mod hal;
#[cfg(feature = "mock")]
pub mod mock;
pub mod vfs;
