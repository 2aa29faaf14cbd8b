//! Device nodes.

pub mod dev;

pub use mxcvpu_core::vfs::{DeviceMmap, DeviceOps, MmapFlags};
