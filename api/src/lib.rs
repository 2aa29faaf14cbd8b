//! Drivers for the i.MX video processing unit.
//!
//! The VPU driver lives under [`vfs::dev::vpu`]; the on-chip IRAM pool it
//! borrows working memory from lives under [`vfs::dev::iram`].

#[macro_use]
extern crate log;

pub mod vfs;
