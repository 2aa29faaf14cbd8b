//! Device drivers.

pub mod iram;
pub mod vpu;
