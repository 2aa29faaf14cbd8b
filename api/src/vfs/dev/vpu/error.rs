//! VPU driver errors

use core::fmt;

use axerrno::AxError;

use crate::vfs::dev::iram::IramError;

/// VPU operation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpuError {
    /// Allocation failed
    ResourceExhausted,
    /// A poll bound or wait timeout expired
    Timeout,
    /// Wait interrupted by a signal
    Interrupted,
    /// Unknown command code
    InvalidHandle(u32),
    /// Codec would not go idle for power-off
    HardwareBusy,
    /// Malformed request payload
    Marshaling,
    /// Well-formed request naming something the driver does not own
    InvalidArgument,
}

impl VpuError {
    /// Linux errno surfaced to user space.
    pub fn as_errno(&self) -> i32 {
        match self {
            VpuError::ResourceExhausted => -12, // ENOMEM
            VpuError::Timeout => -62,           // ETIME
            VpuError::Interrupted => -4,        // EINTR
            VpuError::InvalidHandle(_) => -22,  // EINVAL
            VpuError::HardwareBusy => -14,      // EFAULT
            VpuError::Marshaling => -14,
            VpuError::InvalidArgument => -22,
        }
    }

    /// Whether the caller may simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VpuError::Timeout | VpuError::Interrupted)
    }
}

impl fmt::Display for VpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted => write!(f, "Out of memory"),
            Self::Timeout => write!(f, "Timed out"),
            Self::Interrupted => write!(f, "Interrupted"),
            Self::InvalidHandle(cmd) => write!(f, "Unknown command {:#x}", cmd),
            Self::HardwareBusy => write!(f, "Codec still busy"),
            Self::Marshaling => write!(f, "Malformed request"),
            Self::InvalidArgument => write!(f, "Invalid argument"),
        }
    }
}

impl From<VpuError> for AxError {
    fn from(err: VpuError) -> Self {
        match err {
            VpuError::ResourceExhausted => AxError::NoMemory,
            VpuError::Timeout => AxError::TimedOut,
            VpuError::Interrupted => AxError::Interrupted,
            VpuError::InvalidHandle(_) | VpuError::InvalidArgument => AxError::InvalidInput,
            VpuError::HardwareBusy => AxError::ResourceBusy,
            VpuError::Marshaling => AxError::BadAddress,
        }
    }
}

impl From<IramError> for VpuError {
    fn from(err: IramError) -> Self {
        match err {
            IramError::Exhausted => VpuError::ResourceExhausted,
            IramError::InvalidRange | IramError::DoubleFree => VpuError::InvalidArgument,
        }
    }
}

pub type VpuResult<T> = Result<T, VpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(VpuError::ResourceExhausted.as_errno(), -12);
        assert_eq!(VpuError::Timeout.as_errno(), -62);
        assert_eq!(VpuError::Interrupted.as_errno(), -4);
        assert_eq!(VpuError::InvalidHandle(0x5699).as_errno(), -22);
        assert_eq!(VpuError::HardwareBusy.as_errno(), -14);
    }

    #[test]
    fn only_waits_are_retryable() {
        assert!(VpuError::Timeout.is_retryable());
        assert!(VpuError::Interrupted.is_retryable());
        assert!(!VpuError::HardwareBusy.is_retryable());
        assert!(!VpuError::ResourceExhausted.is_retryable());
    }

    #[test]
    fn converts_to_ax_error() {
        assert_eq!(AxError::from(VpuError::Timeout), AxError::TimedOut);
        assert_eq!(AxError::from(VpuError::Marshaling), AxError::BadAddress);
        assert_eq!(VpuError::from(IramError::Exhausted), VpuError::ResourceExhausted);
    }
}
