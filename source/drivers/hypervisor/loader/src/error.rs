// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Loader error type and its errno mapping on the control surface.

use nexus_hv_abi::errno;
use thiserror::Error;

use crate::cpu::CpuId;

/// Result alias for loader operations.
pub type Result<T> = core::result::Result<T, HvError>;

/// Errors produced by the loader.
///
/// Codes carried by `CpuOfflineFailed`, `BarrierFailed` and
/// `HypervisorRejected` are the negative errno values reported by the host
/// kernel or the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HvError {
    /// Malformed request or unknown operation.
    #[error("invalid argument")]
    ArgumentInvalid,
    /// Hypervisor already enabled, or the module is going away.
    #[error("hypervisor already enabled or loader busy")]
    ResourceBusy,
    /// Operation requires an enabled hypervisor.
    #[error("hypervisor not enabled")]
    NotEnabled,
    /// Waiting for the coordination lock was interrupted by a signal.
    #[error("interrupted")]
    Interrupted,
    /// The firmware store has no hypervisor image.
    #[error("hypervisor image unavailable")]
    ImageUnavailable,
    /// The image does not start with a valid hypervisor header.
    #[error("hypervisor image signature mismatch")]
    SignatureMismatch,
    /// Image, per-cpu area and configuration do not fit the reserved memory.
    #[error("hypervisor memory too small for image layout")]
    LayoutOverflow,
    /// Physical memory could not be mapped.
    #[error("failed to map physical memory")]
    MapFailed,
    /// A request structure could not be copied from the caller.
    #[error("fault while copying request from caller")]
    TransferFault,
    /// The system configuration could not be copied from the caller.
    #[error("fault while copying system configuration")]
    ConfigTransferFailed,
    /// The preload image could not be copied from the caller.
    #[error("fault while copying preload image")]
    PreloadCopyFailed,
    /// Cell RAM is missing, too small, or cannot hold the preload image.
    #[error("invalid cell memory")]
    InvalidCellMemory,
    /// A cpu requested by a cell could not be taken offline.
    #[error("failed to take cpu {cpu} offline ({code})")]
    CpuOfflineFailed {
        /// Cpu that refused to go offline.
        cpu: CpuId,
        /// Host kernel error code.
        code: i32,
    },
    /// At least one core failed the rendezvous transition.
    #[error("rendezvous failed ({code})")]
    BarrierFailed {
        /// First failure code in core-id order.
        code: i32,
    },
    /// The hypervisor refused to create the cell.
    #[error("hypervisor rejected request ({code})")]
    HypervisorRejected {
        /// Hypervisor error code.
        code: i32,
    },
    /// A kernel buffer could not be allocated.
    #[error("out of memory")]
    OutOfMemory,
    /// Operation is not implemented.
    #[error("operation not supported")]
    NotSupported,
}

impl HvError {
    /// Negative errno reported on the control surface.
    pub fn errno(&self) -> i64 {
        let code = match self {
            HvError::ArgumentInvalid
            | HvError::NotEnabled
            | HvError::SignatureMismatch
            | HvError::LayoutOverflow
            | HvError::InvalidCellMemory => -errno::EINVAL,
            HvError::ResourceBusy | HvError::MapFailed => -errno::EBUSY,
            HvError::Interrupted => -errno::EINTR,
            HvError::ImageUnavailable => -errno::ENOENT,
            HvError::TransferFault
            | HvError::ConfigTransferFailed
            | HvError::PreloadCopyFailed => -errno::EFAULT,
            HvError::OutOfMemory => -errno::ENOMEM,
            HvError::NotSupported => -errno::ENOSYS,
            HvError::CpuOfflineFailed { code, .. }
            | HvError::BarrierFailed { code }
            | HvError::HypervisorRejected { code } => passthrough(*code),
        };
        i64::from(code)
    }
}

// Foreign codes are expected to be negative errno values already; anything
// else is folded into EIO so callers never see a success-looking value.
fn passthrough(code: i32) -> i32 {
    if code < 0 {
        code
    } else {
        -errno::EIO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_errors_map_to_documented_errno() {
        assert_eq!(HvError::ArgumentInvalid.errno(), -22);
        assert_eq!(HvError::NotEnabled.errno(), -22);
        assert_eq!(HvError::ResourceBusy.errno(), -16);
        assert_eq!(HvError::Interrupted.errno(), -4);
        assert_eq!(HvError::ImageUnavailable.errno(), -2);
        assert_eq!(HvError::TransferFault.errno(), -14);
        assert_eq!(HvError::OutOfMemory.errno(), -12);
        assert_eq!(HvError::NotSupported.errno(), -38);
    }

    #[test]
    fn foreign_codes_pass_through() {
        assert_eq!(HvError::BarrierFailed { code: -19 }.errno(), -19);
        assert_eq!(HvError::HypervisorRejected { code: -1 }.errno(), -1);
        let offline = HvError::CpuOfflineFailed { cpu: CpuId::from_raw(2), code: -16 };
        assert_eq!(offline.errno(), -16);
        assert_eq!(offline.to_string(), "failed to take cpu 2 offline (-16)");
    }

    #[test]
    fn positive_foreign_codes_never_look_like_success() {
        assert_eq!(HvError::BarrierFailed { code: 3 }.errno(), -5);
        assert_eq!(HvError::HypervisorRejected { code: 0 }.errno(), -5);
    }
}
