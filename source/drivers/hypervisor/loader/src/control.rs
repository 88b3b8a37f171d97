// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Control device surface: decodes caller requests and dispatches them.

use log::debug;
use nexus_hv_abi::{op, NewCellRequest, PreloadImage, SystemConfigHeader};

use crate::error::{HvError, Result};
use crate::hal::CallerContext;
use crate::state::Status;
use crate::Loader;

/// Privileged operations exposed to the host.
pub trait ControlSurface {
    /// Runs operation `op` with argument `arg`. Returns 0 or a negative errno.
    fn ioctl(&self, caller: &dyn CallerContext, op: u32, arg: u64) -> i64;
    /// Last committed loader state.
    fn status(&self) -> Status;
}

impl ControlSurface for Loader {
    fn ioctl(&self, caller: &dyn CallerContext, op: u32, arg: u64) -> i64 {
        match self.dispatch(caller, op, arg) {
            Ok(()) => 0,
            Err(err) => {
                debug!("nexus-hv: op {op} failed: {err}");
                err.errno()
            }
        }
    }

    fn status(&self) -> Status {
        Loader::status(self)
    }
}

impl Loader {
    fn dispatch(&self, caller: &dyn CallerContext, code: u32, arg: u64) -> Result<()> {
        match code {
            op::ENABLE => {
                let header = SystemConfigHeader::read_from(&copy_in::<{ SystemConfigHeader::SIZE }>(caller, arg)?)
                    .map_err(|_| HvError::TransferFault)?;
                self.enable(caller, header, arg)
            }
            op::DISABLE => self.disable(caller),
            op::CELL_CREATE => {
                let request = NewCellRequest::read_from(&copy_in::<{ NewCellRequest::SIZE }>(caller, arg)?)
                    .map_err(|_| HvError::TransferFault)?;
                if request.num_preload_images != 1 {
                    return Err(HvError::ArgumentInvalid);
                }
                let images = arg.checked_add(NewCellRequest::SIZE as u64).ok_or(HvError::TransferFault)?;
                let image = PreloadImage::read_from(&copy_in::<{ PreloadImage::SIZE }>(caller, images)?)
                    .map_err(|_| HvError::TransferFault)?;
                self.create_cell(caller, &request, &image).map(|_| ())
            }
            op::CELL_DESTROY => Err(HvError::NotSupported),
            _ => Err(HvError::ArgumentInvalid),
        }
    }
}

fn copy_in<const N: usize>(caller: &dyn CallerContext, addr: u64) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    caller.copy_from_user(addr, &mut buf).map_err(|_| HvError::TransferFault)?;
    Ok(buf)
}
