//! Block-driver commands.
//!
//! ```text
//! INIT            (pciDeviceId)
//! READ            (drive, lba, count, buf)
//! WRITE           (drive, lba, count, buf)
//! REPORTDRIVES    (out *[u8; 4])
//! GET_MAX_ADDRESS (drive)            -> p2
//! ```

use core::slice;

use super::{narrow, CommandPacket, ErrorCode};
use crate::drivers::ata::MAX_DRIVES;
use crate::storage::StorageStack;

pub const INIT: u64 = 0;
pub const READ: u64 = 1;
pub const WRITE: u64 = 2;
pub const REPORTDRIVES: u64 = 3;
pub const GET_MAX_ADDRESS: u64 = 4;

/// Execute one block packet against `stack`, filling in results and the error word.
///
/// # Safety
/// READ/WRITE buffers must be valid for `count * sector_size` bytes and
/// REPORTDRIVES must point at four writable bytes.
pub unsafe fn dispatch(stack: &mut StorageStack, packet: &mut CommandPacket) {
    let result = run(stack, packet);
    if let Err(code) = result {
        log::debug!("block: command {} failed: {:?}", packet.command, code);
    }
    packet.finish(result);
}

unsafe fn run(stack: &mut StorageStack, packet: &mut CommandPacket) -> Result<(), ErrorCode> {
    let [p1, p2, p3, p4] = packet.params;
    match packet.command {
        INIT => init(stack, p1),
        READ | WRITE => {
            let drive: u8 = narrow(p1, ErrorCode::UnsupportedDrive)?;
            let lba: u32 = narrow(p2, ErrorCode::OutOfRange)?;
            let count: u32 = narrow(p3, ErrorCode::InvalidArgument)?;
            if p4 == 0 {
                return Err(ErrorCode::InvalidArgument);
            }
            let dev = stack.disks.device_mut(drive)?;
            let len = (count as usize)
                .checked_mul(dev.sector_size())
                .ok_or(ErrorCode::InvalidArgument)?;

            if packet.command == READ {
                let buf = slice::from_raw_parts_mut(p4 as *mut u8, len);
                dev.read_sectors(lba, count, buf)?;
            } else {
                let buf = slice::from_raw_parts(p4 as *const u8, len);
                dev.write_sectors(lba, count, buf)?;
            }
            Ok(())
        }
        REPORTDRIVES => {
            if p1 == 0 {
                return Err(ErrorCode::InvalidArgument);
            }
            let out = slice::from_raw_parts_mut(p1 as *mut u8, MAX_DRIVES);
            for (slot, kind) in out.iter_mut().zip(stack.report_drives()) {
                *slot = kind as u8;
            }
            Ok(())
        }
        GET_MAX_ADDRESS => {
            let drive: u8 = narrow(p1, ErrorCode::UnsupportedDrive)?;
            packet.params[1] = stack.disks.max_address(drive)? as u64;
            Ok(())
        }
        _ => {
            log::warn!("block: unknown command {}", packet.command);
            Err(ErrorCode::Unsupported)
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn init(stack: &mut StorageStack, pci_device: u64) -> Result<(), ErrorCode> {
    log::info!("block: init for PCI device {:#x}", pci_device);
    stack.probe_legacy_ide();
    Ok(())
}

#[cfg(not(target_arch = "x86_64"))]
fn init(_stack: &mut StorageStack, _pci_device: u64) -> Result<(), ErrorCode> {
    Err(ErrorCode::Unsupported)
}
