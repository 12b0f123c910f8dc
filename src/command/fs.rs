//! Filesystem commands. Paths are NUL-terminated and may start with a
//! `"<disk>:<partition>"` token; without one the first mounted volume is used.
//!
//! ```text
//! INIT          (disk, partition)
//! READ          (path)                       -> p2 = buf, p3 = size
//! WRITE         (path, buf, size, attrib)
//! RENAME        (path, newName)
//! DELETE        (path)
//! MKDIR         (path)
//! GET_FILE_INFO (path, out *FileInfoRecord)
//! GET_FS        (disk, partition)            -> p3 = type code
//! FORMAT        (disk, partition, sectorsPerCluster)
//! LIST_DIR      (path)                       -> p2 = records, p3 = count
//! ```

use alloc::vec::Vec;
use core::slice;

use super::{c_str, leak_buffer, narrow, CommandPacket, ErrorCode};
use crate::fs::fat32::file::FileInfo;
use crate::fs::fat32::format::FormatOptions;
use crate::fs::fat32::layout::Attributes;
use crate::fs::{FsType, VolumeId};
use crate::storage::StorageStack;

pub const INIT: u64 = 0;
pub const READ: u64 = 1;
pub const WRITE: u64 = 2;
pub const RENAME: u64 = 3;
pub const DELETE: u64 = 4;
pub const MKDIR: u64 = 5;
pub const GET_FILE_INFO: u64 = 6;
pub const GET_FS: u64 = 7;
pub const FORMAT: u64 = 8;
pub const LIST_DIR: u64 = 9;

/// Fixed-layout entry description handed across the packet boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileInfoRecord {
    /// `NAME.EXT`, NUL-terminated.
    pub name: [u8; 13],
    pub attrib: u8,
    pub size: u32,
    pub first_cluster: u32,
    pub fs_type: u8,
}

impl FileInfoRecord {
    fn new(info: &FileInfo, fs_type: FsType) -> Self {
        let mut name = [0u8; 13];
        let bytes = info.name.as_bytes();
        let len = bytes.len().min(name.len() - 1);
        name[..len].copy_from_slice(&bytes[..len]);
        FileInfoRecord {
            name,
            attrib: info.attrib.bits(),
            size: info.size,
            first_cluster: info.first_cluster,
            fs_type: fs_type.code(),
        }
    }

    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

fn volume_id(disk: u64, partition: u64) -> Result<VolumeId, ErrorCode> {
    Ok(VolumeId::new(
        narrow(disk, ErrorCode::UnsupportedDrive)?,
        narrow(partition, ErrorCode::OutOfRange)?,
    ))
}

/// Execute one filesystem packet against `stack`.
///
/// # Safety
/// Path arguments must be NUL-terminated strings, WRITE's buffer must hold
/// `size` bytes and GET_FILE_INFO's output must point at a writable record.
pub unsafe fn dispatch(stack: &mut StorageStack, packet: &mut CommandPacket) {
    let result = run(stack, packet);
    if let Err(code) = result {
        log::debug!("fs: command {} failed: {:?}", packet.command, code);
    }
    packet.finish(result);
}

unsafe fn run(stack: &mut StorageStack, packet: &mut CommandPacket) -> Result<(), ErrorCode> {
    let [p1, p2, p3, p4] = packet.params;
    match packet.command {
        INIT => Ok(stack.mount(volume_id(p1, p2)?)?),
        READ => {
            let data = stack.read(c_str(p1)?)?;
            let (ptr, len) = leak_buffer(data);
            packet.params[1] = ptr;
            packet.params[2] = len;
            Ok(())
        }
        WRITE => {
            let path = c_str(p1)?;
            let size: usize = narrow(p3, ErrorCode::InvalidArgument)?;
            let data = match (p2, size) {
                (_, 0) => &[][..],
                (0, _) => return Err(ErrorCode::InvalidArgument),
                (ptr, len) => slice::from_raw_parts(ptr as *const u8, len),
            };
            let attrib = Attributes::from_bits_truncate(p4 as u8);
            Ok(stack.write(path, data, attrib)?)
        }
        RENAME => Ok(stack.rename(c_str(p1)?, c_str(p2)?)?),
        DELETE => Ok(stack.delete(c_str(p1)?)?),
        MKDIR => Ok(stack.mkdir(c_str(p1)?)?),
        GET_FILE_INFO => {
            let path = c_str(p1)?;
            if p2 == 0 {
                return Err(ErrorCode::InvalidArgument);
            }
            let (info, fs_type) = stack.stat(path)?;
            (p2 as *mut FileInfoRecord).write(FileInfoRecord::new(&info, fs_type));
            Ok(())
        }
        GET_FS => {
            packet.params[2] = stack.fs_type(volume_id(p1, p2)?)?.code() as u64;
            Ok(())
        }
        FORMAT => {
            let id = volume_id(p1, p2)?;
            let sectors_per_cluster: u8 = narrow(p3, ErrorCode::InvalidArgument)?;
            let options = FormatOptions { sectors_per_cluster, ..FormatOptions::default() };
            Ok(stack.format(id, &options)?)
        }
        LIST_DIR => {
            let path = c_str(p1)?;
            let (id, _) = stack.resolve_volume(path)?;
            let fs_type = stack.fat.volume(id)?.fs_type;
            let entries = stack.list_dir(path)?;

            let mut records = Vec::new();
            records.try_reserve_exact(entries.len()).map_err(|_| ErrorCode::OutOfMemory)?;
            records.extend(entries.iter().map(|info| FileInfoRecord::new(info, fs_type)));
            let (ptr, count) = leak_buffer(records);
            packet.params[1] = ptr;
            packet.params[2] = count;
            Ok(())
        }
        _ => {
            log::warn!("fs: unknown command {}", packet.command);
            Err(ErrorCode::Unsupported)
        }
    }
}
