pub mod error;
pub mod fat32;
pub mod partition;

use alloc::vec::Vec;

use error::{FsError, FsResult};

/// A mounted or mountable partition: `(disk slot, partition slot)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VolumeId {
    pub disk: u8,
    pub partition: u8,
}

impl VolumeId {
    pub const fn new(disk: u8, partition: u8) -> Self {
        VolumeId { disk, partition }
    }
}

/// Filesystem type codes reported to callers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    Fat12 = 0x01,
    Fat16 = 0x04,
    Fat32 = 0x0B,
    Iso9660 = 0x96,
}

impl FsType {
    /// Map a partition table type byte to the filesystem it carries.
    pub fn from_partition_type(kind: u8) -> Option<FsType> {
        match kind {
            0x01 => Some(FsType::Fat12),
            0x04 | 0x06 | 0x0E => Some(FsType::Fat16),
            0x0B | 0x0C => Some(FsType::Fat32),
            0x96 => Some(FsType::Iso9660),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Split an optional leading `"<disk>:<partition>"` token off `path`.
///
/// ```text
/// "0:1/DOCS/A.TXT"  -> (Some(0:1), "/DOCS/A.TXT")
/// "/DOCS/A.TXT"     -> (None, "/DOCS/A.TXT")
/// ```
pub fn split_volume(path: &str) -> FsResult<(Option<VolumeId>, &str)> {
    let trimmed = path.trim_start_matches('/');
    let (head, rest) = match trimmed.find('/') {
        Some(i) => (&trimmed[..i], &trimmed[i..]),
        None => (trimmed, ""),
    };

    let Some((disk, partition)) = head.split_once(':') else {
        return Ok((None, path));
    };
    let disk = disk.parse::<u8>().map_err(|_| FsError::InvalidPath)?;
    let partition = partition.parse::<u8>().map_err(|_| FsError::InvalidPath)?;
    Ok((Some(VolumeId::new(disk, partition)), rest))
}

/// Path segments after the optional volume token, empty components dropped.
/// A `:` anywhere else in the path is rejected.
pub fn segments(path: &str) -> FsResult<Vec<&str>> {
    let (_, rest) = split_volume(path)?;
    let mut parts = Vec::new();
    for part in rest.split('/').filter(|s| !s.is_empty()) {
        if part.contains(':') {
            return Err(FsError::InvalidPath);
        }
        parts.try_reserve(1).map_err(|_| FsError::OutOfMemory)?;
        parts.push(part);
    }
    Ok(parts)
}
