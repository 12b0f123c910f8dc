//! On-disk FAT32 structures: boot sector / extended BPB and 32-byte
//! directory entries, as explicit encode/decode over byte slices.

use alloc::string::String;
use bitflags::bitflags;

use crate::fs::error::{FsError, FsResult};

// ══════════════════════════════════════════════════════════════
//  Constants
// ══════════════════════════════════════════════════════════════

pub const SECTOR_SIZE: usize = 512;
pub const DIR_ENTRY_SIZE: usize = 32;
pub const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;

pub type Cluster = u32;

pub const CLUSTER_FREE: Cluster = 0;
pub const CLUSTER_MASK: u32 = 0x0FFF_FFFF;
/// First value that ends a chain walk (bad / reserved / end-of-chain).
pub const CLUSTER_END_MIN: Cluster = 0x0FFF_FFF7;
pub const END_OF_CHAIN: Cluster = 0x0FFF_FFFF;
pub const MEDIA_DESCRIPTOR: u8 = 0xF8;

pub fn is_end_of_chain(value: Cluster) -> bool {
    value >= CLUSTER_END_MIN
}

pub const NAME_END: u8 = 0x00;
pub const NAME_DELETED: u8 = 0xE5;
/// Stored in `name[0]` when a real name starts with 0xE5.
pub const NAME_E5_ESCAPE: u8 = 0x05;

pub const DOT_NAME: [u8; 11] = *b".          ";
pub const DOTDOT_NAME: [u8; 11] = *b"..         ";

bitflags! {
    /// Directory entry attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
        const LONG_NAME = Self::READ_ONLY.bits() | Self::HIDDEN.bits()
            | Self::SYSTEM.bits() | Self::VOLUME_ID.bits();
    }
}

impl Attributes {
    /// Attribute byte of a plain file created through `write`.
    pub const FILE: Attributes = Attributes::ARCHIVE;

    /// Bits a caller may set on a file through `write`.
    pub const CALLER_SETTABLE: Attributes = Attributes::READ_ONLY
        .union(Attributes::HIDDEN)
        .union(Attributes::SYSTEM)
        .union(Attributes::ARCHIVE);

    /// LFN fragments and volume labels; never matched by name lookups.
    pub fn is_hidden_from_lookup(self) -> bool {
        self.contains(Attributes::VOLUME_ID)
    }
}

fn le16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn le32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn put16(buf: &mut [u8], off: usize, val: u16) {
    buf[off..off + 2].copy_from_slice(&val.to_le_bytes());
}

fn put32(buf: &mut [u8], off: usize, val: u32) {
    buf[off..off + 4].copy_from_slice(&val.to_le_bytes());
}

// ══════════════════════════════════════════════════════════════
//  Boot sector + extended BPB
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSector {
    pub jump: [u8; 3],
    pub oem: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub root_entries: u16,
    pub total_sectors_16: u16,
    pub media: u8,
    pub sectors_per_fat_16: u16,
    pub sectors_per_track: u16,
    pub heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    pub sectors_per_fat: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: Cluster,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
    pub drive_number: u8,
    pub ext_signature: u8,
    pub volume_serial: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
}

impl BootSector {
    pub fn decode(sector: &[u8]) -> FsResult<Self> {
        if sector.len() < SECTOR_SIZE || sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(FsError::Unsupported);
        }

        let mut jump = [0u8; 3];
        jump.copy_from_slice(&sector[0..3]);
        let mut oem = [0u8; 8];
        oem.copy_from_slice(&sector[3..11]);
        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&sector[71..82]);
        let mut fs_type = [0u8; 8];
        fs_type.copy_from_slice(&sector[82..90]);

        Ok(BootSector {
            jump,
            oem,
            bytes_per_sector: le16(sector, 11),
            sectors_per_cluster: sector[13],
            reserved_sectors: le16(sector, 14),
            num_fats: sector[16],
            root_entries: le16(sector, 17),
            total_sectors_16: le16(sector, 19),
            media: sector[21],
            sectors_per_fat_16: le16(sector, 22),
            sectors_per_track: le16(sector, 24),
            heads: le16(sector, 26),
            hidden_sectors: le32(sector, 28),
            total_sectors_32: le32(sector, 32),
            sectors_per_fat: le32(sector, 36),
            ext_flags: le16(sector, 40),
            fs_version: le16(sector, 42),
            root_cluster: le32(sector, 44),
            fs_info_sector: le16(sector, 48),
            backup_boot_sector: le16(sector, 50),
            drive_number: sector[64],
            ext_signature: sector[66],
            volume_serial: le32(sector, 67),
            volume_label,
            fs_type,
        })
    }

    /// Write every field into `sector` (at least 512 bytes), including the signature.
    pub fn encode(&self, sector: &mut [u8]) {
        sector[0..3].copy_from_slice(&self.jump);
        sector[3..11].copy_from_slice(&self.oem);
        put16(sector, 11, self.bytes_per_sector);
        sector[13] = self.sectors_per_cluster;
        put16(sector, 14, self.reserved_sectors);
        sector[16] = self.num_fats;
        put16(sector, 17, self.root_entries);
        put16(sector, 19, self.total_sectors_16);
        sector[21] = self.media;
        put16(sector, 22, self.sectors_per_fat_16);
        put16(sector, 24, self.sectors_per_track);
        put16(sector, 26, self.heads);
        put32(sector, 28, self.hidden_sectors);
        put32(sector, 32, self.total_sectors_32);
        put32(sector, 36, self.sectors_per_fat);
        put16(sector, 40, self.ext_flags);
        put16(sector, 42, self.fs_version);
        put32(sector, 44, self.root_cluster);
        put16(sector, 48, self.fs_info_sector);
        put16(sector, 50, self.backup_boot_sector);
        sector[64] = self.drive_number;
        sector[66] = self.ext_signature;
        put32(sector, 67, self.volume_serial);
        sector[71..82].copy_from_slice(&self.volume_label);
        sector[82..90].copy_from_slice(&self.fs_type);
        sector[510] = 0x55;
        sector[511] = 0xAA;
    }

    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }

    pub fn fat_size(&self) -> u32 {
        if self.sectors_per_fat_16 != 0 {
            self.sectors_per_fat_16 as u32
        } else {
            self.sectors_per_fat
        }
    }
}

// ══════════════════════════════════════════════════════════════
//  Directory entry (32 bytes)
// ══════════════════════════════════════════════════════════════

/// Packed FAT time/date. Date 0x0021 is 1980-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FatTimestamp {
    pub tenths: u8,
    pub time: u16,
    pub date: u16,
}

impl FatTimestamp {
    pub const EPOCH: FatTimestamp = FatTimestamp { tenths: 0, time: 0, date: 0x0021 };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; 11],
    pub attrib: Attributes,
    pub nt_reserved: u8,
    pub created: FatTimestamp,
    pub accessed_date: u16,
    pub modified: FatTimestamp,
    pub first_cluster: Cluster,
    pub size: u32,
}

impl DirEntry {
    pub fn new(name: [u8; 11], attrib: Attributes, first_cluster: Cluster, size: u32) -> Self {
        DirEntry {
            name,
            attrib,
            nt_reserved: 0,
            created: FatTimestamp::EPOCH,
            accessed_date: FatTimestamp::EPOCH.date,
            modified: FatTimestamp { tenths: 0, ..FatTimestamp::EPOCH },
            first_cluster,
            size,
        }
    }

    pub fn decode(raw: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[0..11]);
        DirEntry {
            name,
            attrib: Attributes::from_bits_retain(raw[11]),
            nt_reserved: raw[12],
            created: FatTimestamp { tenths: raw[13], time: le16(raw, 14), date: le16(raw, 16) },
            accessed_date: le16(raw, 18),
            modified: FatTimestamp { tenths: 0, time: le16(raw, 22), date: le16(raw, 24) },
            first_cluster: (le16(raw, 20) as u32) << 16 | le16(raw, 26) as u32,
            size: le32(raw, 28),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        raw[0..11].copy_from_slice(&self.name);
        raw[11] = self.attrib.bits();
        raw[12] = self.nt_reserved;
        raw[13] = self.created.tenths;
        put16(raw, 14, self.created.time);
        put16(raw, 16, self.created.date);
        put16(raw, 18, self.accessed_date);
        put16(raw, 20, (self.first_cluster >> 16) as u16);
        put16(raw, 22, self.modified.time);
        put16(raw, 24, self.modified.date);
        put16(raw, 26, self.first_cluster as u16);
        put32(raw, 28, self.size);
    }

    pub fn is_dir(&self) -> bool {
        self.attrib.contains(Attributes::DIRECTORY)
    }

    pub fn is_read_only(&self) -> bool {
        self.attrib.contains(Attributes::READ_ONLY)
    }

    pub fn is_dot(&self) -> bool {
        self.name == DOT_NAME || self.name == DOTDOT_NAME
    }

    /// `NAME.EXT` with padding removed and the 0x05 escape undone.
    pub fn display_name(&self) -> String {
        let mut name = self.name;
        if name[0] == NAME_E5_ESCAPE {
            name[0] = NAME_DELETED;
        }
        let base = trim_padding(&name[0..8]);
        let ext = trim_padding(&name[8..11]);

        let mut out = String::with_capacity(12);
        out.extend(base.iter().map(|&b| b as char));
        if !ext.is_empty() {
            out.push('.');
            out.extend(ext.iter().map(|&b| b as char));
        }
        out
    }
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let end = field.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &field[..end]
}
