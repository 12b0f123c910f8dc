//! Partition table in sector 0.
//!
//! Each of the four slots is four little-endian words at `0x1BE + 16*slot`:
//!
//! ```text
//! +0  active        (non-zero = bootable)
//! +4  type          (low byte significant)
//! +8  start LBA
//! +12 sector count
//! ```

use alloc::vec;

use crate::drivers::block::{BlockDevice, BlockResult};

pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;
pub const PARTITION_SLOTS: usize = 4;
const ENTRY_SIZE: usize = 16;

pub const TYPE_EMPTY: u8 = 0x00;
pub const TYPE_FAT32: u8 = 0x0B;
pub const TYPE_FAT32_LBA: u8 = 0x0C;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionEntry {
    pub active: bool,
    pub kind: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

fn word(raw: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]])
}

impl PartitionEntry {
    pub fn new(kind: u8, start_lba: u32, sector_count: u32) -> Self {
        PartitionEntry { active: false, kind, start_lba, sector_count }
    }

    pub fn is_empty(&self) -> bool {
        self.kind == TYPE_EMPTY || self.sector_count == 0
    }

    pub fn is_fat32(&self) -> bool {
        matches!(self.kind, TYPE_FAT32 | TYPE_FAT32_LBA)
    }

    pub fn decode(raw: &[u8]) -> Self {
        PartitionEntry {
            active: word(raw, 0) != 0,
            kind: word(raw, 1) as u8,
            start_lba: word(raw, 2),
            sector_count: word(raw, 3),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        raw[0..4].copy_from_slice(&(self.active as u32).to_le_bytes());
        raw[4..8].copy_from_slice(&(self.kind as u32).to_le_bytes());
        raw[8..12].copy_from_slice(&self.start_lba.to_le_bytes());
        raw[12..16].copy_from_slice(&self.sector_count.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionTable {
    entries: [PartitionEntry; PARTITION_SLOTS],
}

impl PartitionTable {
    pub fn new(entries: [PartitionEntry; PARTITION_SLOTS]) -> Self {
        PartitionTable { entries }
    }

    pub fn decode(sector: &[u8]) -> Self {
        let mut entries = [PartitionEntry::default(); PARTITION_SLOTS];
        for (slot, entry) in entries.iter_mut().enumerate() {
            let off = PARTITION_TABLE_OFFSET + slot * ENTRY_SIZE;
            *entry = PartitionEntry::decode(&sector[off..off + ENTRY_SIZE]);
        }
        PartitionTable { entries }
    }

    /// Overwrite the table area of `sector` and set the 0x55AA signature.
    pub fn encode(&self, sector: &mut [u8]) {
        for (slot, entry) in self.entries.iter().enumerate() {
            let off = PARTITION_TABLE_OFFSET + slot * ENTRY_SIZE;
            entry.encode(&mut sector[off..off + ENTRY_SIZE]);
        }
        sector[510] = 0x55;
        sector[511] = 0xAA;
    }

    pub fn read(dev: &mut dyn BlockDevice) -> BlockResult<Self> {
        let mut sector = vec![0u8; dev.sector_size()];
        dev.read_sectors(0, 1, &mut sector)?;
        Ok(Self::decode(&sector))
    }

    /// Read-modify-write sector 0 so any boot code in front of the table survives.
    pub fn write(&self, dev: &mut dyn BlockDevice) -> BlockResult<()> {
        let mut sector = vec![0u8; dev.sector_size()];
        dev.read_sectors(0, 1, &mut sector)?;
        self.encode(&mut sector);
        dev.write_sectors(0, 1, &sector)
    }

    /// Non-empty entry in `slot`.
    pub fn entry(&self, slot: u8) -> Option<&PartitionEntry> {
        self.entries.get(slot as usize).filter(|e| !e.is_empty())
    }

    pub fn entries(&self) -> &[PartitionEntry; PARTITION_SLOTS] {
        &self.entries
    }
}
