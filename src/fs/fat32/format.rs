//! Building fresh FAT32 volumes and partition tables.

use alloc::vec;

use super::layout::{BootSector, END_OF_CHAIN, MEDIA_DESCRIPTOR, SECTOR_SIZE};
use crate::drivers::block::BlockDevice;
use crate::fs::error::{FsError, FsResult};
use crate::fs::partition::{PartitionEntry, PartitionTable};

/// Sectors written per call when clearing the FAT.
const CLEAR_BATCH: u32 = 16;

#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub label: [u8; 11],
    pub serial: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            sectors_per_cluster: 8,
            reserved_sectors: 32,
            num_fats: 2,
            label: *b"NO NAME    ",
            serial: 0x1980_0101,
        }
    }
}

/// Sectors per FAT large enough to map every data cluster of `total` sectors.
fn fat_sectors(total: u32, reserved: u32, spc: u32) -> u32 {
    let clusters = u64::from(total - reserved) / u64::from(spc) + 2;
    // At most 2^25 for any u32 sector count.
    (clusters * 4).div_ceil(SECTOR_SIZE as u64) as u32
}

fn zero_sectors(dev: &mut dyn BlockDevice, start: u32, count: u32) -> FsResult<()> {
    let zero = vec![0u8; CLEAR_BATCH as usize * SECTOR_SIZE];
    let mut done = 0;
    while done < count {
        let n = (count - done).min(CLEAR_BATCH);
        dev.write_sectors(start + done, n, &zero[..n as usize * SECTOR_SIZE])?;
        done += n;
    }
    Ok(())
}

/// Lay down a boot sector, empty FATs and an empty root directory.
///
/// ```text
/// FAT[0] = media | 0x0FFFFF00   FAT[1] = end of chain   FAT[2] = root, end of chain
/// ```
pub fn format_volume(dev: &mut dyn BlockDevice, partition: &PartitionEntry, options: &FormatOptions) -> FsResult<BootSector> {
    let spc = options.sectors_per_cluster;
    if dev.sector_size() != SECTOR_SIZE || spc == 0 || !spc.is_power_of_two() || options.num_fats == 0 {
        return Err(FsError::Unsupported);
    }

    let total = partition.sector_count;
    if partition.start_lba.checked_add(total).is_none() {
        return Err(FsError::OutOfRange);
    }
    let reserved = options.reserved_sectors.max(1) as u32;
    if total <= reserved + spc as u32 {
        return Err(FsError::NoSpace);
    }
    let spf = fat_sectors(total, reserved, spc as u32);
    let data_start = (options.num_fats as u32)
        .checked_mul(spf)
        .and_then(|fats| fats.checked_add(reserved))
        .ok_or(FsError::NoSpace)?;
    if data_start.checked_add(spc as u32).map_or(true, |end| total < end) {
        return Err(FsError::NoSpace);
    }

    let bs = BootSector {
        jump: [0xEB, 0x58, 0x90],
        oem: *b"ATOMICOS",
        bytes_per_sector: SECTOR_SIZE as u16,
        sectors_per_cluster: spc,
        reserved_sectors: reserved as u16,
        num_fats: options.num_fats,
        root_entries: 0,
        total_sectors_16: 0,
        media: MEDIA_DESCRIPTOR,
        sectors_per_fat_16: 0,
        sectors_per_track: 63,
        heads: 255,
        hidden_sectors: partition.start_lba,
        total_sectors_32: total,
        sectors_per_fat: spf,
        ext_flags: 0,
        fs_version: 0,
        root_cluster: 2,
        fs_info_sector: 1,
        backup_boot_sector: if reserved > 6 { 6 } else { 0 },
        drive_number: 0x80,
        ext_signature: 0x29,
        volume_serial: options.serial,
        volume_label: options.label,
        fs_type: *b"FAT32   ",
    };

    let base = partition.start_lba;
    let mut sector = [0u8; SECTOR_SIZE];
    bs.encode(&mut sector);
    dev.write_sectors(base, 1, &sector)?;

    // Every FAT copy starts out identical; later updates go to copy 0 only.
    zero_sectors(dev, base + reserved, options.num_fats as u32 * spf)?;
    let mut fat = [0u8; SECTOR_SIZE];
    fat[0..4].copy_from_slice(&(0x0FFF_FF00 | MEDIA_DESCRIPTOR as u32).to_le_bytes());
    fat[4..8].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    fat[8..12].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    for copy in 0..options.num_fats as u32 {
        dev.write_sectors(base + reserved + copy * spf, 1, &fat)?;
    }

    zero_sectors(dev, base + data_start, spc as u32)?;

    log::info!(
        "fat32: formatted {} sectors at lba {}: spc={} spf={} data_start={}",
        total, base, spc, spf, data_start
    );
    Ok(bs)
}

/// Write `table` into sector 0 of `dev`.
pub fn write_partition_table(dev: &mut dyn BlockDevice, table: &PartitionTable) -> FsResult<()> {
    table.write(dev)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ramdisk::RamDisk;
    use crate::fs::partition::TYPE_FAT32;

    #[test]
    fn fat_covers_every_cluster() {
        assert_eq!(fat_sectors(4000, 32, 2), 16);
        assert_eq!(fat_sectors(2048, 32, 1), 16);
        assert_eq!(fat_sectors(u32::MAX, 32, 1), 33_554_432);
    }

    #[test]
    fn huge_partitions_do_not_overflow() {
        let mut disk = RamDisk::new(64);
        let past_end = PartitionEntry::new(TYPE_FAT32, 64, u32::MAX);
        assert_eq!(format_volume(&mut disk, &past_end, &FormatOptions::default()), Err(FsError::OutOfRange));

        let whole = PartitionEntry::new(TYPE_FAT32, 0, u32::MAX);
        let many_fats = FormatOptions { sectors_per_cluster: 1, num_fats: 255, ..FormatOptions::default() };
        assert_eq!(format_volume(&mut disk, &whole, &many_fats), Err(FsError::NoSpace));
        assert!(disk.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn formatted_volume_reserves_first_clusters() {
        let mut disk = RamDisk::new(4096);
        let part = PartitionEntry::new(TYPE_FAT32, 64, 4000);
        let opts = FormatOptions { sectors_per_cluster: 2, ..FormatOptions::default() };
        let bs = format_volume(&mut disk, &part, &opts).unwrap();

        let bytes = disk.as_bytes();
        let boot = &bytes[64 * 512..65 * 512];
        assert_eq!(BootSector::decode(boot).unwrap(), bs);

        let fat0 = (64 + 32) * 512;
        assert_eq!(&bytes[fat0 + 4..fat0 + 8], &END_OF_CHAIN.to_le_bytes());
        assert_eq!(&bytes[fat0 + 8..fat0 + 12], &END_OF_CHAIN.to_le_bytes());
        assert_eq!(&bytes[fat0 + 12..fat0 + 16], &[0, 0, 0, 0]);

        let fat1 = fat0 + 16 * 512;
        assert_eq!(&bytes[fat1 + 8..fat1 + 12], &END_OF_CHAIN.to_le_bytes());
    }

    #[test]
    fn tiny_partition_is_rejected() {
        let mut disk = RamDisk::new(64);
        let part = PartitionEntry::new(TYPE_FAT32, 0, 40);
        assert_eq!(format_volume(&mut disk, &part, &FormatOptions::default()), Err(FsError::NoSpace));

        let odd = FormatOptions { sectors_per_cluster: 3, ..FormatOptions::default() };
        assert_eq!(format_volume(&mut disk, &part, &odd), Err(FsError::Unsupported));
    }
}
