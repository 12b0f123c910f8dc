//! Mounted-volume geometry, the mount table, and partition-relative sector I/O.

use alloc::vec::Vec;

use super::layout::{BootSector, Cluster, SECTOR_SIZE};
use crate::drivers::block::{BlockDevice, BlockError};
use crate::fs::error::{FsError, FsResult};
use crate::fs::partition::PartitionEntry;
use crate::fs::{FsType, VolumeId};

/// Data clusters a 28-bit FAT can number below the reserved range.
const MAX_CLUSTERS: u32 = 0x0FFF_FFF5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub id: VolumeId,
    pub fs_type: FsType,
    /// Absolute LBA of the partition's boot sector.
    pub start_lba: u32,
    pub sector_count: u32,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub sectors_per_fat: u32,
    pub root_cluster: Cluster,
    pub volume_label: [u8; 11],
    // Computed
    fat_start: u32,
    data_start: u32,
    cluster_count: u32,
}

impl Volume {
    /// Validate a boot sector read from `partition` and derive the geometry.
    pub fn from_boot_sector(id: VolumeId, partition: &PartitionEntry, bs: &BootSector) -> FsResult<Self> {
        let spc = bs.sectors_per_cluster;
        if bs.bytes_per_sector as usize != SECTOR_SIZE
            || spc == 0
            || !spc.is_power_of_two()
            || bs.num_fats == 0
            || bs.root_cluster < 2
        {
            return Err(FsError::Unsupported);
        }

        let sectors_per_fat = bs.fat_size();
        let fat_start = bs.reserved_sectors as u32;
        let data_start = (bs.num_fats as u32)
            .checked_mul(sectors_per_fat)
            .and_then(|fats| fats.checked_add(fat_start))
            .ok_or(FsError::Unsupported)?;

        // Trust the smaller of the partition and the boot sector.
        let total = match bs.total_sectors() {
            0 => partition.sector_count,
            n => n.min(partition.sector_count),
        };
        if sectors_per_fat == 0 || total <= data_start {
            return Err(FsError::Unsupported);
        }

        // Clusters the data area holds, capped by what the FAT can address.
        let by_data = (total - data_start) / spc as u32;
        let by_fat = sectors_per_fat
            .checked_mul(SECTOR_SIZE as u32 / 4)
            .ok_or(FsError::Unsupported)?
            .saturating_sub(2);
        let cluster_count = by_data.min(by_fat).min(MAX_CLUSTERS);
        if bs.root_cluster > cluster_count + 1 {
            return Err(FsError::Unsupported);
        }

        Ok(Volume {
            id,
            fs_type: FsType::Fat32,
            start_lba: partition.start_lba,
            sector_count: total,
            sectors_per_cluster: spc,
            reserved_sectors: bs.reserved_sectors,
            num_fats: bs.num_fats,
            sectors_per_fat,
            root_cluster: bs.root_cluster,
            volume_label: bs.volume_label,
            fat_start,
            data_start,
            cluster_count,
        })
    }

    /// First FAT sector, relative to the partition.
    pub fn fat_start(&self) -> u32 {
        self.fat_start
    }

    /// First data-area sector, relative to the partition.
    pub fn data_start(&self) -> u32 {
        self.data_start
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn last_cluster(&self) -> Cluster {
        self.cluster_count + 1
    }

    pub fn cluster_bytes(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR_SIZE
    }

    pub fn is_data_cluster(&self, cluster: Cluster) -> bool {
        (2..=self.last_cluster()).contains(&cluster)
    }

    /// Convert a cluster number to its first sector in the data area.
    pub fn cluster_sector(&self, cluster: Cluster) -> u32 {
        self.data_start + (cluster - 2) * self.sectors_per_cluster as u32
    }

    /// Directory start cluster, where 0 stands for the root.
    pub fn dir_start(&self, cluster: Cluster) -> Cluster {
        if cluster == 0 { self.root_cluster } else { cluster }
    }

    pub fn label(&self) -> &str {
        let label = core::str::from_utf8(&self.volume_label).unwrap_or("");
        label.trim_end()
    }
}

/// Fixed-capacity table of mounted volumes.
pub struct VolumeTable {
    volumes: Vec<Volume>,
    capacity: usize,
}

impl VolumeTable {
    pub fn new(capacity: usize) -> Self {
        VolumeTable { volumes: Vec::new(), capacity }
    }

    pub fn get(&self, id: VolumeId) -> FsResult<&Volume> {
        self.volumes.iter().find(|v| v.id == id).ok_or(FsError::NotMounted)
    }

    pub fn contains(&self, id: VolumeId) -> bool {
        self.volumes.iter().any(|v| v.id == id)
    }

    pub fn insert(&mut self, volume: Volume) -> FsResult<()> {
        if self.contains(volume.id) {
            return Ok(());
        }
        if self.volumes.len() >= self.capacity {
            return Err(FsError::OutOfMemory);
        }
        self.volumes.try_reserve(1).map_err(|_| FsError::OutOfMemory)?;
        self.volumes.push(volume);
        Ok(())
    }

    pub fn remove(&mut self, id: VolumeId) -> Option<Volume> {
        let pos = self.volumes.iter().position(|v| v.id == id)?;
        Some(self.volumes.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.iter()
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

/// A device paired with one volume; sector numbers are partition-relative.
pub struct VolumeIo<'a> {
    dev: &'a mut (dyn BlockDevice + 'static),
    volume: &'a Volume,
}

impl<'a> VolumeIo<'a> {
    pub fn new(dev: &'a mut (dyn BlockDevice + 'static), volume: &'a Volume) -> FsResult<Self> {
        if dev.sector_size() != SECTOR_SIZE {
            return Err(FsError::Unsupported);
        }
        Ok(VolumeIo { dev, volume })
    }

    pub fn volume(&self) -> &'a Volume {
        self.volume
    }

    fn absolute(&self, rel: u32, count: u32) -> FsResult<u32> {
        match rel.checked_add(count) {
            Some(end) if end <= self.volume.sector_count => {}
            _ => return Err(FsError::Block(BlockError::OutOfRange)),
        }
        self.volume
            .start_lba
            .checked_add(rel)
            .ok_or(FsError::Block(BlockError::OutOfRange))
    }

    pub fn read_sectors(&mut self, rel: u32, count: u32, buf: &mut [u8]) -> FsResult<()> {
        let lba = self.absolute(rel, count)?;
        Ok(self.dev.read_sectors(lba, count, buf)?)
    }

    pub fn write_sectors(&mut self, rel: u32, count: u32, buf: &[u8]) -> FsResult<()> {
        let lba = self.absolute(rel, count)?;
        Ok(self.dev.write_sectors(lba, count, buf)?)
    }

    pub fn read_sector(&mut self, rel: u32, buf: &mut [u8]) -> FsResult<()> {
        self.read_sectors(rel, 1, buf)
    }

    pub fn write_sector(&mut self, rel: u32, buf: &[u8]) -> FsResult<()> {
        self.write_sectors(rel, 1, buf)
    }

    pub fn read_cluster(&mut self, cluster: Cluster, buf: &mut [u8]) -> FsResult<()> {
        let sector = self.volume.cluster_sector(cluster);
        self.read_sectors(sector, self.volume.sectors_per_cluster as u32, buf)
    }

    pub fn write_cluster(&mut self, cluster: Cluster, buf: &[u8]) -> FsResult<()> {
        let sector = self.volume.cluster_sector(cluster);
        self.write_sectors(sector, self.volume.sectors_per_cluster as u32, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat32::layout::{BootSector, MEDIA_DESCRIPTOR};
    use crate::fs::partition::TYPE_FAT32;

    fn boot_sector(spc: u8) -> BootSector {
        BootSector {
            jump: [0xEB, 0x58, 0x90],
            oem: *b"ATOMICOS",
            bytes_per_sector: 512,
            sectors_per_cluster: spc,
            reserved_sectors: 32,
            num_fats: 2,
            root_entries: 0,
            total_sectors_16: 0,
            media: MEDIA_DESCRIPTOR,
            sectors_per_fat_16: 0,
            sectors_per_track: 63,
            heads: 255,
            hidden_sectors: 64,
            total_sectors_32: 4000,
            sectors_per_fat: 16,
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 2,
            fs_info_sector: 1,
            backup_boot_sector: 6,
            drive_number: 0x80,
            ext_signature: 0x29,
            volume_serial: 1,
            volume_label: *b"DATA       ",
            fs_type: *b"FAT32   ",
        }
    }

    fn partition() -> PartitionEntry {
        PartitionEntry::new(TYPE_FAT32, 64, 4000)
    }

    #[test]
    fn geometry_from_boot_sector() {
        let vol = Volume::from_boot_sector(VolumeId::new(0, 0), &partition(), &boot_sector(2)).unwrap();
        assert_eq!(vol.fat_start(), 32);
        assert_eq!(vol.data_start(), 64);
        assert_eq!(vol.cluster_count(), 1968);
        assert_eq!(vol.cluster_sector(2), 64);
        assert_eq!(vol.cluster_sector(3), 66);
        assert_eq!(vol.cluster_bytes(), 1024);
        assert_eq!(vol.dir_start(0), 2);
        assert_eq!(vol.label(), "DATA");
    }

    #[test]
    fn bad_geometry_is_unsupported() {
        let mut bs = boot_sector(3);
        assert_eq!(Volume::from_boot_sector(VolumeId::new(0, 0), &partition(), &bs), Err(FsError::Unsupported));
        bs = boot_sector(2);
        bs.bytes_per_sector = 2048;
        assert_eq!(Volume::from_boot_sector(VolumeId::new(0, 0), &partition(), &bs), Err(FsError::Unsupported));
        bs = boot_sector(2);
        bs.root_cluster = 1;
        assert_eq!(Volume::from_boot_sector(VolumeId::new(0, 0), &partition(), &bs), Err(FsError::Unsupported));
    }

    #[test]
    fn oversized_fat_fields_are_unsupported() {
        let huge = PartitionEntry::new(TYPE_FAT32, 64, u32::MAX - 64);
        let mut bs = boot_sector(2);
        bs.total_sectors_32 = 0;
        bs.num_fats = 1;
        bs.sectors_per_fat = 0x0200_0000;
        assert_eq!(Volume::from_boot_sector(VolumeId::new(0, 0), &huge, &bs), Err(FsError::Unsupported));

        bs = boot_sector(2);
        bs.num_fats = 255;
        bs.sectors_per_fat = 0x0100_0001;
        assert_eq!(Volume::from_boot_sector(VolumeId::new(0, 0), &partition(), &bs), Err(FsError::Unsupported));

        bs = boot_sector(2);
        bs.reserved_sectors = u16::MAX;
        bs.num_fats = 1;
        bs.sectors_per_fat = u32::MAX - 100;
        assert_eq!(Volume::from_boot_sector(VolumeId::new(0, 0), &partition(), &bs), Err(FsError::Unsupported));
    }

    #[test]
    fn table_is_idempotent_and_bounded() {
        let mut table = VolumeTable::new(1);
        let vol = Volume::from_boot_sector(VolumeId::new(0, 0), &partition(), &boot_sector(2)).unwrap();
        table.insert(vol.clone()).unwrap();
        table.insert(vol).unwrap();
        assert_eq!(table.len(), 1);

        let other = Volume::from_boot_sector(VolumeId::new(1, 0), &partition(), &boot_sector(2)).unwrap();
        assert_eq!(table.insert(other), Err(FsError::OutOfMemory));
        assert_eq!(table.get(VolumeId::new(1, 0)).err(), Some(FsError::NotMounted));
        assert!(table.remove(VolumeId::new(0, 0)).is_some());
        assert!(table.is_empty());
    }
}
