pub mod chain;
pub mod dir;
pub mod file;
pub mod format;
pub mod layout;
pub mod volume;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::StorageConfig;
use crate::drivers::ata::MAX_DRIVES;
use crate::drivers::block::{BlockDeviceRegistry, BlockError};
use crate::fs::error::{FsError, FsResult};
use crate::fs::partition::PartitionTable;
use crate::fs::{FsType, VolumeId};
use chain::{ClusterAllocator, LinearScanAllocator};
use file::FileInfo;
use format::FormatOptions;
use layout::{Attributes, BootSector};
use volume::{Volume, VolumeIo, VolumeTable};

/// Filesystem context: mounted volumes, cached partition tables and the
/// cluster allocator. Every call names the volume and borrows the devices.
pub struct Fat32 {
    volumes: VolumeTable,
    partitions: [Option<PartitionTable>; MAX_DRIVES],
    allocator: Box<dyn ClusterAllocator>,
}

impl Fat32 {
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_allocator(config, Box::new(LinearScanAllocator::new(config.first_free_hint)))
    }

    pub fn with_allocator(config: &StorageConfig, allocator: Box<dyn ClusterAllocator>) -> Self {
        Fat32 {
            volumes: VolumeTable::new(config.max_volumes),
            partitions: [None; MAX_DRIVES],
            allocator,
        }
    }

    /// Partition table of `disk`, read from sector 0 the first time.
    pub fn partition_table(&mut self, disks: &mut BlockDeviceRegistry, disk: u8) -> FsResult<PartitionTable> {
        let cached = self
            .partitions
            .get_mut(disk as usize)
            .ok_or(FsError::Block(BlockError::UnsupportedDrive(disk)))?;
        if let Some(table) = *cached {
            return Ok(table);
        }
        let table = PartitionTable::read(disks.device_mut(disk)?)?;
        *cached = Some(table);
        Ok(table)
    }

    /// Forget the cached table, e.g. after rewriting it.
    pub fn invalidate_partitions(&mut self, disk: u8) {
        if let Some(cached) = self.partitions.get_mut(disk as usize) {
            *cached = None;
        }
    }

    /// Mount `id`. Mounting an already mounted volume succeeds without I/O.
    pub fn mount(&mut self, disks: &mut BlockDeviceRegistry, id: VolumeId) -> FsResult<()> {
        if self.volumes.contains(id) {
            return Ok(());
        }

        let table = self.partition_table(disks, id.disk)?;
        let partition = *table.entry(id.partition).ok_or(FsError::NotFound)?;
        if !partition.is_fat32() {
            log::warn!("fat32: {}:{} has partition type {:#04x}", id.disk, id.partition, partition.kind);
            return Err(FsError::Unsupported);
        }

        let dev = disks.device_mut(id.disk)?;
        if dev.sector_size() != layout::SECTOR_SIZE {
            return Err(FsError::Unsupported);
        }
        let mut sector = vec![0u8; layout::SECTOR_SIZE];
        dev.read_sectors(partition.start_lba, 1, &mut sector)?;
        let bs = BootSector::decode(&sector)?;
        let volume = Volume::from_boot_sector(id, &partition, &bs)?;

        log::info!(
            "fat32: mounted {}:{} \"{}\" spc={} fats={} spf={} root={} data_start={}",
            id.disk, id.partition, volume.label(), volume.sectors_per_cluster,
            volume.num_fats, volume.sectors_per_fat, volume.root_cluster, volume.data_start()
        );
        self.volumes.insert(volume)
    }

    /// Drop `id` from the mount table. Nothing is written to disk.
    pub fn unmount(&mut self, id: VolumeId) -> Option<Volume> {
        let volume = self.volumes.remove(id)?;
        log::debug!("fat32: unmounted {}:{}", id.disk, id.partition);
        Some(volume)
    }

    pub fn volume(&self, id: VolumeId) -> FsResult<&Volume> {
        self.volumes.get(id)
    }

    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.iter()
    }

    /// Filesystem type carried by a partition, mounted or not.
    pub fn fs_type(&mut self, disks: &mut BlockDeviceRegistry, id: VolumeId) -> FsResult<FsType> {
        if let Ok(volume) = self.volumes.get(id) {
            return Ok(volume.fs_type);
        }
        let table = self.partition_table(disks, id.disk)?;
        let partition = table.entry(id.partition).ok_or(FsError::NotFound)?;
        FsType::from_partition_type(partition.kind).ok_or(FsError::Unsupported)
    }

    /// Format the partition behind `id` as FAT32 and mount the result.
    pub fn format(&mut self, disks: &mut BlockDeviceRegistry, id: VolumeId, options: &FormatOptions) -> FsResult<()> {
        let table = self.partition_table(disks, id.disk)?;
        let partition = *table.entry(id.partition).ok_or(FsError::NotFound)?;
        if !partition.is_fat32() {
            return Err(FsError::Unsupported);
        }
        format::format_volume(disks.device_mut(id.disk)?, &partition, options)?;
        self.unmount(id);
        self.mount(disks, id)
    }

    /// Write a new partition table to `disk`. Volumes on it are unmounted.
    pub fn write_partition_table(&mut self, disks: &mut BlockDeviceRegistry, disk: u8, table: &PartitionTable) -> FsResult<()> {
        format::write_partition_table(disks.device_mut(disk)?, table)?;
        let stale: Vec<VolumeId> = self.volumes.iter().map(|v| v.id).filter(|v| v.disk == disk).collect();
        for id in stale {
            self.unmount(id);
        }
        self.partitions[disk as usize] = Some(*table);
        Ok(())
    }

    fn io<'a>(volumes: &'a VolumeTable, disks: &'a mut BlockDeviceRegistry, id: VolumeId) -> FsResult<VolumeIo<'a>> {
        let volume = volumes.get(id)?;
        VolumeIo::new(disks.device_mut(id.disk)?, volume)
    }

    // ── File operations ─────────────────────────────────────

    pub fn read(&mut self, disks: &mut BlockDeviceRegistry, id: VolumeId, path: &str) -> FsResult<Vec<u8>> {
        let mut io = Self::io(&self.volumes, disks, id)?;
        file::read(&mut io, path)
    }

    pub fn write(
        &mut self,
        disks: &mut BlockDeviceRegistry,
        id: VolumeId,
        path: &str,
        data: &[u8],
        attrib: Attributes,
    ) -> FsResult<()> {
        let mut io = Self::io(&self.volumes, disks, id)?;
        file::write(&mut io, self.allocator.as_mut(), path, data, attrib)
    }

    pub fn rename(&mut self, disks: &mut BlockDeviceRegistry, id: VolumeId, path: &str, new_name: &str) -> FsResult<()> {
        let mut io = Self::io(&self.volumes, disks, id)?;
        file::rename(&mut io, path, new_name)
    }

    pub fn delete(&mut self, disks: &mut BlockDeviceRegistry, id: VolumeId, path: &str) -> FsResult<()> {
        let mut io = Self::io(&self.volumes, disks, id)?;
        file::delete(&mut io, self.allocator.as_mut(), path)
    }

    pub fn mkdir(&mut self, disks: &mut BlockDeviceRegistry, id: VolumeId, path: &str) -> FsResult<()> {
        let mut io = Self::io(&self.volumes, disks, id)?;
        file::mkdir(&mut io, self.allocator.as_mut(), path)
    }

    pub fn stat(&mut self, disks: &mut BlockDeviceRegistry, id: VolumeId, path: &str) -> FsResult<FileInfo> {
        let mut io = Self::io(&self.volumes, disks, id)?;
        file::stat(&mut io, path)
    }

    pub fn list_dir(&mut self, disks: &mut BlockDeviceRegistry, id: VolumeId, path: &str) -> FsResult<Vec<FileInfo>> {
        let mut io = Self::io(&self.volumes, disks, id)?;
        file::list_dir(&mut io, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ramdisk::RamDisk;
    use crate::fs::partition::{PartitionEntry, TYPE_FAT32};

    fn disks_with_table(entries: [PartitionEntry; 4]) -> BlockDeviceRegistry {
        let mut disk = RamDisk::new(4096);
        PartitionTable::new(entries).write(&mut disk).unwrap();
        let mut disks = BlockDeviceRegistry::new();
        disks.attach(0, Box::new(disk)).unwrap();
        disks
    }

    fn one_fat32() -> [PartitionEntry; 4] {
        [
            PartitionEntry::new(TYPE_FAT32, 64, 4000),
            PartitionEntry::default(),
            PartitionEntry::new(0x96, 4064, 32),
            PartitionEntry::default(),
        ]
    }

    #[test]
    fn unformatted_partition_does_not_mount() {
        let mut disks = disks_with_table(one_fat32());
        let mut fat = Fat32::new(&StorageConfig::default());
        assert_eq!(fat.mount(&mut disks, VolumeId::new(0, 0)), Err(FsError::Unsupported));
        assert!(fat.volumes().next().is_none());
    }

    #[test]
    fn format_mounts_and_remount_is_noop() {
        let mut disks = disks_with_table(one_fat32());
        let mut fat = Fat32::new(&StorageConfig::default());
        let id = VolumeId::new(0, 0);

        fat.format(&mut disks, id, &FormatOptions { sectors_per_cluster: 2, ..FormatOptions::default() }).unwrap();
        assert_eq!(fat.volume(id).unwrap().sectors_per_cluster, 2);
        fat.mount(&mut disks, id).unwrap();
        assert_eq!(fat.volumes().count(), 1);

        fat.write(&mut disks, id, "/A.TXT", b"abc", Attributes::FILE).unwrap();
        assert_eq!(fat.read(&mut disks, id, "/A.TXT").unwrap(), b"abc");

        assert_eq!(fat.unmount(id).map(|v| v.id), Some(id));
        assert_eq!(fat.unmount(id), None);
        assert_eq!(fat.read(&mut disks, id, "/A.TXT"), Err(FsError::NotMounted));
        fat.mount(&mut disks, id).unwrap();
        assert_eq!(fat.read(&mut disks, id, "/A.TXT").unwrap(), b"abc");
    }

    #[test]
    fn partition_kinds() {
        let mut disks = disks_with_table(one_fat32());
        let mut fat = Fat32::new(&StorageConfig::default());

        assert_eq!(fat.fs_type(&mut disks, VolumeId::new(0, 0)), Ok(FsType::Fat32));
        assert_eq!(fat.fs_type(&mut disks, VolumeId::new(0, 2)), Ok(FsType::Iso9660));
        assert_eq!(fat.fs_type(&mut disks, VolumeId::new(0, 1)), Err(FsError::NotFound));
        assert_eq!(fat.mount(&mut disks, VolumeId::new(0, 2)), Err(FsError::Unsupported));
        assert_eq!(
            fat.mount(&mut disks, VolumeId::new(2, 0)),
            Err(FsError::Block(BlockError::NoDevice(2)))
        );
    }

    #[test]
    fn volume_table_capacity_is_enforced() {
        let mut disks = disks_with_table([
            PartitionEntry::new(TYPE_FAT32, 64, 2000),
            PartitionEntry::new(TYPE_FAT32, 2064, 2000),
            PartitionEntry::default(),
            PartitionEntry::default(),
        ]);
        let config = StorageConfig { max_volumes: 1, ..StorageConfig::default() };
        let mut fat = Fat32::new(&config);
        let opts = FormatOptions { sectors_per_cluster: 1, ..FormatOptions::default() };

        fat.format(&mut disks, VolumeId::new(0, 0), &opts).unwrap();
        assert_eq!(fat.format(&mut disks, VolumeId::new(0, 1), &opts), Err(FsError::OutOfMemory));
        assert_eq!(fat.volume(VolumeId::new(0, 1)).err(), Some(FsError::NotMounted));
    }
}
