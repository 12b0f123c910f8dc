//! The storage stack: drive registry plus FAT32 context, and the kernel-wide
//! instance the command layer works on.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::{Mutex, Once};

use crate::config::StorageConfig;
use crate::drivers::ata::atapi::IrqCompletion;
use crate::drivers::ata::port::PortIo;
use crate::drivers::ata::{AtaController, DriveKind, MAX_DRIVES};
use crate::drivers::block::{BlockDevice, BlockDeviceRegistry, BlockResult};
use crate::fs::error::{FsError, FsResult};
use crate::fs::fat32::file::FileInfo;
use crate::fs::fat32::format::FormatOptions;
use crate::fs::fat32::layout::Attributes;
use crate::fs::fat32::Fat32;
use crate::fs::partition::PartitionTable;
use crate::fs::{split_volume, FsType, VolumeId};

pub struct StorageStack {
    config: StorageConfig,
    pub disks: BlockDeviceRegistry,
    pub fat: Fat32,
}

impl StorageStack {
    pub fn new(config: StorageConfig) -> Self {
        StorageStack {
            config,
            disks: BlockDeviceRegistry::new(),
            fat: Fat32::new(&config),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Register every drive `controller` finds. Stale partition caches for
    /// the probed slots are dropped.
    pub fn probe_ata<P: PortIo + Send + 'static>(&mut self, controller: AtaController<P>) -> [DriveKind; MAX_DRIVES] {
        let kinds = self.disks.probe_ata(controller);
        for disk in 0..MAX_DRIVES as u8 {
            self.fat.invalidate_partitions(disk);
        }
        kinds
    }

    /// Probe the two legacy IDE channels and wire their interrupt lines.
    #[cfg(target_arch = "x86_64")]
    pub fn probe_legacy_ide(&mut self) -> [DriveKind; MAX_DRIVES] {
        let mut controller = AtaController::new(&self.config);
        controller.enable_interrupts();
        register_irq_lines(&controller);
        let kinds = self.probe_ata(controller);
        log::info!("storage: drives {:?}", kinds);
        kinds
    }

    pub fn attach(&mut self, slot: u8, device: Box<dyn BlockDevice>) -> BlockResult<()> {
        self.disks.attach(slot, device)?;
        self.fat.invalidate_partitions(slot);
        Ok(())
    }

    pub fn report_drives(&self) -> [DriveKind; MAX_DRIVES] {
        self.disks.report_drives()
    }

    pub fn mount(&mut self, id: VolumeId) -> FsResult<()> {
        self.fat.mount(&mut self.disks, id)
    }

    pub fn fs_type(&mut self, id: VolumeId) -> FsResult<FsType> {
        self.fat.fs_type(&mut self.disks, id)
    }

    pub fn format(&mut self, id: VolumeId, options: &FormatOptions) -> FsResult<()> {
        self.fat.format(&mut self.disks, id, options)
    }

    pub fn write_partition_table(&mut self, disk: u8, table: &PartitionTable) -> FsResult<()> {
        self.fat.write_partition_table(&mut self.disks, disk, table)
    }

    /// Volume named by the path's `"<disk>:<partition>"` token, or the first
    /// mounted volume when the path has none.
    pub fn resolve_volume<'p>(&self, path: &'p str) -> FsResult<(VolumeId, &'p str)> {
        match split_volume(path)? {
            (Some(id), rest) => Ok((id, rest)),
            (None, rest) => {
                let first = self.fat.volumes().map(|v| v.id).min().ok_or(FsError::NotMounted)?;
                Ok((first, rest))
            }
        }
    }

    // ── Path operations ─────────────────────────────────────

    pub fn read(&mut self, path: &str) -> FsResult<Vec<u8>> {
        let (id, path) = self.resolve_volume(path)?;
        self.fat.read(&mut self.disks, id, path)
    }

    pub fn write(&mut self, path: &str, data: &[u8], attrib: Attributes) -> FsResult<()> {
        let (id, path) = self.resolve_volume(path)?;
        self.fat.write(&mut self.disks, id, path, data, attrib)
    }

    pub fn rename(&mut self, path: &str, new_name: &str) -> FsResult<()> {
        let (id, path) = self.resolve_volume(path)?;
        self.fat.rename(&mut self.disks, id, path, new_name)
    }

    pub fn delete(&mut self, path: &str) -> FsResult<()> {
        let (id, path) = self.resolve_volume(path)?;
        self.fat.delete(&mut self.disks, id, path)
    }

    pub fn mkdir(&mut self, path: &str) -> FsResult<()> {
        let (id, path) = self.resolve_volume(path)?;
        self.fat.mkdir(&mut self.disks, id, path)
    }

    pub fn stat(&mut self, path: &str) -> FsResult<(FileInfo, FsType)> {
        let (id, path) = self.resolve_volume(path)?;
        let info = self.fat.stat(&mut self.disks, id, path)?;
        Ok((info, self.fat.volume(id)?.fs_type))
    }

    pub fn list_dir(&mut self, path: &str) -> FsResult<Vec<FileInfo>> {
        let (id, path) = self.resolve_volume(path)?;
        self.fat.list_dir(&mut self.disks, id, path)
    }
}

// ══════════════════════════════════════════════════════════════
//  Kernel-wide instance
// ══════════════════════════════════════════════════════════════

lazy_static! {
    pub static ref STORAGE: Mutex<StorageStack> = Mutex::new(StorageStack::new(StorageConfig::new()));
}

/// Completion lines of the two legacy channels, handed to the IRQ 14/15 handlers.
static IRQ_LINES: Once<[Arc<IrqCompletion>; 2]> = Once::new();

/// Called from the IDE interrupt handler. Never takes the storage lock.
pub fn on_ata_irq(channel: usize) {
    if let Some(line) = IRQ_LINES.get().and_then(|lines| lines.get(channel)) {
        line.signal();
    }
}

/// Publish a controller's completion lines for `on_ata_irq`. First call wins.
pub fn register_irq_lines<P: PortIo>(controller: &AtaController<P>) {
    if let (Some(primary), Some(secondary)) = (controller.irq_line(0), controller.irq_line(1)) {
        IRQ_LINES.call_once(|| [primary, secondary]);
    }
}

/// Bring up logging and probe the legacy IDE channels into `STORAGE`.
#[cfg(target_arch = "x86_64")]
pub fn init(config: StorageConfig) -> [DriveKind; MAX_DRIVES] {
    crate::serial::init_logger(config.log_level);

    let mut storage = STORAGE.lock();
    *storage = StorageStack::new(config);
    storage.probe_legacy_ide()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ramdisk::RamDisk;
    use crate::fs::partition::{PartitionEntry, TYPE_FAT32};

    fn stack_with_two_volumes() -> StorageStack {
        let mut stack = StorageStack::new(StorageConfig::default());
        stack.attach(1, Box::new(RamDisk::new(4096))).unwrap();
        let table = PartitionTable::new([
            PartitionEntry::new(TYPE_FAT32, 64, 2000),
            PartitionEntry::new(TYPE_FAT32, 2064, 2000),
            PartitionEntry::default(),
            PartitionEntry::default(),
        ]);
        stack.write_partition_table(1, &table).unwrap();
        let opts = FormatOptions { sectors_per_cluster: 1, ..FormatOptions::default() };
        stack.format(VolumeId::new(1, 1), &opts).unwrap();
        stack.format(VolumeId::new(1, 0), &opts).unwrap();
        stack
    }

    #[test]
    fn nothing_mounted_means_no_default_volume() {
        let stack = StorageStack::new(StorageConfig::default());
        assert_eq!(stack.resolve_volume("/A.TXT"), Err(FsError::NotMounted));
    }

    #[test]
    fn default_volume_is_lowest_mounted() {
        let stack = stack_with_two_volumes();
        assert_eq!(stack.resolve_volume("/A.TXT"), Ok((VolumeId::new(1, 0), "/A.TXT")));
        assert_eq!(stack.resolve_volume("1:1/A.TXT"), Ok((VolumeId::new(1, 1), "/A.TXT")));
    }

    #[test]
    fn volumes_are_independent() {
        let mut stack = stack_with_two_volumes();
        stack.write("1:1/ONLY.TXT", b"second", Attributes::FILE).unwrap();

        assert_eq!(stack.read("1:1/ONLY.TXT").unwrap(), b"second");
        assert_eq!(stack.read("/ONLY.TXT"), Err(FsError::NotFound));
        assert_eq!(stack.read("1:2/ONLY.TXT"), Err(FsError::NotMounted));

        let (info, fs) = stack.stat("1:1/ONLY.TXT").unwrap();
        assert_eq!(info.size, 6);
        assert_eq!(fs, FsType::Fat32);
    }

    #[test]
    fn irq_without_registered_lines_is_ignored() {
        on_ata_irq(0);
        on_ata_irq(7);
    }
}
