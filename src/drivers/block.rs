//! Block device seam and the fixed four-slot drive registry.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use spin::Mutex;

use super::ata::pio::AtaError;
use super::ata::port::PortIo;
use super::ata::{AtaController, AtaDrive, DriveKind, MAX_DRIVES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// Drive index outside 0..4.
    UnsupportedDrive(u8),
    /// Slot is in range but nothing usable sits there.
    NoDevice(u8),
    ReadOnly,
    OutOfRange,
    BufferTooSmall,
    Ata(AtaError),
    Io,
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockError::UnsupportedDrive(d) => write!(f, "Unsupported drive {}", d),
            BlockError::NoDevice(d)         => write!(f, "No device in slot {}", d),
            BlockError::ReadOnly            => write!(f, "Device is read-only"),
            BlockError::OutOfRange          => write!(f, "Sector address out of range"),
            BlockError::BufferTooSmall      => write!(f, "Buffer too small for transfer"),
            BlockError::Ata(e)              => write!(f, "ATA: {}", e),
            BlockError::Io                  => write!(f, "I/O error"),
        }
    }
}

impl From<AtaError> for BlockError {
    fn from(e: AtaError) -> Self {
        BlockError::Ata(e)
    }
}

pub type BlockResult<T> = Result<T, BlockError>;

/// A sector-addressed device.
pub trait BlockDevice: Send {
    fn kind(&self) -> DriveKind;
    fn sector_size(&self) -> usize;
    fn read_sectors(&mut self, lba: u32, count: u32, buf: &mut [u8]) -> BlockResult<()>;
    fn write_sectors(&mut self, lba: u32, count: u32, buf: &[u8]) -> BlockResult<()>;
    /// Highest addressable LBA.
    fn max_address(&mut self) -> BlockResult<u32>;
}

/// Check a transfer of `count` sectors at `lba` against buffer length and capacity.
pub fn check_transfer(lba: u32, count: u32, sector_size: usize, buf_len: usize, max_lba: Option<u32>) -> BlockResult<()> {
    if buf_len < count as usize * sector_size {
        return Err(BlockError::BufferTooSmall);
    }
    if count == 0 {
        return Ok(());
    }
    let last = lba.checked_add(count - 1).ok_or(BlockError::OutOfRange)?;
    match max_lba {
        Some(max) if last > max => Err(BlockError::OutOfRange),
        _ => Ok(()),
    }
}

/// Drive slots 0..4: primary master, primary slave, secondary master, secondary slave.
pub struct BlockDeviceRegistry {
    slots: [Option<Box<dyn BlockDevice>>; MAX_DRIVES],
}

impl BlockDeviceRegistry {
    pub fn new() -> Self {
        BlockDeviceRegistry { slots: [None, None, None, None] }
    }

    pub fn attach(&mut self, slot: u8, device: Box<dyn BlockDevice>) -> BlockResult<()> {
        let entry = self
            .slots
            .get_mut(slot as usize)
            .ok_or(BlockError::UnsupportedDrive(slot))?;
        log::info!("block: slot {} attached ({:?})", slot, device.kind());
        *entry = Some(device);
        Ok(())
    }

    pub fn detach(&mut self, slot: u8) -> Option<Box<dyn BlockDevice>> {
        self.slots.get_mut(slot as usize).and_then(|s| s.take())
    }

    /// Enumerate the controller's four positions and register what answers.
    pub fn probe_ata<P: PortIo + Send + 'static>(&mut self, mut controller: AtaController<P>) -> [DriveKind; MAX_DRIVES] {
        let kinds = controller.enumerate();
        let shared = Arc::new(Mutex::new(controller));

        for (slot, kind) in kinds.iter().enumerate() {
            self.slots[slot] = match kind {
                DriveKind::Unknown => None,
                _ => Some(Box::new(AtaDrive::new(shared.clone(), slot as u8, *kind))),
            };
        }
        kinds
    }

    pub fn report_drives(&self) -> [DriveKind; MAX_DRIVES] {
        let mut kinds = [DriveKind::Unknown; MAX_DRIVES];
        for (kind, slot) in kinds.iter_mut().zip(self.slots.iter()) {
            if let Some(dev) = slot {
                *kind = dev.kind();
            }
        }
        kinds
    }

    pub fn device_mut(&mut self, slot: u8) -> BlockResult<&mut (dyn BlockDevice + 'static)> {
        match self.slots.get_mut(slot as usize) {
            None => Err(BlockError::UnsupportedDrive(slot)),
            Some(None) => Err(BlockError::NoDevice(slot)),
            Some(Some(dev)) => Ok(dev.as_mut()),
        }
    }

    pub fn read_sectors(&mut self, slot: u8, lba: u32, count: u32, buf: &mut [u8]) -> BlockResult<()> {
        self.device_mut(slot)?.read_sectors(lba, count, buf)
    }

    pub fn write_sectors(&mut self, slot: u8, lba: u32, count: u32, buf: &[u8]) -> BlockResult<()> {
        self.device_mut(slot)?.write_sectors(lba, count, buf)
    }

    pub fn max_address(&mut self, slot: u8) -> BlockResult<u32> {
        self.device_mut(slot)?.max_address()
    }
}

impl Default for BlockDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
