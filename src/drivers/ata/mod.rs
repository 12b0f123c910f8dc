pub mod atapi;
pub mod pio;
pub mod port;
#[cfg(test)]
pub(crate) mod sim;

use alloc::sync::Arc;
use spin::Mutex;

use crate::config::StorageConfig;
use crate::drivers::block::{check_transfer, BlockDevice, BlockError, BlockResult};
use atapi::{IrqCompletion, ATAPI_SECTOR_SIZE};
use pio::{AtaChannel, ChannelPorts, Signature};
use port::PortIo;

pub const MAX_DRIVES: usize = 4;
pub const ATA_SECTOR_SIZE: usize = 512;

/// Sectors one PIO command can move (sector count register 0 means 256).
const MAX_PIO_SECTORS: u32 = 256;
const LBA28_LIMIT: u32 = 1 << 28;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveKind {
    Unknown = 0,
    Ata = 1,
    Atapi = 2,
}

impl DriveKind {
    pub fn sector_size(self) -> usize {
        match self {
            DriveKind::Atapi => ATAPI_SECTOR_SIZE,
            _ => ATA_SECTOR_SIZE,
        }
    }
}

/// What enumeration learned about one drive position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveSlot {
    pub kind: DriveKind,
    pub sector_size: usize,
    /// `None` when the capacity could not be read (e.g. no medium).
    pub max_lba: Option<u32>,
}

impl DriveSlot {
    const EMPTY: DriveSlot = DriveSlot { kind: DriveKind::Unknown, sector_size: ATA_SECTOR_SIZE, max_lba: None };
}

/// Both IDE channels and the four drive positions behind them.
pub struct AtaController<P: PortIo> {
    channels: [AtaChannel<P>; 2],
    slots: [DriveSlot; MAX_DRIVES],
    irq_timeout_spins: u32,
}

#[cfg(target_arch = "x86_64")]
impl AtaController<port::X86Ports> {
    /// Controller on the legacy ISA ports.
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_channels(port::X86Ports, port::X86Ports, config)
    }
}

impl<P: PortIo> AtaController<P> {
    pub fn with_channels(primary: P, secondary: P, config: &StorageConfig) -> Self {
        AtaController {
            channels: [
                AtaChannel::new(primary, ChannelPorts::PRIMARY, config.poll_limit),
                AtaChannel::new(secondary, ChannelPorts::SECONDARY, config.poll_limit),
            ],
            slots: [DriveSlot::EMPTY; MAX_DRIVES],
            irq_timeout_spins: config.irq_timeout_spins,
        }
    }

    /// Completion signal the IRQ handler for `channel` (0 or 1) must raise.
    pub fn irq_line(&self, channel: usize) -> Option<Arc<IrqCompletion>> {
        self.channels.get(channel).map(|c| c.completion.clone())
    }

    #[cfg(test)]
    pub(crate) fn channel_ports(&mut self, channel: usize) -> &mut P {
        self.channels[channel].ports_mut()
    }

    fn locate(slot: u8) -> BlockResult<(usize, u8)> {
        if slot as usize >= MAX_DRIVES {
            return Err(BlockError::UnsupportedDrive(slot));
        }
        Ok(((slot / 2) as usize, slot % 2))
    }

    pub fn slot(&self, slot: u8) -> BlockResult<DriveSlot> {
        Self::locate(slot)?;
        let info = self.slots[slot as usize];
        if info.kind == DriveKind::Unknown {
            return Err(BlockError::NoDevice(slot));
        }
        Ok(info)
    }

    /// Probe one position. Anything that fails IDENTIFY is `Unknown`.
    pub fn detect(&mut self, slot: u8) -> DriveKind {
        let Ok((ch, drive)) = Self::locate(slot) else {
            return DriveKind::Unknown;
        };
        let channel = &mut self.channels[ch];

        match channel.signature(drive) {
            Signature::Ata => match channel.identify(drive, false) {
                Ok(()) => DriveKind::Ata,
                Err(e) => {
                    log::warn!("ata: slot {} IDENTIFY failed: {}", slot, e);
                    DriveKind::Unknown
                }
            },
            Signature::Atapi => match channel.identify(drive, true) {
                Ok(()) => DriveKind::Atapi,
                Err(e) => {
                    log::warn!("ata: slot {} IDENTIFY PACKET failed: {}", slot, e);
                    DriveKind::Unknown
                }
            },
            Signature::Foreign => {
                log::debug!("ata: slot {} has an unrecognised signature", slot);
                DriveKind::Unknown
            }
            Signature::Absent => DriveKind::Unknown,
        }
    }

    /// Detect all four positions and record kind, sector size and capacity.
    pub fn enumerate(&mut self) -> [DriveKind; MAX_DRIVES] {
        let mut kinds = [DriveKind::Unknown; MAX_DRIVES];
        for slot in 0..MAX_DRIVES as u8 {
            let kind = self.detect(slot);
            self.slots[slot as usize] = DriveSlot { kind, sector_size: kind.sector_size(), max_lba: None };

            if kind != DriveKind::Unknown {
                let max_lba = match self.max_address(slot) {
                    Ok(max) => Some(max),
                    Err(e) => {
                        log::warn!("ata: slot {} capacity unavailable: {}", slot, e);
                        None
                    }
                };
                self.slots[slot as usize].max_lba = max_lba;
                log::info!("ata: slot {} is {:?}, max lba {:?}", slot, kind, max_lba);
            }
            kinds[slot as usize] = kind;
        }
        kinds
    }

    /// READ NATIVE MAX for ATA, READ CAPACITY for ATAPI.
    pub fn max_address(&mut self, slot: u8) -> BlockResult<u32> {
        let info = self.slot(slot)?;
        let (ch, drive) = Self::locate(slot)?;
        let channel = &mut self.channels[ch];
        match info.kind {
            DriveKind::Ata => Ok(channel.read_native_max(drive)?),
            DriveKind::Atapi => Ok(channel.read_capacity(drive, self.irq_timeout_spins)?.0),
            DriveKind::Unknown => Err(BlockError::NoDevice(slot)),
        }
    }

    pub fn read_sectors(&mut self, slot: u8, lba: u32, count: u32, buf: &mut [u8]) -> BlockResult<()> {
        let info = self.slot(slot)?;
        check_transfer(lba, count, info.sector_size, buf.len(), info.max_lba)?;
        if count == 0 {
            return Ok(());
        }
        let (ch, drive) = Self::locate(slot)?;
        let channel = &mut self.channels[ch];
        log::trace!("ata: read slot {} lba {} count {}", slot, lba, count);

        match info.kind {
            DriveKind::Ata => {
                if lba + (count - 1) >= LBA28_LIMIT {
                    return Err(BlockError::OutOfRange);
                }
                let mut done = 0;
                while done < count {
                    let n = (count - done).min(MAX_PIO_SECTORS);
                    let start = done as usize * ATA_SECTOR_SIZE;
                    let end = start + n as usize * ATA_SECTOR_SIZE;
                    channel.read_sectors(drive, lba + done, n as u16, &mut buf[start..end])?;
                    done += n;
                }
                Ok(())
            }
            DriveKind::Atapi => Ok(channel.read12(drive, lba, count, buf, self.irq_timeout_spins)?),
            DriveKind::Unknown => Err(BlockError::NoDevice(slot)),
        }
    }

    pub fn write_sectors(&mut self, slot: u8, lba: u32, count: u32, buf: &[u8]) -> BlockResult<()> {
        let info = self.slot(slot)?;
        if info.kind == DriveKind::Atapi {
            return Err(BlockError::ReadOnly);
        }
        check_transfer(lba, count, info.sector_size, buf.len(), info.max_lba)?;
        if count == 0 {
            return Ok(());
        }
        if lba + (count - 1) >= LBA28_LIMIT {
            return Err(BlockError::OutOfRange);
        }
        let (ch, drive) = Self::locate(slot)?;
        let channel = &mut self.channels[ch];
        log::trace!("ata: write slot {} lba {} count {}", slot, lba, count);

        let mut done = 0;
        while done < count {
            let n = (count - done).min(MAX_PIO_SECTORS);
            let start = done as usize * ATA_SECTOR_SIZE;
            let end = start + n as usize * ATA_SECTOR_SIZE;
            channel.write_sectors(drive, lba + done, n as u16, &buf[start..end])?;
            done += n;
        }
        Ok(())
    }

    /// Clear nIEN on both channels so completions raise IRQ 14/15.
    pub fn enable_interrupts(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.enable_interrupts(true);
        }
    }
}

/// One enumerated drive, sharing its controller with the other slots.
pub struct AtaDrive<P: PortIo> {
    controller: Arc<Mutex<AtaController<P>>>,
    slot: u8,
    kind: DriveKind,
}

impl<P: PortIo> AtaDrive<P> {
    pub fn new(controller: Arc<Mutex<AtaController<P>>>, slot: u8, kind: DriveKind) -> Self {
        AtaDrive { controller, slot, kind }
    }
}

impl<P: PortIo + Send> BlockDevice for AtaDrive<P> {
    fn kind(&self) -> DriveKind {
        self.kind
    }

    fn sector_size(&self) -> usize {
        self.kind.sector_size()
    }

    fn read_sectors(&mut self, lba: u32, count: u32, buf: &mut [u8]) -> BlockResult<()> {
        self.controller.lock().read_sectors(self.slot, lba, count, buf)
    }

    fn write_sectors(&mut self, lba: u32, count: u32, buf: &[u8]) -> BlockResult<()> {
        self.controller.lock().write_sectors(self.slot, lba, count, buf)
    }

    fn max_address(&mut self) -> BlockResult<u32> {
        self.controller.lock().max_address(self.slot)
    }
}
