use alloc::sync::Arc;
use bit_field::BitField;
use bitflags::bitflags;
use core::fmt;

use super::atapi::IrqCompletion;
use super::port::PortIo;

// ──────────────────────────────────────────────────────────────
//  ATA PIO port offsets (relative to io_base)
// ──────────────────────────────────────────────────────────────

pub(super) const DATA_REG: u16     = 0; // R/W data (16-bit)
pub(super) const FEATURES: u16     = 1; // R: error / W: features
pub(super) const SECTOR_COUNT: u16 = 2;
pub(super) const LBA_LOW: u16      = 3;
pub(super) const LBA_MID: u16      = 4;
pub(super) const LBA_HIGH: u16     = 5;
pub(super) const DRIVE_HEAD: u16   = 6;
pub(super) const CMD_STATUS: u16   = 7; // R: status / W: command

// ATA commands
const CMD_IDENTIFY: u8        = 0xEC;
const CMD_IDENTIFY_PACKET: u8 = 0xA1;
const CMD_READ_SECTORS: u8    = 0x20;
const CMD_WRITE_SECTORS: u8   = 0x30;
const CMD_CACHE_FLUSH: u8     = 0xE7;
const CMD_READ_NATIVE_MAX: u8 = 0xF8;
pub(super) const CMD_PACKET: u8 = 0xA0;

pub const SECTOR_WORDS: usize = 256;

bitflags! {
    /// Status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        const ERR  = 0x01;
        const IDX  = 0x02;
        const CORR = 0x04;
        const DRQ  = 0x08;
        const SRV  = 0x10;
        const DF   = 0x20;
        const RDY  = 0x40;
        const BSY  = 0x80;
    }
}

impl Status {
    fn failed(self) -> bool {
        self.intersects(Status::ERR | Status::DF)
    }
}

// ──────────────────────────────────────────────────────────────
//  Error type
// ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaError {
    DeviceNotFound,
    DeviceFault,
    BusyTimeout,
    DrqTimeout,
    IrqTimeout,
}

impl fmt::Display for AtaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AtaError::DeviceNotFound => write!(f, "Device not found"),
            AtaError::DeviceFault    => write!(f, "Device fault"),
            AtaError::BusyTimeout    => write!(f, "BSY timeout"),
            AtaError::DrqTimeout     => write!(f, "DRQ timeout"),
            AtaError::IrqTimeout     => write!(f, "Completion interrupt timeout"),
        }
    }
}

pub type AtaResult<T> = Result<T, AtaError>;

/// What the LBA mid/high registers say after selecting a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    Ata,
    Atapi,
    Absent,
    Foreign,
}

/// I/O and control port bases of one IDE channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPorts {
    pub io_base: u16,
    pub ctrl_base: u16,
    pub irq: u8,
}

impl ChannelPorts {
    pub const PRIMARY: ChannelPorts = ChannelPorts { io_base: 0x1F0, ctrl_base: 0x3F6, irq: 14 };
    pub const SECONDARY: ChannelPorts = ChannelPorts { io_base: 0x170, ctrl_base: 0x376, irq: 15 };
}

// ──────────────────────────────────────────────────────────────
//  ATA channel
// ──────────────────────────────────────────────────────────────

/// One IDE channel (master + slave) driven through `P`.
pub struct AtaChannel<P: PortIo> {
    ports: P,
    layout: ChannelPorts,
    poll_limit: u32,
    pub(super) completion: Arc<IrqCompletion>,
}

impl<P: PortIo> AtaChannel<P> {
    pub fn new(ports: P, layout: ChannelPorts, poll_limit: u32) -> Self {
        AtaChannel {
            ports,
            layout,
            poll_limit,
            completion: Arc::new(IrqCompletion::new()),
        }
    }

    pub fn layout(&self) -> ChannelPorts {
        self.layout
    }

    pub(super) fn ports_mut(&mut self) -> &mut P {
        &mut self.ports
    }

    // ── Port I/O helpers ─────────────────────────────────────

    pub(super) fn read_reg(&mut self, offset: u16) -> u8 {
        self.ports.read_u8(self.layout.io_base + offset)
    }

    pub(super) fn write_reg(&mut self, offset: u16, val: u8) {
        self.ports.write_u8(self.layout.io_base + offset, val)
    }

    pub(super) fn read_data16(&mut self) -> u16 {
        self.ports.read_u16(self.layout.io_base + DATA_REG)
    }

    pub(super) fn write_data16(&mut self, val: u16) {
        self.ports.write_u16(self.layout.io_base + DATA_REG, val)
    }

    fn read_ctrl(&mut self) -> u8 {
        self.ports.read_u8(self.layout.ctrl_base)
    }

    /// nIEN clear: the device raises IRQs, which the ATAPI path waits on.
    pub fn enable_interrupts(&mut self, enabled: bool) {
        let value = if enabled { 0x00 } else { 0x02 };
        self.ports.write_u8(self.layout.ctrl_base, value);
    }

    pub(super) fn status(&mut self) -> Status {
        Status::from_bits_retain(self.read_reg(CMD_STATUS))
    }

    // ── Status polling ───────────────────────────────────────

    /// Wait until BSY clears and return the settled status.
    pub(super) fn wait_bsy(&mut self) -> AtaResult<Status> {
        for _ in 0..self.poll_limit {
            let status = self.status();
            if !status.contains(Status::BSY) {
                return Ok(status);
            }
            core::hint::spin_loop();
        }
        Err(AtaError::BusyTimeout)
    }

    /// Wait until BSY clears and DRQ or ERR sets.
    pub(super) fn wait_drq(&mut self) -> AtaResult<()> {
        for _ in 0..self.poll_limit {
            let status = self.status();
            if !status.contains(Status::BSY) {
                if status.failed() {
                    return Err(AtaError::DeviceFault);
                }
                if status.contains(Status::DRQ) {
                    return Ok(());
                }
            }
            core::hint::spin_loop();
        }
        Err(AtaError::DrqTimeout)
    }

    /// Perform the 400ns delay by reading the alternate status register 4 times.
    pub(super) fn delay_400ns(&mut self) {
        for _ in 0..4 {
            let _ = self.read_ctrl();
        }
    }

    /// Select master (0) or slave (1) without LBA addressing.
    pub(super) fn select(&mut self, drive: u8) {
        let mut val: u8 = 0xA0;
        val.set_bit(4, drive & 1 == 1);
        self.write_reg(DRIVE_HEAD, val);
        self.delay_400ns();
    }

    /// Drive/head register for LBA28: 1 L 1 DRV followed by LBA bits 24..27.
    fn drive_head(drive: u8, lba: u32) -> u8 {
        let mut val: u8 = 0;
        val.set_bits(0..4, lba.get_bits(24..28) as u8);
        val.set_bit(4, drive & 1 == 1);
        val.set_bit(5, true);
        val.set_bit(6, true);
        val.set_bit(7, true);
        val
    }

    fn program_lba28(&mut self, drive: u8, lba: u32, count: u16) {
        self.write_reg(DRIVE_HEAD, Self::drive_head(drive, lba));
        self.delay_400ns();

        self.write_reg(FEATURES, 0);
        // 256 sectors is encoded as 0
        self.write_reg(SECTOR_COUNT, count as u8);
        self.write_reg(LBA_LOW, lba.get_bits(0..8) as u8);
        self.write_reg(LBA_MID, lba.get_bits(8..16) as u8);
        self.write_reg(LBA_HIGH, lba.get_bits(16..24) as u8);
    }

    // ── Detection ────────────────────────────────────────────

    pub fn signature(&mut self, drive: u8) -> Signature {
        self.select(drive);

        let status = self.read_reg(CMD_STATUS);
        if status == 0 || status == 0xFF {
            return Signature::Absent;
        }

        match (self.read_reg(LBA_MID), self.read_reg(LBA_HIGH)) {
            (0x14, 0xEB) | (0x69, 0x96) => Signature::Atapi,
            (0x00, 0x00) => Signature::Ata,
            _ => Signature::Foreign,
        }
    }

    /// Issue IDENTIFY (or IDENTIFY PACKET) and drain the 256-word reply.
    /// Only presence matters; the payload is discarded.
    pub fn identify(&mut self, drive: u8, packet: bool) -> AtaResult<()> {
        let cmd = if packet { CMD_IDENTIFY_PACKET } else { CMD_IDENTIFY };
        self.write_reg(SECTOR_COUNT, 0);
        self.write_reg(LBA_LOW, 0);
        self.write_reg(CMD_STATUS, cmd);

        if self.read_reg(CMD_STATUS) == 0 {
            return Err(AtaError::DeviceNotFound);
        }

        self.wait_drq()?;

        for _ in 0..SECTOR_WORDS {
            let _ = self.read_data16();
        }
        Ok(())
    }

    // ── READ SECTORS (LBA28) ────────────────────────────────

    /// Read `count` (1..=256) sectors starting at `lba` into `buf`.
    pub fn read_sectors(&mut self, drive: u8, lba: u32, count: u16, buf: &mut [u8]) -> AtaResult<()> {
        self.wait_bsy()?;
        self.program_lba28(drive, lba, count);
        self.write_reg(CMD_STATUS, CMD_READ_SECTORS);

        for sector in buf.chunks_exact_mut(SECTOR_WORDS * 2).take(count as usize) {
            self.wait_drq()?;
            for pair in sector.chunks_exact_mut(2) {
                let word = self.read_data16();
                pair.copy_from_slice(&word.to_le_bytes());
            }
        }

        if self.wait_bsy()?.failed() {
            return Err(AtaError::DeviceFault);
        }
        Ok(())
    }

    // ── WRITE SECTORS (LBA28) ───────────────────────────────

    /// Write `count` (1..=256) sectors and flush the drive cache before returning.
    pub fn write_sectors(&mut self, drive: u8, lba: u32, count: u16, buf: &[u8]) -> AtaResult<()> {
        self.wait_bsy()?;
        self.program_lba28(drive, lba, count);
        self.write_reg(CMD_STATUS, CMD_WRITE_SECTORS);

        for sector in buf.chunks_exact(SECTOR_WORDS * 2).take(count as usize) {
            self.wait_drq()?;
            for pair in sector.chunks_exact(2) {
                self.write_data16(u16::from_le_bytes([pair[0], pair[1]]));
            }
        }

        self.write_reg(CMD_STATUS, CMD_CACHE_FLUSH);
        if self.wait_bsy()?.failed() {
            return Err(AtaError::DeviceFault);
        }
        Ok(())
    }

    // ── READ NATIVE MAX ADDRESS ─────────────────────────────

    /// Highest addressable LBA as reported by the drive.
    pub fn read_native_max(&mut self, drive: u8) -> AtaResult<u32> {
        self.wait_bsy()?;
        self.write_reg(DRIVE_HEAD, Self::drive_head(drive, 0));
        self.delay_400ns();
        self.write_reg(CMD_STATUS, CMD_READ_NATIVE_MAX);

        if self.wait_bsy()?.failed() {
            return Err(AtaError::DeviceFault);
        }

        let mut lba: u32 = 0;
        lba.set_bits(0..8, self.read_reg(LBA_LOW) as u32);
        lba.set_bits(8..16, self.read_reg(LBA_MID) as u32);
        lba.set_bits(16..24, self.read_reg(LBA_HIGH) as u32);
        lba.set_bits(24..28, self.read_reg(DRIVE_HEAD).get_bits(0..4) as u32);
        Ok(lba)
    }
}
