//! ATAPI PACKET protocol. Completion is interrupt driven: the IRQ handler
//! calls [`IrqCompletion::signal`] and the issuing path waits on it.

use core::sync::atomic::{AtomicBool, Ordering};

use super::pio::{
    AtaChannel, AtaError, AtaResult, Status, CMD_PACKET, CMD_STATUS, FEATURES, LBA_HIGH, LBA_MID,
};
use super::port::PortIo;

pub const ATAPI_SECTOR_SIZE: usize = 2048;

const SCSI_READ_CAPACITY: u8 = 0x25;
const SCSI_READ_12: u8 = 0xA8;

/// One-shot completion flag shared between the driver and the IRQ handler.
#[derive(Debug, Default)]
pub struct IrqCompletion {
    fired: AtomicBool,
}

impl IrqCompletion {
    pub const fn new() -> Self {
        IrqCompletion { fired: AtomicBool::new(false) }
    }

    /// Called from interrupt context.
    pub fn signal(&self) {
        self.fired.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.fired.store(false, Ordering::Release);
    }

    pub fn is_signalled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Consume one signal, giving up after `spins` polls.
    pub fn wait(&self, spins: u32) -> AtaResult<()> {
        for _ in 0..spins {
            if self
                .fired
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(AtaError::IrqTimeout)
    }
}

fn read12_packet(lba: u32, count: u32) -> [u8; 12] {
    let mut packet = [0u8; 12];
    packet[0] = SCSI_READ_12;
    packet[2..6].copy_from_slice(&lba.to_be_bytes());
    packet[6..10].copy_from_slice(&count.to_be_bytes());
    packet
}

fn read_capacity_packet() -> [u8; 12] {
    let mut packet = [0u8; 12];
    packet[0] = SCSI_READ_CAPACITY;
    packet
}

impl<P: PortIo> AtaChannel<P> {
    /// Send a 12-byte packet and collect the data-in phase into `buf`.
    ///
    /// The device reports each burst's size in LBA mid/high and raises an
    /// interrupt before each burst. Bytes beyond `buf` are drained and dropped.
    pub fn packet_in(&mut self, drive: u8, packet: &[u8; 12], buf: &mut [u8], irq_spins: u32) -> AtaResult<usize> {
        self.completion.reset();
        self.wait_bsy()?;
        self.select(drive);

        // PIO data transfer, max burst in LBA mid/high
        let max_burst = ATAPI_SECTOR_SIZE as u16;
        self.write_reg(FEATURES, 0);
        self.write_reg(LBA_MID, (max_burst & 0xFF) as u8);
        self.write_reg(LBA_HIGH, (max_burst >> 8) as u8);
        self.write_reg(CMD_STATUS, CMD_PACKET);

        self.wait_drq()?;
        for pair in packet.chunks_exact(2) {
            self.write_data16(u16::from_le_bytes([pair[0], pair[1]]));
        }

        let mut offset = 0;
        while offset < buf.len() {
            self.completion.wait(irq_spins)?;

            let status = self.status();
            if status.intersects(Status::ERR | Status::DF) {
                return Err(AtaError::DeviceFault);
            }
            if !status.contains(Status::DRQ) {
                break;
            }

            let bytes = self.read_reg(LBA_MID) as usize | (self.read_reg(LBA_HIGH) as usize) << 8;
            if bytes == 0 {
                return Err(AtaError::DeviceFault);
            }

            for _ in 0..bytes.div_ceil(2) {
                let word = self.read_data16().to_le_bytes();
                for byte in word {
                    if offset < buf.len() {
                        buf[offset] = byte;
                    }
                    offset += 1;
                }
            }
        }

        if self.wait_bsy()?.intersects(Status::ERR | Status::DF) {
            return Err(AtaError::DeviceFault);
        }
        Ok(offset.min(buf.len()))
    }

    /// READ CAPACITY(10): last addressable LBA and block length.
    pub fn read_capacity(&mut self, drive: u8, irq_spins: u32) -> AtaResult<(u32, u32)> {
        let mut reply = [0u8; 8];
        let got = self.packet_in(drive, &read_capacity_packet(), &mut reply, irq_spins)?;
        if got < reply.len() {
            return Err(AtaError::DeviceFault);
        }
        let last_lba = u32::from_be_bytes([reply[0], reply[1], reply[2], reply[3]]);
        let block_len = u32::from_be_bytes([reply[4], reply[5], reply[6], reply[7]]);
        Ok((last_lba, block_len))
    }

    /// READ(12) of `count` 2048-byte sectors.
    pub fn read12(&mut self, drive: u8, lba: u32, count: u32, buf: &mut [u8], irq_spins: u32) -> AtaResult<()> {
        let want = count as usize * ATAPI_SECTOR_SIZE;
        let got = self.packet_in(drive, &read12_packet(lba, count), &mut buf[..want], irq_spins)?;
        if got < want {
            return Err(AtaError::DeviceFault);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_consumed_by_wait() {
        let irq = IrqCompletion::new();
        irq.signal();
        assert!(irq.is_signalled());
        assert_eq!(irq.wait(10), Ok(()));
        assert_eq!(irq.wait(10), Err(AtaError::IrqTimeout));
    }

    #[test]
    fn reset_discards_stale_signal() {
        let irq = IrqCompletion::new();
        irq.signal();
        irq.reset();
        assert_eq!(irq.wait(5), Err(AtaError::IrqTimeout));
    }

    #[test]
    fn read12_packet_is_big_endian() {
        let p = read12_packet(0x0102_0304, 2);
        assert_eq!(p[0], 0xA8);
        assert_eq!(&p[2..6], &[1, 2, 3, 4]);
        assert_eq!(&p[6..10], &[0, 0, 0, 2]);
    }
}
