//! Register-level model of one IDE channel, for driving the real protocol
//! code in tests.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use super::atapi::{IrqCompletion, ATAPI_SECTOR_SIZE};
use super::pio::{ChannelPorts, Status};
use super::port::PortIo;
use super::ATA_SECTOR_SIZE;

pub enum SimDevice {
    Ata { image: Vec<u8> },
    Atapi { image: Vec<u8> },
}

impl SimDevice {
    pub fn ata(image: Vec<u8>) -> Self {
        SimDevice::Ata { image }
    }

    pub fn atapi(image: Vec<u8>) -> Self {
        SimDevice::Atapi { image }
    }
}

enum Pending {
    Idle,
    Write { lba: usize, remaining: usize, buf: Vec<u16> },
    Packet { words: Vec<u16> },
}

pub struct SimChannel {
    layout: ChannelPorts,
    devices: [Option<SimDevice>; 2],
    selected: usize,
    sector_count: u8,
    lba: [u8; 3],
    drive_head: u8,
    status: Status,
    error: u8,
    out: VecDeque<u16>,
    bursts: VecDeque<Vec<u16>>,
    pending: Pending,
    irq: Option<Arc<IrqCompletion>>,
    /// Every command byte written, in order.
    pub commands: Vec<u8>,
    /// Fail the next command with ERR|DF.
    pub fail_next_command: bool,
}

impl SimChannel {
    pub fn new(layout: ChannelPorts) -> Self {
        SimChannel {
            layout,
            devices: [None, None],
            selected: 0,
            sector_count: 0,
            lba: [0; 3],
            drive_head: 0,
            status: Status::empty(),
            error: 0,
            out: VecDeque::new(),
            bursts: VecDeque::new(),
            pending: Pending::Idle,
            irq: None,
            commands: Vec::new(),
            fail_next_command: false,
        }
    }

    pub fn with_device(mut self, drive: usize, device: SimDevice) -> Self {
        self.devices[drive] = Some(device);
        self
    }

    pub fn connect_irq(&mut self, line: Arc<IrqCompletion>) {
        self.irq = Some(line);
    }

    fn raise_irq(&self) {
        if let Some(line) = &self.irq {
            line.signal();
        }
    }

    fn present(&self) -> bool {
        self.devices[self.selected].is_some()
    }

    fn lba28(&self) -> usize {
        (self.drive_head as usize & 0x0F) << 24
            | (self.lba[2] as usize) << 16
            | (self.lba[1] as usize) << 8
            | self.lba[0] as usize
    }

    fn sectors_requested(&self) -> usize {
        if self.sector_count == 0 { 256 } else { self.sector_count as usize }
    }

    fn fail(&mut self) {
        self.status = Status::RDY | Status::ERR;
        self.error = 0x04; // ABRT
    }

    fn select(&mut self, value: u8) {
        self.drive_head = value;
        self.selected = ((value >> 4) & 1) as usize;
        let (mid, hi) = match &self.devices[self.selected] {
            Some(SimDevice::Atapi { .. }) => (0x14, 0xEB),
            _ => (0x00, 0x00),
        };
        self.lba[1] = mid;
        self.lba[2] = hi;
        self.status = if self.present() { Status::RDY } else { Status::empty() };
    }

    fn execute(&mut self, cmd: u8) {
        self.commands.push(cmd);
        self.out.clear();
        self.bursts.clear();
        self.pending = Pending::Idle;
        self.error = 0;

        if !self.present() {
            self.status = Status::empty();
            return;
        }
        if self.fail_next_command {
            self.fail_next_command = false;
            self.status = Status::RDY | Status::ERR | Status::DF;
            return;
        }

        let lba = self.lba28();
        let count = self.sectors_requested();
        let is_atapi = matches!(self.devices[self.selected], Some(SimDevice::Atapi { .. }));

        match (is_atapi, cmd) {
            (false, 0xEC) | (true, 0xA1) => {
                self.out.extend(core::iter::repeat(0u16).take(256));
                self.status = Status::RDY | Status::DRQ;
            }
            (false, 0x20) => {
                let Some(SimDevice::Ata { image }) = &self.devices[self.selected] else { return };
                let start = lba * ATA_SECTOR_SIZE;
                let end = start + count * ATA_SECTOR_SIZE;
                if end > image.len() {
                    self.fail();
                    return;
                }
                let words: Vec<u16> = image[start..end]
                    .chunks_exact(2)
                    .map(|p| u16::from_le_bytes([p[0], p[1]]))
                    .collect();
                self.out.extend(words);
                self.status = Status::RDY | Status::DRQ;
            }
            (false, 0x30) => {
                self.pending = Pending::Write { lba, remaining: count * ATA_SECTOR_SIZE / 2, buf: Vec::new() };
                self.status = Status::RDY | Status::DRQ;
            }
            (false, 0xE7) => self.status = Status::RDY,
            (false, 0xF8) => {
                let Some(SimDevice::Ata { image }) = &self.devices[self.selected] else { return };
                let max = (image.len() / ATA_SECTOR_SIZE).saturating_sub(1);
                self.lba = [max as u8, (max >> 8) as u8, (max >> 16) as u8];
                self.drive_head = (self.drive_head & 0xF0) | ((max >> 24) as u8 & 0x0F);
                self.status = Status::RDY;
            }
            (true, 0xA0) => {
                self.pending = Pending::Packet { words: Vec::new() };
                self.status = Status::RDY | Status::DRQ;
            }
            _ => self.fail(),
        }
    }

    fn run_packet(&mut self, words: &[u16]) {
        let packet: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let Some(SimDevice::Atapi { image }) = &self.devices[self.selected] else { return };

        let payload: Vec<u8> = match packet[0] {
            0x25 => {
                let last = (image.len() / ATAPI_SECTOR_SIZE).saturating_sub(1) as u32;
                let mut reply = vec![0u8; 8];
                reply[0..4].copy_from_slice(&last.to_be_bytes());
                reply[4..8].copy_from_slice(&(ATAPI_SECTOR_SIZE as u32).to_be_bytes());
                reply
            }
            0xA8 => {
                let lba = u32::from_be_bytes([packet[2], packet[3], packet[4], packet[5]]) as usize;
                let count = u32::from_be_bytes([packet[6], packet[7], packet[8], packet[9]]) as usize;
                let start = lba * ATAPI_SECTOR_SIZE;
                let end = start + count * ATAPI_SECTOR_SIZE;
                if end > image.len() {
                    self.fail();
                    self.raise_irq();
                    return;
                }
                image[start..end].to_vec()
            }
            _ => {
                self.fail();
                self.raise_irq();
                return;
            }
        };

        for chunk in payload.chunks(ATAPI_SECTOR_SIZE) {
            self.bursts.push_back(
                chunk.chunks(2).map(|p| u16::from_le_bytes([p[0], *p.get(1).unwrap_or(&0)])).collect(),
            );
        }
        self.next_burst();
    }

    /// Load the next data burst or finish the command, then interrupt.
    fn next_burst(&mut self) {
        match self.bursts.pop_front() {
            Some(burst) => {
                let bytes = burst.len() * 2;
                self.lba[1] = bytes as u8;
                self.lba[2] = (bytes >> 8) as u8;
                self.out.extend(burst);
                self.status = Status::RDY | Status::DRQ;
            }
            None => self.status = Status::RDY,
        }
        self.raise_irq();
    }

    fn data_drained(&mut self) {
        let is_atapi = matches!(self.devices[self.selected], Some(SimDevice::Atapi { .. }));
        if is_atapi && matches!(self.pending, Pending::Idle) && self.commands.last() == Some(&0xA0) {
            self.next_burst();
        } else {
            self.status = Status::RDY;
        }
    }
}

impl PortIo for SimChannel {
    fn read_u8(&mut self, port: u16) -> u8 {
        if port == self.layout.ctrl_base {
            return if self.present() { self.status.bits() } else { 0 };
        }
        match port.wrapping_sub(self.layout.io_base) {
            1 => self.error,
            2 => self.sector_count,
            3 => self.lba[0],
            4 => self.lba[1],
            5 => self.lba[2],
            6 => self.drive_head,
            7 => if self.present() { self.status.bits() } else { 0 },
            _ => 0xFF,
        }
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        if port == self.layout.ctrl_base {
            return;
        }
        match port.wrapping_sub(self.layout.io_base) {
            2 => self.sector_count = value,
            3 => self.lba[0] = value,
            4 => self.lba[1] = value,
            5 => self.lba[2] = value,
            6 => self.select(value),
            7 => self.execute(value),
            _ => {}
        }
    }

    fn read_u16(&mut self, port: u16) -> u16 {
        if port != self.layout.io_base {
            return 0xFFFF;
        }
        match self.out.pop_front() {
            Some(word) => {
                if self.out.is_empty() {
                    self.data_drained();
                }
                word
            }
            None => 0,
        }
    }

    fn write_u16(&mut self, port: u16, value: u16) {
        if port != self.layout.io_base {
            return;
        }
        match core::mem::replace(&mut self.pending, Pending::Idle) {
            Pending::Write { lba, remaining, mut buf } => {
                buf.push(value);
                if buf.len() < remaining {
                    self.pending = Pending::Write { lba, remaining, buf };
                    return;
                }
                if let Some(SimDevice::Ata { image }) = &mut self.devices[self.selected] {
                    let start = lba * ATA_SECTOR_SIZE;
                    for (i, word) in buf.iter().enumerate() {
                        image[start + i * 2..start + i * 2 + 2].copy_from_slice(&word.to_le_bytes());
                    }
                }
                self.status = Status::RDY;
            }
            Pending::Packet { mut words } => {
                words.push(value);
                if words.len() < 6 {
                    self.pending = Pending::Packet { words };
                    return;
                }
                self.status = Status::RDY;
                self.run_packet(&words);
            }
            Pending::Idle => {}
        }
    }
}
