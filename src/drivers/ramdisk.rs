//! Memory-backed block device. Used by tests and for scratch volumes.

use alloc::vec;
use alloc::vec::Vec;

use super::ata::DriveKind;
use super::block::{check_transfer, BlockDevice, BlockError, BlockResult};

pub const RAMDISK_SECTOR_SIZE: usize = 512;

pub struct RamDisk {
    data: Vec<u8>,
    sector_size: usize,
    read_only: bool,
    /// Remaining successful write calls before every write fails.
    writes_left: Option<usize>,
    /// Successful write calls before a single failing one.
    fail_once_after: Option<usize>,
}

impl RamDisk {
    pub fn new(sectors: u32) -> Self {
        Self::with_sector_size(sectors, RAMDISK_SECTOR_SIZE)
    }

    pub fn with_sector_size(sectors: u32, sector_size: usize) -> Self {
        RamDisk {
            data: vec![0; sectors as usize * sector_size],
            sector_size,
            read_only: false,
            writes_left: None,
            fail_once_after: None,
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Let `n` more write calls succeed, then fail with `BlockError::Io`.
    pub fn fail_writes_after(&mut self, n: usize) {
        self.writes_left = Some(n);
    }

    /// Let `n` more write calls succeed, fail the next one, then recover.
    pub fn fail_write_once(&mut self, n: usize) {
        self.fail_once_after = Some(n);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn sectors(&self) -> u32 {
        (self.data.len() / self.sector_size) as u32
    }

    fn span(&self, lba: u32, count: u32) -> core::ops::Range<usize> {
        let start = lba as usize * self.sector_size;
        start..start + count as usize * self.sector_size
    }
}

impl BlockDevice for RamDisk {
    fn kind(&self) -> DriveKind {
        DriveKind::Ata
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sectors(&mut self, lba: u32, count: u32, buf: &mut [u8]) -> BlockResult<()> {
        check_transfer(lba, count, self.sector_size, buf.len(), self.sectors().checked_sub(1))?;
        let span = self.span(lba, count);
        let len = span.len();
        buf[..len].copy_from_slice(&self.data[span]);
        Ok(())
    }

    fn write_sectors(&mut self, lba: u32, count: u32, buf: &[u8]) -> BlockResult<()> {
        if self.read_only {
            return Err(BlockError::ReadOnly);
        }
        check_transfer(lba, count, self.sector_size, buf.len(), self.sectors().checked_sub(1))?;
        if let Some(left) = self.writes_left.as_mut() {
            if *left == 0 {
                return Err(BlockError::Io);
            }
            *left -= 1;
        }
        match self.fail_once_after {
            Some(0) => {
                self.fail_once_after = None;
                return Err(BlockError::Io);
            }
            Some(n) => self.fail_once_after = Some(n - 1),
            None => {}
        }
        let span = self.span(lba, count);
        let len = span.len();
        self.data[span].copy_from_slice(&buf[..len]);
        Ok(())
    }

    fn max_address(&mut self) -> BlockResult<u32> {
        self.sectors().checked_sub(1).ok_or(BlockError::OutOfRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_back_what_was_written() {
        let mut disk = RamDisk::new(4);
        let mut data = [0u8; 1024];
        data[0] = 1;
        data[1023] = 2;
        disk.write_sectors(2, 2, &data).unwrap();

        let mut back = [0u8; 1024];
        disk.read_sectors(2, 2, &mut back).unwrap();
        assert_eq!(back[0], 1);
        assert_eq!(back[1023], 2);
        assert_eq!(disk.as_bytes()[1024], 1);
    }

    #[test]
    fn past_end_is_out_of_range() {
        let mut disk = RamDisk::new(4);
        let mut buf = [0u8; 1024];
        assert_eq!(disk.read_sectors(3, 2, &mut buf), Err(BlockError::OutOfRange));
    }

    #[test]
    fn write_faults_are_injected() {
        let mut disk = RamDisk::new(4);
        let data = [0u8; 512];
        disk.fail_writes_after(1);
        assert!(disk.write_sectors(0, 1, &data).is_ok());
        assert_eq!(disk.write_sectors(1, 1, &data), Err(BlockError::Io));

        let mut disk = RamDisk::new(4);
        disk.fail_write_once(1);
        assert!(disk.write_sectors(0, 1, &data).is_ok());
        assert_eq!(disk.write_sectors(1, 1, &data), Err(BlockError::Io));
        assert!(disk.write_sectors(1, 1, &data).is_ok());

        disk.set_read_only(true);
        assert_eq!(disk.write_sectors(0, 1, &data), Err(BlockError::ReadOnly));
    }
}
