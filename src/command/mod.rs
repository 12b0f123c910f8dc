//! Command packets: the five-word boundary between the kernel's driver
//! dispatch and the storage stack.
//!
//! ```text
//! [command, p1, p2, p3, p4]     p4 always holds the ErrorCode on return
//! ```

pub mod block;
pub mod fs;

use alloc::boxed::Box;
use core::ffi::{c_char, CStr};

use crate::drivers::block::BlockError;
use crate::fs::error::FsError;
use crate::storage::STORAGE;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandPacket {
    pub command: u64,
    pub params: [u64; 4],
}

impl CommandPacket {
    pub const fn new(command: u64, params: [u64; 4]) -> Self {
        CommandPacket { command, params }
    }

    pub fn error(&self) -> u64 {
        self.params[3]
    }

    fn finish(&mut self, result: Result<(), ErrorCode>) {
        self.params[3] = match result {
            Ok(()) => ErrorCode::Success,
            Err(code) => code,
        } as u64;
    }
}

/// Numeric result written into the last word of every packet.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    UnsupportedDrive = 1,
    DriveError = 2,
    FileNotFound = 3,
    FileReadOnly = 4,
    FileExists = 5,
    NoSpace = 6,
    OutOfMemory = 7,
    OutOfRange = 8,
    Unsupported = 9,
    InvalidArgument = 10,
}

impl From<&BlockError> for ErrorCode {
    fn from(e: &BlockError) -> Self {
        match e {
            BlockError::UnsupportedDrive(_) | BlockError::NoDevice(_) => ErrorCode::UnsupportedDrive,
            BlockError::ReadOnly => ErrorCode::Unsupported,
            BlockError::OutOfRange => ErrorCode::OutOfRange,
            BlockError::BufferTooSmall => ErrorCode::InvalidArgument,
            BlockError::Ata(_) | BlockError::Io => ErrorCode::DriveError,
        }
    }
}

impl From<&FsError> for ErrorCode {
    fn from(e: &FsError) -> Self {
        match e {
            FsError::NotFound | FsError::NotADirectory => ErrorCode::FileNotFound,
            FsError::AlreadyExists => ErrorCode::FileExists,
            FsError::ReadOnly => ErrorCode::FileReadOnly,
            FsError::NoSpace => ErrorCode::NoSpace,
            FsError::InvalidPath => ErrorCode::InvalidArgument,
            FsError::IsADirectory
            | FsError::DirectoryNotEmpty
            | FsError::Unsupported
            | FsError::NotMounted => ErrorCode::Unsupported,
            FsError::OutOfMemory => ErrorCode::OutOfMemory,
            FsError::OutOfRange | FsError::CorruptChain(_) => ErrorCode::OutOfRange,
            FsError::Block(b) => ErrorCode::from(b),
        }
    }
}

impl From<BlockError> for ErrorCode {
    fn from(e: BlockError) -> Self {
        ErrorCode::from(&e)
    }
}

impl From<FsError> for ErrorCode {
    fn from(e: FsError) -> Self {
        ErrorCode::from(&e)
    }
}

// ── Caller memory ───────────────────────────────────────────

/// NUL-terminated UTF-8 string at `ptr`.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn c_str<'a>(ptr: u64) -> Result<&'a str, ErrorCode> {
    if ptr == 0 {
        return Err(ErrorCode::InvalidArgument);
    }
    CStr::from_ptr(ptr as *const c_char)
        .to_str()
        .map_err(|_| ErrorCode::InvalidArgument)
}

fn narrow<T: TryFrom<u64>>(value: u64, code: ErrorCode) -> Result<T, ErrorCode> {
    T::try_from(value).map_err(|_| code)
}

/// Hand a buffer to the caller. Returns `(ptr, len)`.
fn leak_buffer<T>(data: alloc::vec::Vec<T>) -> (u64, u64) {
    let len = data.len();
    let ptr = Box::into_raw(data.into_boxed_slice()) as *mut T;
    (ptr as u64, len as u64)
}

/// Free a buffer returned by `fs::READ`.
///
/// # Safety
/// `ptr`/`len` must be exactly what a READ packet returned, released once.
pub unsafe fn release_buffer(ptr: u64, len: u64) {
    if ptr != 0 {
        drop(Box::from_raw(core::ptr::slice_from_raw_parts_mut(ptr as *mut u8, len as usize)));
    }
}

/// Free the records returned by `fs::LIST_DIR`.
///
/// # Safety
/// `ptr`/`count` must be exactly what a LIST_DIR packet returned, released once.
pub unsafe fn release_records(ptr: u64, count: u64) {
    if ptr != 0 {
        drop(Box::from_raw(core::ptr::slice_from_raw_parts_mut(
            ptr as *mut fs::FileInfoRecord,
            count as usize,
        )));
    }
}

// ── Entry points ────────────────────────────────────────────

/// Run a block-driver packet against the kernel-wide stack.
///
/// # Safety
/// Pointers carried in the packet must be valid for the command (see `block`).
pub unsafe fn block_command(packet: &mut CommandPacket) {
    let mut storage = STORAGE.lock();
    block::dispatch(&mut storage, packet);
}

/// Run a filesystem packet against the kernel-wide stack.
///
/// # Safety
/// Pointers carried in the packet must be valid for the command (see `fs`).
pub unsafe fn fs_command(packet: &mut CommandPacket) {
    let mut storage = STORAGE.lock();
    fs::dispatch(&mut storage, packet);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ata::pio::AtaError;

    #[test]
    fn every_error_has_a_code() {
        assert_eq!(ErrorCode::from(FsError::NotFound), ErrorCode::FileNotFound);
        assert_eq!(ErrorCode::from(FsError::DirectoryNotEmpty), ErrorCode::Unsupported);
        assert_eq!(ErrorCode::from(FsError::CorruptChain(9)), ErrorCode::OutOfRange);
        assert_eq!(
            ErrorCode::from(FsError::Block(BlockError::Ata(AtaError::DeviceFault))),
            ErrorCode::DriveError
        );
        assert_eq!(ErrorCode::from(BlockError::UnsupportedDrive(4)), ErrorCode::UnsupportedDrive);
        assert_eq!(ErrorCode::from(BlockError::ReadOnly), ErrorCode::Unsupported);
        assert_eq!(ErrorCode::InvalidArgument as u64, 10);
    }

    #[test]
    fn finish_writes_last_word() {
        let mut packet = CommandPacket::new(1, [7, 8, 9, 99]);
        packet.finish(Err(ErrorCode::NoSpace));
        assert_eq!(packet.params, [7, 8, 9, 6]);
        packet.finish(Ok(()));
        assert_eq!(packet.error(), 0);
    }

    #[test]
    fn paths_must_be_utf8_and_non_null() {
        let good = b"/A.TXT\0";
        let bad = [0xFFu8, 0xFE, 0];
        unsafe {
            assert_eq!(c_str(good.as_ptr() as u64), Ok("/A.TXT"));
            assert_eq!(c_str(bad.as_ptr() as u64), Err(ErrorCode::InvalidArgument));
            assert_eq!(c_str(0), Err(ErrorCode::InvalidArgument));
        }
    }
}
