use core::fmt;

use crate::drivers::block::BlockError;

/// Filesystem error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    ReadOnly,
    InvalidPath,
    NoSpace,
    NotMounted,
    Unsupported,
    OutOfMemory,
    OutOfRange,
    /// Chain link that is free, reserved, out of range or loops.
    CorruptChain(u32),
    Block(BlockError),
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "No such file or directory"),
            FsError::AlreadyExists => write!(f, "File exists"),
            FsError::NotADirectory => write!(f, "Not a directory"),
            FsError::IsADirectory => write!(f, "Is a directory"),
            FsError::DirectoryNotEmpty => write!(f, "Directory not empty"),
            FsError::ReadOnly => write!(f, "File is read-only"),
            FsError::InvalidPath => write!(f, "Invalid path"),
            FsError::NoSpace => write!(f, "No space left"),
            FsError::NotMounted => write!(f, "Volume not mounted"),
            FsError::Unsupported => write!(f, "Unsupported volume or operation"),
            FsError::OutOfMemory => write!(f, "Out of memory"),
            FsError::OutOfRange => write!(f, "Out of range"),
            FsError::CorruptChain(c) => write!(f, "Corrupt cluster chain at {:#x}", c),
            FsError::Block(e) => write!(f, "Block device: {}", e),
        }
    }
}

impl From<BlockError> for FsError {
    fn from(e: BlockError) -> Self {
        FsError::Block(e)
    }
}

pub type FsResult<T> = Result<T, FsError>;
