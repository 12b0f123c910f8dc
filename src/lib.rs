//! AtomicOS storage: ATA/ATAPI block driver, FAT32 filesystem and the
//! command-packet layer the kernel's driver dispatch talks to.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod command;
pub mod config;
pub mod drivers;
pub mod fs;
pub mod serial;
pub mod storage;

pub use config::StorageConfig;
pub use storage::{StorageStack, STORAGE};
