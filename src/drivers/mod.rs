pub mod ata;
pub mod block;
pub mod ramdisk;
