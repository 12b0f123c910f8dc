use log::LevelFilter;

/// Tunables for the storage stack.
///
/// Passed by value into the controller and the filesystem context; nothing
/// reads configuration from a global.
#[derive(Debug, Clone, Copy)]
pub struct StorageConfig {
    /// Iterations spent polling the status register for BSY/DRQ.
    pub poll_limit: u32,
    /// Spins spent waiting for an ATAPI completion interrupt.
    pub irq_timeout_spins: u32,
    /// Capacity of the mounted-volume table.
    pub max_volumes: usize,
    /// First cluster the linear allocator looks at.
    pub first_free_hint: u32,
    pub log_level: LevelFilter,
}

impl StorageConfig {
    pub const fn new() -> Self {
        StorageConfig {
            poll_limit: 100_000,
            irq_timeout_spins: 1_000_000,
            max_volumes: 32,
            first_free_hint: 3,
            log_level: LevelFilter::Info,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new()
    }
}
