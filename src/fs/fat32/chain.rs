//! FAT entry access and cluster-chain allocation.

use alloc::vec::Vec;
use bit_field::BitField;

use super::layout::{is_end_of_chain, Cluster, CLUSTER_FREE, CLUSTER_MASK, END_OF_CHAIN, SECTOR_SIZE};
use super::volume::{Volume, VolumeIo};
use crate::fs::error::{FsError, FsResult};
use crate::fs::VolumeId;

/// Reads and writes FAT entries through a one-sector cache.
///
/// A cursor lives for one chain walk; reusing the sector across walks would
/// miss writes made through other cursors. Only the first FAT copy is touched.
pub struct FatCursor {
    sector: Option<u32>,
    buf: [u8; SECTOR_SIZE],
}

impl FatCursor {
    pub fn new() -> Self {
        FatCursor { sector: None, buf: [0; SECTOR_SIZE] }
    }

    fn locate(volume: &Volume, cluster: Cluster) -> FsResult<(u32, usize)> {
        if cluster > volume.last_cluster() {
            return Err(FsError::CorruptChain(cluster));
        }
        let fat_offset = cluster * 4;
        let sector = volume.fat_start() + fat_offset / SECTOR_SIZE as u32;
        Ok((sector, (fat_offset % SECTOR_SIZE as u32) as usize))
    }

    fn load(&mut self, io: &mut VolumeIo<'_>, sector: u32) -> FsResult<()> {
        if self.sector != Some(sector) {
            self.sector = None;
            io.read_sector(sector, &mut self.buf)?;
            self.sector = Some(sector);
        }
        Ok(())
    }

    fn raw(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.buf[offset],
            self.buf[offset + 1],
            self.buf[offset + 2],
            self.buf[offset + 3],
        ])
    }

    /// The 28-bit FAT entry for `cluster`.
    pub fn next_cluster(&mut self, io: &mut VolumeIo<'_>, cluster: Cluster) -> FsResult<Cluster> {
        let (sector, offset) = Self::locate(io.volume(), cluster)?;
        self.load(io, sector)?;
        Ok(self.raw(offset) & CLUSTER_MASK)
    }

    /// Rewrite one FAT entry, preserving its reserved top 4 bits.
    pub fn set_next(&mut self, io: &mut VolumeIo<'_>, cluster: Cluster, value: Cluster) -> FsResult<()> {
        let (sector, offset) = Self::locate(io.volume(), cluster)?;
        self.load(io, sector)?;

        let mut entry = self.raw(offset);
        entry.set_bits(0..28, value & CLUSTER_MASK);
        self.buf[offset..offset + 4].copy_from_slice(&entry.to_le_bytes());

        if let Err(e) = io.write_sector(sector, &self.buf) {
            // The cached copy no longer matches the disk.
            self.sector = None;
            return Err(e);
        }
        Ok(())
    }
}

impl Default for FatCursor {
    fn default() -> Self {
        Self::new()
    }
}

pub fn next_cluster(io: &mut VolumeIo<'_>, cluster: Cluster) -> FsResult<Cluster> {
    FatCursor::new().next_cluster(io, cluster)
}

pub fn set_next(io: &mut VolumeIo<'_>, cluster: Cluster, value: Cluster) -> FsResult<()> {
    FatCursor::new().set_next(io, cluster, value)
}

// ══════════════════════════════════════════════════════════════
//  Allocation
// ══════════════════════════════════════════════════════════════

/// Source of free clusters. Path resolution never sees which one is in use.
pub trait ClusterAllocator: Send {
    /// A cluster whose FAT entry is currently free. Does not claim it.
    fn find_free(&mut self, io: &mut VolumeIo<'_>) -> FsResult<Cluster>;

    /// `cluster` on `volume` was returned to the free pool.
    fn released(&mut self, _volume: VolumeId, _cluster: Cluster) {}
}

/// First-fit forward scan from a fixed hint, no wraparound.
#[derive(Debug, Clone, Copy)]
pub struct LinearScanAllocator {
    start_hint: Cluster,
}

impl LinearScanAllocator {
    pub fn new(start_hint: Cluster) -> Self {
        LinearScanAllocator { start_hint: start_hint.max(2) }
    }
}

impl ClusterAllocator for LinearScanAllocator {
    fn find_free(&mut self, io: &mut VolumeIo<'_>) -> FsResult<Cluster> {
        let last = io.volume().last_cluster();
        let mut cursor = FatCursor::new();
        for cluster in self.start_hint..=last {
            if cursor.next_cluster(io, cluster)? == CLUSTER_FREE {
                return Ok(cluster);
            }
        }
        Err(FsError::NoSpace)
    }
}

/// Claim a free cluster and mark it as a one-cluster chain.
pub fn allocate(io: &mut VolumeIo<'_>, alloc: &mut dyn ClusterAllocator) -> FsResult<Cluster> {
    let cluster = alloc.find_free(io)?;
    set_next(io, cluster, END_OF_CHAIN)?;
    log::trace!("fat32: allocated cluster {}", cluster);
    Ok(cluster)
}

/// Every cluster of the chain starting at `start`, in order.
pub fn collect_chain(io: &mut VolumeIo<'_>, start: Cluster) -> FsResult<Vec<Cluster>> {
    let volume = io.volume();
    let limit = volume.cluster_count() as usize;
    let mut cursor = FatCursor::new();
    let mut chain = Vec::new();
    let mut cluster = start;

    loop {
        if !volume.is_data_cluster(cluster) || chain.len() >= limit {
            return Err(FsError::CorruptChain(cluster));
        }
        chain.try_reserve(1).map_err(|_| FsError::OutOfMemory)?;
        chain.push(cluster);

        let next = cursor.next_cluster(io, cluster)?;
        if is_end_of_chain(next) {
            return Ok(chain);
        }
        cluster = next;
    }
}

/// Free the chain after `cluster`. With `terminate`, `cluster` becomes the
/// new end of chain; otherwise it is freed too. Returns the number freed.
pub fn truncate_from(
    io: &mut VolumeIo<'_>,
    alloc: &mut dyn ClusterAllocator,
    cluster: Cluster,
    terminate: bool,
) -> FsResult<u32> {
    let volume = io.volume();
    if !volume.is_data_cluster(cluster) {
        return Err(FsError::CorruptChain(cluster));
    }

    let mut cursor = FatCursor::new();
    let mut freed = 0;
    let mut next = cursor.next_cluster(io, cluster)?;

    if terminate {
        cursor.set_next(io, cluster, END_OF_CHAIN)?;
    } else {
        cursor.set_next(io, cluster, CLUSTER_FREE)?;
        alloc.released(volume.id, cluster);
        freed += 1;
    }

    while !is_end_of_chain(next) {
        if !volume.is_data_cluster(next) || freed > volume.cluster_count() {
            return Err(FsError::CorruptChain(next));
        }
        let after = cursor.next_cluster(io, next)?;
        cursor.set_next(io, next, CLUSTER_FREE)?;
        alloc.released(volume.id, next);
        freed += 1;
        next = after;
    }

    log::trace!("fat32: freed {} clusters after {}", freed, cluster);
    Ok(freed)
}
