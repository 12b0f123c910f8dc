//! 8.3 names, directory scanning and path traversal.

use alloc::vec::Vec;

use super::chain::{allocate, collect_chain, set_next, truncate_from, ClusterAllocator};
use super::layout::{
    Attributes, Cluster, DirEntry, DIR_ENTRY_SIZE, DOTDOT_NAME, DOT_NAME, ENTRIES_PER_SECTOR, NAME_DELETED,
    NAME_E5_ESCAPE, NAME_END, SECTOR_SIZE,
};
use super::volume::VolumeIo;
use crate::fs::error::{FsError, FsResult};
use crate::fs::segments;

/// Encode a path segment as a space-padded 8.3 name.
///
/// Splits on the last `.`, upper-cases ASCII and truncates an over-long base
/// or extension. `.` and `..` keep their dots and get no extension.
pub fn to_fat_name(segment: &str) -> [u8; 11] {
    if segment == "." {
        return DOT_NAME;
    }
    if segment == ".." {
        return DOTDOT_NAME;
    }

    let mut name = [b' '; 11];
    let (base, ext) = match segment.rfind('.') {
        Some(dot) => (&segment[..dot], &segment[dot + 1..]),
        None => (segment, ""),
    };

    for (slot, b) in name[..8].iter_mut().zip(base.bytes()) {
        *slot = b.to_ascii_uppercase();
    }
    for (slot, b) in name[8..].iter_mut().zip(ext.bytes()) {
        *slot = b.to_ascii_uppercase();
    }
    if name[0] == NAME_DELETED {
        name[0] = NAME_E5_ESCAPE;
    }
    name
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirQuery {
    Name([u8; 11]),
    /// First deleted slot or the end-of-directory marker.
    FreeSlot,
}

/// Physical position of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub cluster: Cluster,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirSlot {
    pub entry: DirEntry,
    pub slot: SlotRef,
}

/// A directory's whole cluster chain read into memory.
pub struct DirListing {
    pub chain: Vec<Cluster>,
    bytes: Vec<u8>,
    entries_per_cluster: usize,
}

impl DirListing {
    fn slot_ref(&self, i: usize) -> SlotRef {
        SlotRef { cluster: self.chain[i / self.entries_per_cluster], index: i % self.entries_per_cluster }
    }

    pub fn find(&self, query: DirQuery) -> Option<DirSlot> {
        for (i, raw) in self.bytes.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
            let first = raw[0];
            match query {
                DirQuery::FreeSlot => {
                    if first == NAME_END || first == NAME_DELETED {
                        return Some(DirSlot { entry: DirEntry::decode(raw), slot: self.slot_ref(i) });
                    }
                }
                DirQuery::Name(name) => {
                    if first == NAME_END {
                        return None;
                    }
                    if first == NAME_DELETED {
                        continue;
                    }
                    let entry = DirEntry::decode(raw);
                    if !entry.attrib.is_hidden_from_lookup() && entry.name == name {
                        return Some(DirSlot { entry, slot: self.slot_ref(i) });
                    }
                }
            }
        }
        None
    }

    /// Live entries in order, excluding deleted slots, labels and LFN fragments.
    pub fn live_entries(&self) -> impl Iterator<Item = DirEntry> + '_ {
        self.bytes
            .chunks_exact(DIR_ENTRY_SIZE)
            .take_while(|raw| raw[0] != NAME_END)
            .filter(|raw| raw[0] != NAME_DELETED)
            .map(DirEntry::decode)
            .filter(|e| !e.attrib.is_hidden_from_lookup())
    }

    pub fn tail(&self) -> Cluster {
        self.chain[self.chain.len() - 1]
    }
}

/// Read the directory starting at `dir` (0 = root) into one buffer.
pub fn read_directory(io: &mut VolumeIo<'_>, dir: Cluster) -> FsResult<DirListing> {
    let volume = io.volume();
    let chain = collect_chain(io, volume.dir_start(dir))?;
    let cluster_bytes = volume.cluster_bytes();

    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(chain.len() * cluster_bytes)
        .map_err(|_| FsError::OutOfMemory)?;
    bytes.resize(chain.len() * cluster_bytes, 0);

    for (cluster, buf) in chain.iter().zip(bytes.chunks_exact_mut(cluster_bytes)) {
        io.read_cluster(*cluster, buf)?;
    }

    Ok(DirListing { chain, bytes, entries_per_cluster: cluster_bytes / DIR_ENTRY_SIZE })
}

pub fn find_in_directory(io: &mut VolumeIo<'_>, dir: Cluster, query: DirQuery) -> FsResult<DirSlot> {
    read_directory(io, dir)?.find(query).ok_or(FsError::NotFound)
}

fn slot_position(io: &VolumeIo<'_>, slot: SlotRef) -> (u32, usize) {
    let sector = io.volume().cluster_sector(slot.cluster) + (slot.index / ENTRIES_PER_SECTOR) as u32;
    (sector, slot.index % ENTRIES_PER_SECTOR * DIR_ENTRY_SIZE)
}

/// Read-modify-write the sector holding `slot`.
fn update_slot(io: &mut VolumeIo<'_>, slot: SlotRef, f: impl FnOnce(&mut [u8])) -> FsResult<()> {
    let (sector, offset) = slot_position(io, slot);
    let mut buf = [0u8; SECTOR_SIZE];
    io.read_sector(sector, &mut buf)?;
    f(&mut buf[offset..offset + DIR_ENTRY_SIZE]);
    io.write_sector(sector, &buf)
}

pub fn write_slot(io: &mut VolumeIo<'_>, slot: SlotRef, entry: &DirEntry) -> FsResult<()> {
    update_slot(io, slot, |raw| entry.encode(raw))
}

/// Rewrite only the 11 name bytes of `slot`.
pub fn write_name(io: &mut VolumeIo<'_>, slot: SlotRef, name: &[u8; 11]) -> FsResult<()> {
    update_slot(io, slot, |raw| raw[0..11].copy_from_slice(name))
}

pub fn mark_deleted(io: &mut VolumeIo<'_>, slot: SlotRef) -> FsResult<()> {
    update_slot(io, slot, |raw| raw[0] = NAME_DELETED)
}

pub fn zero_cluster(io: &mut VolumeIo<'_>, cluster: Cluster) -> FsResult<()> {
    let zero = [0u8; SECTOR_SIZE];
    let first = io.volume().cluster_sector(cluster);
    for s in 0..io.volume().sectors_per_cluster as u32 {
        io.write_sector(first + s, &zero)?;
    }
    Ok(())
}

/// Store `entry` in the first free slot of `dir`, growing it by one zeroed
/// cluster when every slot is taken.
pub fn insert_entry(
    io: &mut VolumeIo<'_>,
    alloc: &mut dyn ClusterAllocator,
    dir: Cluster,
    entry: &DirEntry,
) -> FsResult<SlotRef> {
    let listing = read_directory(io, dir)?;
    if let Some(free) = listing.find(DirQuery::FreeSlot) {
        write_slot(io, free.slot, entry)?;
        return Ok(free.slot);
    }

    let grown = allocate(io, alloc)?;
    let linked = zero_cluster(io, grown).and_then(|_| set_next(io, listing.tail(), grown));
    if let Err(e) = linked {
        let _ = truncate_from(io, alloc, grown, false);
        return Err(e);
    }
    log::debug!("fat32: directory {} grew by cluster {}", dir, grown);

    let slot = SlotRef { cluster: grown, index: 0 };
    write_slot(io, slot, entry)?;
    Ok(slot)
}

/// Outcome of a successful path walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub entry: DirEntry,
    /// `None` for the root, which has no slot.
    pub slot: Option<SlotRef>,
    /// Containing directory, 0 for the root.
    pub parent: Cluster,
}

/// Synthetic entry standing in for the root directory.
pub fn root_entry(io: &VolumeIo<'_>) -> DirEntry {
    let mut name = [b' '; 11];
    name[0] = b'/';
    DirEntry::new(name, Attributes::DIRECTORY, io.volume().root_cluster, 0)
}

/// Directory cluster a `..`/subdir entry refers to, normalised so root is 0.
pub(super) fn as_dir(io: &VolumeIo<'_>, entry: &DirEntry) -> Cluster {
    if entry.first_cluster == io.volume().root_cluster { 0 } else { entry.first_cluster }
}

/// Walk `path` from the root, one segment per directory lookup.
pub fn traverse(io: &mut VolumeIo<'_>, path: &str) -> FsResult<Resolved> {
    let parts = segments(path)?;
    if parts.is_empty() {
        return Ok(Resolved { entry: root_entry(io), slot: None, parent: 0 });
    }

    let mut dir: Cluster = 0;
    for (i, part) in parts.iter().enumerate() {
        let found = find_in_directory(io, dir, DirQuery::Name(to_fat_name(part)))?;
        if i == parts.len() - 1 {
            if found.entry.is_dir() && as_dir(io, &found.entry) == 0 {
                // ".." back to the root
                return Ok(Resolved { entry: root_entry(io), slot: None, parent: 0 });
            }
            return Ok(Resolved { entry: found.entry, slot: Some(found.slot), parent: dir });
        }
        if !found.entry.is_dir() {
            return Err(FsError::NotFound);
        }
        dir = as_dir(io, &found.entry);
    }
    Err(FsError::NotFound)
}

/// Resolve every segment but the last; returns the parent directory and the last segment.
pub fn resolve_parent<'p>(io: &mut VolumeIo<'_>, path: &'p str) -> FsResult<(Cluster, &'p str)> {
    let parts: Vec<&'p str> = segments(path)?;
    let Some((&name, dirs)) = parts.split_last() else {
        return Err(FsError::InvalidPath);
    };
    if name == "." || name == ".." {
        return Err(FsError::InvalidPath);
    }

    let mut dir: Cluster = 0;
    for part in dirs {
        let found = find_in_directory(io, dir, DirQuery::Name(to_fat_name(part)))?;
        if !found.entry.is_dir() {
            return Err(FsError::NotFound);
        }
        dir = as_dir(io, &found.entry);
    }
    Ok((dir, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::block::BlockError;
    use crate::drivers::ramdisk::RamDisk;
    use crate::fs::fat32::chain::{next_cluster, LinearScanAllocator};
    use crate::fs::fat32::layout::CLUSTER_FREE;
    use crate::fs::fat32::format::{format_volume, FormatOptions};
    use crate::fs::fat32::volume::Volume;
    use crate::fs::partition::{PartitionEntry, TYPE_FAT32};
    use crate::fs::VolumeId;

    fn fresh() -> (RamDisk, Volume) {
        let mut disk = RamDisk::new(1024);
        let part = PartitionEntry::new(TYPE_FAT32, 0, 1024);
        let opts = FormatOptions { sectors_per_cluster: 1, ..FormatOptions::default() };
        let bs = format_volume(&mut disk, &part, &opts).unwrap();
        let vol = Volume::from_boot_sector(VolumeId::new(0, 0), &part, &bs).unwrap();
        (disk, vol)
    }

    #[test]
    fn fat_names() {
        assert_eq!(&to_fat_name("hello.txt"), b"HELLO   TXT");
        assert_eq!(&to_fat_name("README"), b"README     ");
        assert_eq!(&to_fat_name("archive.tar.gz"), b"ARCHIVE.GZ ");
        assert_eq!(&to_fat_name("verylongname.text"), b"VERYLONGTEX");
        assert_eq!(&to_fat_name(".."), b"..         ");
    }

    #[test]
    fn leading_e5_byte_is_escaped() {
        // U+5000 encodes as E5 80 80.
        let name = to_fat_name("\u{5000}");
        assert_eq!(&name[..3], &[NAME_E5_ESCAPE, 0x80, 0x80]);
    }

    #[test]
    fn insert_then_find_by_name_and_free_slot() {
        let (mut disk, vol) = fresh();
        let mut io = VolumeIo::new(&mut disk, &vol).unwrap();
        let mut alloc = LinearScanAllocator::new(3);

        let entry = DirEntry::new(to_fat_name("a.txt"), Attributes::FILE, 0, 0);
        let slot = insert_entry(&mut io, &mut alloc, 0, &entry).unwrap();
        assert_eq!(slot, SlotRef { cluster: 2, index: 0 });

        let found = find_in_directory(&mut io, 0, DirQuery::Name(to_fat_name("A.TXT"))).unwrap();
        assert_eq!(found.entry, entry);
        assert_eq!(find_in_directory(&mut io, 0, DirQuery::FreeSlot).unwrap().slot.index, 1);

        mark_deleted(&mut io, slot).unwrap();
        assert_eq!(
            find_in_directory(&mut io, 0, DirQuery::Name(to_fat_name("A.TXT"))),
            Err(FsError::NotFound)
        );
        assert_eq!(find_in_directory(&mut io, 0, DirQuery::FreeSlot).unwrap().slot.index, 0);
    }

    #[test]
    fn full_directory_grows_by_one_cluster() {
        let (mut disk, vol) = fresh();
        let mut io = VolumeIo::new(&mut disk, &vol).unwrap();
        let mut alloc = LinearScanAllocator::new(3);

        // One sector per cluster holds 16 entries.
        for i in 0..16 {
            let name = to_fat_name(&alloc::format!("F{}", i));
            insert_entry(&mut io, &mut alloc, 0, &DirEntry::new(name, Attributes::FILE, 0, 0)).unwrap();
        }
        let slot = insert_entry(&mut io, &mut alloc, 0, &DirEntry::new(to_fat_name("F16"), Attributes::FILE, 0, 0)).unwrap();
        assert_eq!(slot, SlotRef { cluster: 3, index: 0 });
        assert_eq!(read_directory(&mut io, 0).unwrap().chain, [2, 3]);
        assert!(find_in_directory(&mut io, 0, DirQuery::Name(to_fat_name("F3"))).is_ok());
    }

    #[test]
    fn failed_growth_releases_the_new_cluster() {
        let (mut disk, vol) = fresh();
        let mut alloc = LinearScanAllocator::new(3);
        {
            let mut io = VolumeIo::new(&mut disk, &vol).unwrap();
            for i in 0..16 {
                let name = to_fat_name(&alloc::format!("F{}", i));
                insert_entry(&mut io, &mut alloc, 0, &DirEntry::new(name, Attributes::FILE, 0, 0)).unwrap();
            }
        }

        // Claiming cluster 3 in the FAT succeeds, zeroing it does not.
        disk.fail_write_once(1);
        let mut io = VolumeIo::new(&mut disk, &vol).unwrap();
        let entry = DirEntry::new(to_fat_name("F16"), Attributes::FILE, 0, 0);
        assert_eq!(
            insert_entry(&mut io, &mut alloc, 0, &entry),
            Err(FsError::Block(BlockError::Io))
        );
        assert_eq!(next_cluster(&mut io, 3).unwrap(), CLUSTER_FREE);
        assert_eq!(read_directory(&mut io, 0).unwrap().chain, [2]);
        assert_eq!(
            find_in_directory(&mut io, 0, DirQuery::Name(to_fat_name("F16"))),
            Err(FsError::NotFound)
        );

        let slot = insert_entry(&mut io, &mut alloc, 0, &entry).unwrap();
        assert_eq!(slot, SlotRef { cluster: 3, index: 0 });
    }

    #[test]
    fn volume_labels_and_lfn_are_skipped() {
        let (mut disk, vol) = fresh();
        let mut io = VolumeIo::new(&mut disk, &vol).unwrap();
        let mut alloc = LinearScanAllocator::new(3);

        let label = DirEntry::new(*b"DATA       ", Attributes::VOLUME_ID, 0, 0);
        insert_entry(&mut io, &mut alloc, 0, &label).unwrap();
        let lfn = DirEntry::new(*b"AB         ", Attributes::LONG_NAME, 0, 0);
        insert_entry(&mut io, &mut alloc, 0, &lfn).unwrap();

        assert_eq!(
            find_in_directory(&mut io, 0, DirQuery::Name(*b"DATA       ")),
            Err(FsError::NotFound)
        );
        assert_eq!(read_directory(&mut io, 0).unwrap().live_entries().count(), 0);
    }

    #[test]
    fn traverse_walks_nested_directories() {
        let (mut disk, vol) = fresh();
        let mut io = VolumeIo::new(&mut disk, &vol).unwrap();
        let mut alloc = LinearScanAllocator::new(3);

        let sub = allocate(&mut io, &mut alloc).unwrap();
        zero_cluster(&mut io, sub).unwrap();
        insert_entry(&mut io, &mut alloc, 0, &DirEntry::new(to_fat_name("docs"), Attributes::DIRECTORY, sub, 0)).unwrap();
        insert_entry(&mut io, &mut alloc, sub, &DirEntry::new(DOTDOT_NAME, Attributes::DIRECTORY, 0, 0)).unwrap();
        insert_entry(&mut io, &mut alloc, sub, &DirEntry::new(to_fat_name("a.txt"), Attributes::FILE, 0, 7)).unwrap();

        let hit = traverse(&mut io, "0:0/docs/a.txt").unwrap();
        assert_eq!(hit.entry.size, 7);
        assert_eq!(hit.parent, sub);

        assert!(traverse(&mut io, "/").unwrap().slot.is_none());
        assert!(traverse(&mut io, "/docs/..").unwrap().slot.is_none());
        assert_eq!(traverse(&mut io, "/docs/a.txt/x").err(), Some(FsError::NotFound));
        assert_eq!(traverse(&mut io, "/nope").err(), Some(FsError::NotFound));

        assert_eq!(resolve_parent(&mut io, "/docs/new.txt").unwrap(), (sub, "new.txt"));
        assert_eq!(resolve_parent(&mut io, "/").err(), Some(FsError::InvalidPath));
        assert_eq!(resolve_parent(&mut io, "/docs/..").err(), Some(FsError::InvalidPath));
        assert_eq!(resolve_parent(&mut io, "/docs/a:b").err(), Some(FsError::InvalidPath));
        assert_eq!(traverse(&mut io, "/docs/x:y.txt").err(), Some(FsError::InvalidPath));
    }
}
