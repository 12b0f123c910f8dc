//! Path-level operations composed from the chain engine and the resolver.
//! Each call runs to completion; nothing is kept between calls.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use super::chain::{allocate, collect_chain, set_next, truncate_from, ClusterAllocator, FatCursor};
use super::dir::{
    as_dir, find_in_directory, insert_entry, mark_deleted, read_directory, resolve_parent, to_fat_name, traverse,
    write_name, write_slot, zero_cluster, DirQuery, DirSlot, SlotRef,
};
use super::layout::{
    is_end_of_chain, Attributes, Cluster, DirEntry, DOTDOT_NAME, DOT_NAME, END_OF_CHAIN, SECTOR_SIZE,
};
use super::volume::VolumeIo;
use crate::fs::error::{FsError, FsResult};
use crate::fs::segments;

/// What `stat` and `list_dir` report about an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub attrib: Attributes,
    pub size: u32,
    pub first_cluster: Cluster,
}

impl From<&DirEntry> for FileInfo {
    fn from(entry: &DirEntry) -> Self {
        FileInfo {
            name: entry.display_name(),
            attrib: entry.attrib,
            size: entry.size,
            first_cluster: entry.first_cluster,
        }
    }
}

// ── read ────────────────────────────────────────────────────

/// Whole file contents, exactly `size` bytes long.
pub fn read(io: &mut VolumeIo<'_>, path: &str) -> FsResult<Vec<u8>> {
    let found = traverse(io, path)?;
    if found.entry.is_dir() {
        return Err(FsError::IsADirectory);
    }
    let size = found.entry.size as usize;
    if size == 0 {
        return Ok(Vec::new());
    }

    let volume = io.volume();
    let spc = volume.sectors_per_cluster as usize;
    let mut remaining = size.div_ceil(SECTOR_SIZE);

    let mut buf = Vec::new();
    buf.try_reserve_exact(remaining * SECTOR_SIZE).map_err(|_| FsError::OutOfMemory)?;
    buf.resize(remaining * SECTOR_SIZE, 0);

    let mut cursor = FatCursor::new();
    let mut cluster = found.entry.first_cluster;
    let mut offset = 0;
    loop {
        if !volume.is_data_cluster(cluster) {
            return Err(FsError::CorruptChain(cluster));
        }
        let n = remaining.min(spc);
        let end = offset + n * SECTOR_SIZE;
        io.read_sectors(volume.cluster_sector(cluster), n as u32, &mut buf[offset..end])?;
        offset = end;
        remaining -= n;
        if remaining == 0 {
            break;
        }

        let next = cursor.next_cluster(io, cluster)?;
        if is_end_of_chain(next) {
            // Chain shorter than the recorded size.
            return Err(FsError::CorruptChain(cluster));
        }
        cluster = next;
    }

    buf.truncate(size);
    Ok(buf)
}

// ── write ───────────────────────────────────────────────────

/// Create or replace the file at `path` with `data`.
///
/// Only the read-only, hidden, system and archive bits of `attrib` are kept.
/// The directory entry is updated after the data is in place, so a failed
/// write leaves the old entry and its chain consistent.
pub fn write(
    io: &mut VolumeIo<'_>,
    alloc: &mut dyn ClusterAllocator,
    path: &str,
    data: &[u8],
    attrib: Attributes,
) -> FsResult<()> {
    let size = u32::try_from(data.len()).map_err(|_| FsError::OutOfRange)?;
    let attrib = attrib & Attributes::CALLER_SETTABLE;
    let (parent, name) = resolve_parent(io, path)?;
    let name = to_fat_name(name);

    match read_directory(io, parent)?.find(DirQuery::Name(name)) {
        Some(existing) => overwrite(io, alloc, existing, data, size, attrib),
        None => create(io, alloc, parent, name, data, size, attrib),
    }
}

fn create(
    io: &mut VolumeIo<'_>,
    alloc: &mut dyn ClusterAllocator,
    parent: Cluster,
    name: [u8; 11],
    data: &[u8],
    size: u32,
    attrib: Attributes,
) -> FsResult<()> {
    if data.is_empty() {
        insert_entry(io, alloc, parent, &DirEntry::new(name, attrib, 0, 0))?;
        return Ok(());
    }

    let cluster_bytes = io.volume().cluster_bytes();
    let mut scratch = vec![0u8; cluster_bytes];
    let first = build_chain(io, alloc, data, &mut scratch)?;

    let entry = DirEntry::new(name, attrib, first, size);
    if let Err(e) = insert_entry(io, alloc, parent, &entry) {
        let _ = truncate_from(io, alloc, first, false);
        return Err(e);
    }

    log::debug!("fat32: created {:?} ({} bytes, first cluster {})", entry.display_name(), size, first);
    Ok(())
}

fn overwrite(
    io: &mut VolumeIo<'_>,
    alloc: &mut dyn ClusterAllocator,
    existing: DirSlot,
    data: &[u8],
    size: u32,
    attrib: Attributes,
) -> FsResult<()> {
    if existing.entry.is_read_only() {
        return Err(FsError::ReadOnly);
    }
    if existing.entry.is_dir() {
        return Err(FsError::IsADirectory);
    }

    let cluster_bytes = io.volume().cluster_bytes();
    let needed = data.len().div_ceil(cluster_bytes);
    let old = if existing.entry.first_cluster == 0 {
        Vec::new()
    } else {
        collect_chain(io, existing.entry.first_cluster)?
    };

    let mut entry = existing.entry.clone();
    entry.size = size;
    entry.attrib = attrib;

    if needed == 0 {
        entry.first_cluster = 0;
        write_slot(io, existing.slot, &entry)?;
        if let Some(&head) = old.first() {
            truncate_from(io, alloc, head, false)?;
        }
        return Ok(());
    }

    let mut scratch = vec![0u8; cluster_bytes];
    if old.is_empty() {
        entry.first_cluster = build_chain(io, alloc, data, &mut scratch)?;
        if let Err(e) = write_slot(io, existing.slot, &entry) {
            let _ = truncate_from(io, alloc, entry.first_cluster, false);
            return Err(e);
        }
        return Ok(());
    }

    let mut grown = None;
    let written = rewrite_chain(io, alloc, &old, data, &mut scratch, &mut grown)
        .and_then(|last| write_slot(io, existing.slot, &entry).map(|_| last));
    let last = match written {
        Ok(last) => last,
        Err(e) => {
            // Cut the chain back to the length the old entry records.
            if let Some(ext) = grown {
                let _ = set_next(io, old[old.len() - 1], END_OF_CHAIN);
                let _ = truncate_from(io, alloc, ext, false);
            }
            return Err(e);
        }
    };

    if old.len() > needed {
        truncate_from(io, alloc, last, true)?;
    }
    Ok(())
}

/// Allocate a chain holding `data`. Nothing stays claimed on failure.
fn build_chain(
    io: &mut VolumeIo<'_>,
    alloc: &mut dyn ClusterAllocator,
    data: &[u8],
    scratch: &mut [u8],
) -> FsResult<Cluster> {
    let first = allocate(io, alloc)?;
    if let Err(e) = rewrite_chain(io, alloc, &[first], data, scratch, &mut None) {
        let _ = truncate_from(io, alloc, first, false);
        return Err(e);
    }
    Ok(first)
}

/// Write `data` over the clusters of `old`, linking new ones past its end.
/// `grown` receives the first appended cluster. Returns the last cluster written.
fn rewrite_chain(
    io: &mut VolumeIo<'_>,
    alloc: &mut dyn ClusterAllocator,
    old: &[Cluster],
    data: &[u8],
    scratch: &mut [u8],
    grown: &mut Option<Cluster>,
) -> FsResult<Cluster> {
    let mut cluster = old[0];
    for (i, chunk) in data.chunks(scratch.len()).enumerate() {
        if i > 0 {
            cluster = match old.get(i) {
                Some(&c) => c,
                None => {
                    let next = extend(io, alloc, cluster)?;
                    if grown.is_none() {
                        *grown = Some(next);
                    }
                    next
                }
            };
        }
        write_padded(io, cluster, chunk, scratch)?;
    }
    Ok(cluster)
}

/// Allocate a cluster and link it after `tail`.
fn extend(io: &mut VolumeIo<'_>, alloc: &mut dyn ClusterAllocator, tail: Cluster) -> FsResult<Cluster> {
    let next = allocate(io, alloc)?;
    if let Err(e) = set_next(io, tail, next) {
        let _ = truncate_from(io, alloc, next, false);
        return Err(e);
    }
    Ok(next)
}

/// Write `chunk` into `cluster`, zero-filling the rest of the cluster.
fn write_padded(io: &mut VolumeIo<'_>, cluster: Cluster, chunk: &[u8], scratch: &mut [u8]) -> FsResult<()> {
    scratch[..chunk.len()].copy_from_slice(chunk);
    scratch[chunk.len()..].fill(0);
    io.write_cluster(cluster, scratch)
}

// ── rename / delete ─────────────────────────────────────────

/// Give the entry at `path` the name `new_name` within the same directory.
pub fn rename(io: &mut VolumeIo<'_>, path: &str, new_name: &str) -> FsResult<()> {
    let new_name = new_name.trim_matches('/');
    if new_name.is_empty() || new_name.contains(['/', ':']) || new_name == "." || new_name == ".." {
        return Err(FsError::InvalidPath);
    }

    let found = traverse(io, path)?;
    let slot = found.slot.ok_or(FsError::InvalidPath)?;
    if found.entry.is_dot() {
        return Err(FsError::InvalidPath);
    }
    if found.entry.is_read_only() {
        return Err(FsError::ReadOnly);
    }

    let name = to_fat_name(new_name);
    match find_in_directory(io, found.parent, DirQuery::Name(name)) {
        Ok(_) => Err(FsError::AlreadyExists),
        Err(FsError::NotFound) => write_name(io, slot, &name),
        Err(e) => Err(e),
    }
}

/// Remove the file or empty directory at `path` and free its clusters.
pub fn delete(io: &mut VolumeIo<'_>, alloc: &mut dyn ClusterAllocator, path: &str) -> FsResult<()> {
    let found = traverse(io, path)?;
    let slot = found.slot.ok_or(FsError::InvalidPath)?;
    if found.entry.is_dot() {
        return Err(FsError::InvalidPath);
    }
    if found.entry.is_read_only() {
        return Err(FsError::ReadOnly);
    }
    if found.entry.is_dir() && found.entry.first_cluster != 0 {
        let listing = read_directory(io, found.entry.first_cluster)?;
        if listing.live_entries().any(|e| !e.is_dot()) {
            return Err(FsError::DirectoryNotEmpty);
        }
    }

    mark_deleted(io, slot)?;
    if found.entry.first_cluster != 0 {
        truncate_from(io, alloc, found.entry.first_cluster, false)?;
    }
    log::debug!("fat32: deleted {}", path);
    Ok(())
}

// ── mkdir ───────────────────────────────────────────────────

/// Create every missing directory along `path`.
pub fn mkdir(io: &mut VolumeIo<'_>, alloc: &mut dyn ClusterAllocator, path: &str) -> FsResult<()> {
    let mut dir: Cluster = 0;
    let mut created = false;

    for part in segments(path)? {
        let name = to_fat_name(part);
        match read_directory(io, dir)?.find(DirQuery::Name(name)) {
            Some(found) if found.entry.is_dir() => dir = as_dir(io, &found.entry),
            Some(_) => return Err(FsError::AlreadyExists),
            None if part == "." || part == ".." => return Err(FsError::InvalidPath),
            None => {
                dir = create_directory(io, alloc, dir, name)?;
                created = true;
            }
        }
    }

    if created { Ok(()) } else { Err(FsError::AlreadyExists) }
}

fn create_directory(
    io: &mut VolumeIo<'_>,
    alloc: &mut dyn ClusterAllocator,
    parent: Cluster,
    name: [u8; 11],
) -> FsResult<Cluster> {
    let cluster = allocate(io, alloc)?;

    let populated = zero_cluster(io, cluster)
        .and_then(|_| {
            let dot = DirEntry::new(DOT_NAME, Attributes::DIRECTORY, cluster, 0);
            write_slot(io, SlotRef { cluster, index: 0 }, &dot)
        })
        .and_then(|_| {
            let dotdot = DirEntry::new(DOTDOT_NAME, Attributes::DIRECTORY, parent, 0);
            write_slot(io, SlotRef { cluster, index: 1 }, &dotdot)
        })
        .and_then(|_| insert_entry(io, alloc, parent, &DirEntry::new(name, Attributes::DIRECTORY, cluster, 0)));

    if let Err(e) = populated {
        let _ = truncate_from(io, alloc, cluster, false);
        return Err(e);
    }
    log::debug!("fat32: mkdir cluster {} under {}", cluster, parent);
    Ok(cluster)
}

// ── stat / list ─────────────────────────────────────────────

pub fn stat(io: &mut VolumeIo<'_>, path: &str) -> FsResult<FileInfo> {
    Ok(FileInfo::from(&traverse(io, path)?.entry))
}

/// Live entries of the directory at `path`, without `.` and `..`.
pub fn list_dir(io: &mut VolumeIo<'_>, path: &str) -> FsResult<Vec<FileInfo>> {
    let found = traverse(io, path)?;
    if !found.entry.is_dir() {
        return Err(FsError::NotADirectory);
    }
    let dir = if found.slot.is_none() { 0 } else { found.entry.first_cluster };

    let listing = read_directory(io, dir)?;
    let mut out = Vec::new();
    for entry in listing.live_entries().filter(|e| !e.is_dot()) {
        out.try_reserve(1).map_err(|_| FsError::OutOfMemory)?;
        out.push(FileInfo::from(&entry));
    }
    Ok(out)
}
