#![forbid(unsafe_code)]
//! Directory operations.
//!
//! Linear entry scan over ext2 directory blocks, entry insertion and
//! deletion with `rec_len` coalescing, `.`/`..` management, and path
//! reconstruction by walking `..` to the root.
//!
//! Lookups hand out [`EntryHandle`]s: a located entry plus a lease on the
//! store's outstanding-handle counter. `delete` and `replace` consume the
//! handle; every other path releases it on drop, so a handle is released
//! exactly once whatever the outcome of the operation that took it.

pub mod block;

use block::{BlockFault, DirRecord};
use nsfs_alloc::BlockAllocator;
use nsfs_error::{FsError, Result};
use nsfs_types::{BlockNumber, BlockSize, DirEntryType, EXT2_NAME_LEN, InodeNumber};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Upper bound on `..` hops when rebuilding a path; deeper means a cycle.
const MAX_PATH_DEPTH: usize = 4096;

// ── Entry handles ───────────────────────────────────────────────────────────

/// Position of a located entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub dir: InodeNumber,
    pub block_index: usize,
    pub offset: usize,
    pub ino: InodeNumber,
    pub kind: DirEntryType,
}

#[derive(Debug)]
struct Lease(Arc<AtomicUsize>);

impl Lease {
    fn take(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A located directory entry, valid until the directory is next modified.
#[derive(Debug)]
pub struct EntryHandle {
    loc: EntryLocation,
    _lease: Lease,
}

impl EntryHandle {
    #[must_use]
    pub fn ino(&self) -> InodeNumber {
        self.loc.ino
    }

    #[must_use]
    pub fn kind(&self) -> DirEntryType {
        self.loc.kind
    }

    #[must_use]
    pub fn dir(&self) -> InodeNumber {
        self.loc.dir
    }

    #[must_use]
    pub fn location(&self) -> EntryLocation {
        self.loc
    }
}

/// One name in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub ino: InodeNumber,
    pub kind: DirEntryType,
    pub name: Vec<u8>,
    /// Opaque position cookie: `block_index << 32 | offset`.
    pub cookie: u64,
}

// ── Entry store interface ───────────────────────────────────────────────────

/// Directory-entry storage consumed by the namespace layer.
pub trait EntryStore: Send + Sync {
    /// Create the first block of directory `dir` holding `.` and `..`.
    fn make_empty(
        &mut self,
        dir: InodeNumber,
        parent: InodeNumber,
        alloc: &mut dyn BlockAllocator,
    ) -> Result<()>;

    /// Locate `name` in `dir`.
    fn find(&self, dir: InodeNumber, name: &[u8]) -> Result<EntryHandle>;

    /// Add `name -> ino` to `dir`, growing it by a block if needed.
    fn insert(
        &mut self,
        dir: InodeNumber,
        name: &[u8],
        ino: InodeNumber,
        kind: DirEntryType,
        alloc: &mut dyn BlockAllocator,
    ) -> Result<()>;

    /// Remove the entry `handle` refers to.
    fn delete(&mut self, dir: InodeNumber, handle: EntryHandle) -> Result<()>;

    /// Repoint the entry `handle` refers to at `ino`.
    fn replace(
        &mut self,
        dir: InodeNumber,
        handle: EntryHandle,
        ino: InodeNumber,
        kind: DirEntryType,
    ) -> Result<()>;

    /// Whether `dir` holds only `.` and `..`.
    fn is_empty(&self, dir: InodeNumber) -> Result<bool>;

    /// The `..` entry of `dir`.
    fn dotdot(&self, dir: InodeNumber) -> Result<EntryHandle>;

    /// Every live entry of `dir` in on-disk order.
    fn entries(&self, dir: InodeNumber) -> Result<Vec<DirEntry>>;

    /// Directory size in bytes (allocated blocks times block size).
    fn dir_size(&self, dir: InodeNumber) -> Result<u64>;

    /// Drop all storage for `dir`, returning its blocks to `alloc`.
    fn release_dir(&mut self, dir: InodeNumber, alloc: &mut dyn BlockAllocator) -> Result<()>;

    /// Handles currently alive.
    fn outstanding_handles(&self) -> usize;

    fn is_directory(&self, dir: InodeNumber) -> bool;
}

fn validate_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(FsError::InvalidArgument(
            "directory entry name cannot be empty".to_owned(),
        ));
    }
    if name.len() > EXT2_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    if name.contains(&b'/') || name.contains(&0) {
        return Err(FsError::InvalidArgument(format!(
            "invalid byte in entry name {:?}",
            String::from_utf8_lossy(name)
        )));
    }
    Ok(())
}

fn ino_u32(dir: InodeNumber, ino: InodeNumber) -> Result<u32> {
    ino.to_u32()
        .map_err(|_| FsError::corrupt(dir.0, format!("inode {ino} does not fit an entry")))
}

// ── Block-backed store ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DirBlocks {
    blocks: Vec<(BlockNumber, Vec<u8>)>,
}

/// In-memory ext2 directory storage: each directory is a list of blocks.
#[derive(Debug)]
pub struct BlockDirStore {
    block_size: BlockSize,
    dirs: HashMap<InodeNumber, DirBlocks>,
    leases: Arc<AtomicUsize>,
}

impl BlockDirStore {
    #[must_use]
    pub fn new(block_size: BlockSize) -> Self {
        Self {
            block_size,
            dirs: HashMap::new(),
            leases: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn dir(&self, dir: InodeNumber) -> Result<&DirBlocks> {
        self.dirs.get(&dir).ok_or(FsError::NotDirectory)
    }

    fn dir_mut(&mut self, dir: InodeNumber) -> Result<&mut DirBlocks> {
        self.dirs.get_mut(&dir).ok_or(FsError::NotDirectory)
    }

    fn records(&self, dir: InodeNumber) -> Result<Vec<(usize, DirRecord)>> {
        let data = self.dir(dir)?;
        let mut out = Vec::new();
        for (index, (_, bytes)) in data.blocks.iter().enumerate() {
            let recs = block::parse_dir_block(bytes).map_err(|f| fault(dir, index, f))?;
            out.extend(recs.into_iter().map(|rec| (index, rec)));
        }
        Ok(out)
    }

    fn handle(&self, dir: InodeNumber, block_index: usize, rec: &DirRecord) -> EntryHandle {
        EntryHandle {
            loc: EntryLocation {
                dir,
                block_index,
                offset: rec.offset,
                ino: InodeNumber(u64::from(rec.inode)),
                kind: rec.file_type,
            },
            _lease: Lease::take(&self.leases),
        }
    }

    /// Block bytes at the handle's position, checked to still hold the
    /// handle's inode.
    fn checked_block(&mut self, dir: InodeNumber, handle: &EntryHandle) -> Result<&mut Vec<u8>> {
        let loc = handle.location();
        if loc.dir != dir {
            return Err(FsError::corrupt(
                dir.0,
                format!("entry handle belongs to directory {}", loc.dir),
            ));
        }
        let (_, bytes) = self
            .dir_mut(dir)?
            .blocks
            .get_mut(loc.block_index)
            .ok_or_else(|| FsError::corrupt(dir.0, "entry handle block out of range"))?;
        let current = block::entry_inode_at(bytes, loc.offset).map(u64::from);
        if current != Some(loc.ino.0) {
            return Err(FsError::corrupt(dir.0, "stale entry handle"));
        }
        Ok(bytes)
    }
}

fn fault(dir: InodeNumber, block_index: usize, f: BlockFault) -> FsError {
    FsError::corrupt(dir.0, format!("block {block_index}: {f}"))
}

impl EntryStore for BlockDirStore {
    fn make_empty(
        &mut self,
        dir: InodeNumber,
        parent: InodeNumber,
        alloc: &mut dyn BlockAllocator,
    ) -> Result<()> {
        if self.dirs.contains_key(&dir) {
            return Err(FsError::InvalidArgument(format!(
                "directory {dir} already initialized"
            )));
        }
        let self_ino = ino_u32(dir, dir)?;
        let parent_ino = ino_u32(dir, parent)?;
        let mut bytes = vec![0_u8; self.block_size.bytes()];
        block::init_dir_block(&mut bytes, self_ino, parent_ino).map_err(|f| fault(dir, 0, f))?;
        let blk = alloc.alloc_block()?;
        self.dirs.insert(
            dir,
            DirBlocks {
                blocks: vec![(blk, bytes)],
            },
        );
        debug!(dir = dir.0, parent = parent.0, block = blk.0, "dir_make_empty");
        Ok(())
    }

    fn find(&self, dir: InodeNumber, name: &[u8]) -> Result<EntryHandle> {
        validate_name(name)?;
        let data = self.dir(dir)?;
        for (index, (_, bytes)) in data.blocks.iter().enumerate() {
            if let Some(rec) = block::find_entry(bytes, name).map_err(|f| fault(dir, index, f))? {
                trace!(dir = dir.0, ino = rec.inode, "dir_find_hit");
                return Ok(self.handle(dir, index, &rec));
            }
        }
        Err(FsError::NotFound(String::from_utf8_lossy(name).into_owned()))
    }

    fn insert(
        &mut self,
        dir: InodeNumber,
        name: &[u8],
        ino: InodeNumber,
        kind: DirEntryType,
        alloc: &mut dyn BlockAllocator,
    ) -> Result<()> {
        validate_name(name)?;
        let raw_ino = ino_u32(dir, ino)?;
        if self.records(dir)?.iter().any(|(_, rec)| rec.name == name) {
            return Err(FsError::NameExists);
        }

        let data = self.dir_mut(dir)?;
        for (index, (_, bytes)) in data.blocks.iter_mut().enumerate() {
            if let Some(off) =
                block::add_entry(bytes, raw_ino, name, kind).map_err(|f| fault(dir, index, f))?
            {
                trace!(dir = dir.0, ino = ino.0, block_index = index, offset = off, "dir_insert");
                return Ok(());
            }
        }

        let blk = alloc.alloc_block().map_err(|err| match err {
            FsError::OutOfSpace => FsError::NoSpace,
            other => other,
        })?;
        let mut bytes = vec![0_u8; self.block_size.bytes()];
        let index = self.dir(dir)?.blocks.len();
        let placed = block::init_empty_block(&mut bytes)
            .and_then(|()| block::add_entry(&mut bytes, raw_ino, name, kind));
        match placed {
            Ok(Some(_)) => {}
            Ok(None) => {
                alloc.free_block(blk)?;
                return Err(FsError::NoSpace);
            }
            Err(f) => {
                alloc.free_block(blk)?;
                return Err(fault(dir, index, f));
            }
        }
        self.dir_mut(dir)?.blocks.push((blk, bytes));
        debug!(dir = dir.0, ino = ino.0, block = blk.0, block_index = index, "dir_grow");
        Ok(())
    }

    fn delete(&mut self, dir: InodeNumber, handle: EntryHandle) -> Result<()> {
        let loc = handle.location();
        let bytes = self.checked_block(dir, &handle)?;
        block::remove_entry_at(bytes, loc.offset).map_err(|f| fault(dir, loc.block_index, f))?;
        trace!(dir = dir.0, ino = loc.ino.0, "dir_delete");
        Ok(())
    }

    fn replace(
        &mut self,
        dir: InodeNumber,
        handle: EntryHandle,
        ino: InodeNumber,
        kind: DirEntryType,
    ) -> Result<()> {
        let loc = handle.location();
        let raw_ino = ino_u32(dir, ino)?;
        let bytes = self.checked_block(dir, &handle)?;
        block::set_entry_inode(bytes, loc.offset, raw_ino, kind)
            .map_err(|f| fault(dir, loc.block_index, f))?;
        trace!(dir = dir.0, old = loc.ino.0, new = ino.0, "dir_replace");
        Ok(())
    }

    fn is_empty(&self, dir: InodeNumber) -> Result<bool> {
        for (_, rec) in self.records(dir)? {
            match rec.name.as_slice() {
                b"." if u64::from(rec.inode) == dir.0 => {}
                b".." => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    fn dotdot(&self, dir: InodeNumber) -> Result<EntryHandle> {
        let data = self.dir(dir)?;
        let (_, first) = data
            .blocks
            .first()
            .ok_or_else(|| FsError::corrupt(dir.0, "directory has no blocks"))?;
        let recs = block::parse_dir_block(first).map_err(|f| fault(dir, 0, f))?;
        match recs.get(..2) {
            Some([dot, dotdot]) if dot.name == b"." && dotdot.name == b".." => {
                Ok(self.handle(dir, 0, dotdot))
            }
            _ => Err(FsError::corrupt(dir.0, "missing '..' entry")),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn entries(&self, dir: InodeNumber) -> Result<Vec<DirEntry>> {
        Ok(self
            .records(dir)?
            .into_iter()
            .map(|(index, rec)| DirEntry {
                ino: InodeNumber(u64::from(rec.inode)),
                kind: rec.file_type,
                cookie: ((index as u64) << 32) | rec.offset as u64,
                name: rec.name,
            })
            .collect())
    }

    fn dir_size(&self, dir: InodeNumber) -> Result<u64> {
        let count = self.dir(dir)?.blocks.len() as u64;
        Ok(self.block_size.blocks_to_bytes(count))
    }

    fn release_dir(&mut self, dir: InodeNumber, alloc: &mut dyn BlockAllocator) -> Result<()> {
        let data = self.dirs.remove(&dir).ok_or(FsError::NotDirectory)?;
        for (blk, _) in data.blocks {
            alloc.free_block(blk)?;
        }
        debug!(dir = dir.0, "dir_release");
        Ok(())
    }

    fn outstanding_handles(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }

    fn is_directory(&self, dir: InodeNumber) -> bool {
        self.dirs.contains_key(&dir)
    }
}

// ── Path reconstruction ─────────────────────────────────────────────────────

/// Absolute path of directory `dir`, rebuilt by following `..` to the root
/// and looking up each hop's name in its parent. The root renders as `/`.
pub fn resolve_dir_path(store: &dyn EntryStore, dir: InodeNumber) -> Result<String> {
    let mut components: Vec<String> = Vec::new();
    let mut cur = dir;
    while cur != InodeNumber::ROOT {
        if components.len() >= MAX_PATH_DEPTH {
            return Err(FsError::corrupt(dir.0, "'..' chain does not reach the root"));
        }
        let parent = store.dotdot(cur)?.ino();
        let name = store
            .entries(parent)?
            .into_iter()
            .find(|e| e.ino == cur && e.name != b"." && e.name != b"..")
            .ok_or_else(|| {
                FsError::corrupt(parent.0, format!("no entry names child directory {cur}"))
            })?
            .name;
        components.push(String::from_utf8_lossy(&name).into_owned());
        cur = parent;
    }
    if components.is_empty() {
        return Ok("/".to_owned());
    }
    components.reverse();
    Ok(format!("/{}", components.join("/")))
}
