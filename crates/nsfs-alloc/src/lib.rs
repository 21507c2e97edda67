#![forbid(unsafe_code)]
//! Inode and block allocation.
//!
//! The namespace layer consumes allocation as a capacity service: it asks
//! for a fresh inode number (or a directory/symlink data block) and later
//! hands it back. Placement follows ext2: files land in their parent's
//! group, directories are spread with an Orlov-style choice.
//!
//! ## Design
//!
//! 1. **Bitmap**: raw bit manipulation on block/inode bitmaps.
//! 2. **GroupStats**: cached per-group free counts.
//! 3. **BitmapAllocator**: in-memory groups implementing [`BlockAllocator`]
//!    and [`InodeAllocator`], plus superblock-level free counters used by
//!    [`available_bytes`].

use nsfs_error::{FsError, Result};
use nsfs_types::{
    BlockNumber, BlockSize, EXT2_FIRST_INO, FileType, GroupNumber, InodeNumber,
    group_index_to_inode, inode_index_in_group, inode_to_group,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

// ── Bitmap operations ───────────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    bitmap
        .get(byte_idx)
        .is_some_and(|byte| (byte >> (idx % 8)) & 1 == 1)
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    if let Some(byte) = bitmap.get_mut((idx / 8) as usize) {
        *byte |= 1 << (idx % 8);
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    if let Some(byte) = bitmap.get_mut((idx / 8) as usize) {
        *byte &= !(1 << (idx % 8));
    }
}

/// Count free (zero) bits in the first `count` bits of `bitmap`.
#[must_use]
pub fn bitmap_count_free(bitmap: &[u8], count: u32) -> u32 {
    (0..count).filter(|&idx| !bitmap_get(bitmap, idx)).count() as u32
}

/// Find the first free (zero) bit in the first `count` bits of `bitmap`,
/// starting from `start` and wrapping around.
#[must_use]
pub fn bitmap_find_free(bitmap: &[u8], count: u32, start: u32) -> Option<u32> {
    (start..count)
        .chain(0..start.min(count))
        .find(|&idx| !bitmap_get(bitmap, idx))
}

// ── Geometry ────────────────────────────────────────────────────────────────

/// Filesystem geometry needed by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsGeometry {
    pub block_size: BlockSize,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub total_blocks: u64,
    pub total_inodes: u32,
    /// Blocks held back from ordinary allocation accounting (`s_r_blocks_count`).
    pub reserved_blocks: u64,
    /// 1 for 1K blocks (block 0 is the boot block), else 0.
    pub first_data_block: u32,
    pub inode_size: u16,
}

impl FsGeometry {
    /// Derive ext2-style geometry: one block bitmap per group bounds the
    /// group to `8 * block_size` blocks, and inodes are spread evenly.
    pub fn new(
        block_size: BlockSize,
        total_blocks: u64,
        total_inodes: u32,
        reserved_blocks: u64,
    ) -> Result<Self> {
        let blocks_per_group = block_size.get() * 8;
        let first_data_block = u32::from(block_size.get() == 1024);
        if total_blocks <= u64::from(first_data_block) {
            return Err(FsError::InvalidArgument(format!(
                "blocks_count={total_blocks} leaves no data blocks"
            )));
        }
        if u64::from(total_inodes) < EXT2_FIRST_INO {
            return Err(FsError::InvalidArgument(format!(
                "inodes_count={total_inodes} is below the reserved inode range"
            )));
        }
        if reserved_blocks > total_blocks {
            return Err(FsError::InvalidArgument(format!(
                "reserved_blocks={reserved_blocks} exceeds blocks_count={total_blocks}"
            )));
        }
        let data_blocks = total_blocks - u64::from(first_data_block);
        let group_count = data_blocks.div_ceil(u64::from(blocks_per_group));
        let group_count = u32::try_from(group_count)
            .map_err(|_| FsError::InvalidArgument("too many block groups".to_owned()))?;
        let inodes_per_group = total_inodes.div_ceil(group_count).max(1);
        // Reserved inode numbers must all fall in group 0.
        if u64::from(inodes_per_group) < EXT2_FIRST_INO {
            return Err(FsError::InvalidArgument(format!(
                "inodes_count={total_inodes} over {group_count} groups leaves \
                 {inodes_per_group} inodes per group, below the reserved inode range"
            )));
        }
        Ok(Self {
            block_size,
            blocks_per_group,
            inodes_per_group,
            total_blocks,
            total_inodes,
            reserved_blocks,
            first_data_block,
            inode_size: 128,
        })
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn group_count(&self) -> u32 {
        let data_blocks = self.total_blocks - u64::from(self.first_data_block);
        data_blocks.div_ceil(u64::from(self.blocks_per_group)) as u32
    }

    /// Number of blocks in a specific group (last group may be shorter).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn blocks_in_group(&self, group: GroupNumber) -> u32 {
        let group_start = u64::from(self.first_data_block)
            + u64::from(group.0) * u64::from(self.blocks_per_group);
        let remaining = self.total_blocks.saturating_sub(group_start);
        remaining.min(u64::from(self.blocks_per_group)) as u32
    }

    /// Number of inodes in a specific group (last group may be shorter).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn inodes_in_group(&self, group: GroupNumber) -> u32 {
        let inode_start = u64::from(group.0) * u64::from(self.inodes_per_group);
        let remaining = u64::from(self.total_inodes).saturating_sub(inode_start);
        remaining.min(u64::from(self.inodes_per_group)) as u32
    }

    /// Blocks at the start of every group taken by bitmaps and the inode table.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn metadata_blocks_per_group(&self) -> u32 {
        let table = (u64::from(self.inodes_per_group) * u64::from(self.inode_size))
            .div_ceil(u64::from(self.block_size.get()));
        2 + table as u32
    }

    /// Absolute block number for a relative block within a group.
    #[must_use]
    pub fn group_block_to_absolute(&self, group: GroupNumber, rel_block: u32) -> BlockNumber {
        BlockNumber(
            u64::from(self.first_data_block)
                + u64::from(group.0) * u64::from(self.blocks_per_group)
                + u64::from(rel_block),
        )
    }

    /// Convert absolute block to (group, relative_block).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn absolute_to_group_block(&self, block: BlockNumber) -> (GroupNumber, u32) {
        let rel = block.0.saturating_sub(u64::from(self.first_data_block));
        let group = (rel / u64::from(self.blocks_per_group)) as u32;
        let offset = (rel % u64::from(self.blocks_per_group)) as u32;
        (GroupNumber(group), offset)
    }
}

// ── Free-space accounting ───────────────────────────────────────────────────

/// Bytes available to ordinary allocation:
/// `max(0, free_blocks - reserved_blocks) * block_size`.
#[must_use]
pub fn available_bytes(free_blocks: u64, reserved_blocks: u64, block_size: BlockSize) -> u64 {
    block_size.blocks_to_bytes(free_blocks.saturating_sub(reserved_blocks))
}

/// Snapshot of superblock-level counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceReport {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub reserved_blocks: u64,
    pub total_inodes: u32,
    pub free_inodes: u64,
    pub available_bytes: u64,
}

// ── Allocation traits ───────────────────────────────────────────────────────

/// Block allocation consumed by directory and symlink storage.
pub trait BlockAllocator {
    /// Allocate a single data block.
    fn alloc_block(&mut self) -> Result<BlockNumber>;

    /// Free a previously allocated block.
    fn free_block(&mut self, block: BlockNumber) -> Result<()>;
}

/// Inode allocation and capacity queries consumed by the namespace layer.
pub trait InodeAllocator: BlockAllocator {
    /// Reserve an inode number for a new object of type `kind` created
    /// under `parent`. Fails with [`FsError::OutOfSpace`] when exhausted.
    fn new_inode(
        &mut self,
        parent: InodeNumber,
        kind: FileType,
        name_hint: &[u8],
    ) -> Result<InodeNumber>;

    /// Return an inode number to the free pool.
    fn free_inode(&mut self, ino: InodeNumber, kind: FileType) -> Result<()>;

    /// `max(0, free_blocks - reserved_blocks) * block_size`.
    fn free_space_bytes(&self) -> u64;

    fn space_report(&self) -> SpaceReport;
}

// ── Group stats ─────────────────────────────────────────────────────────────

/// Cached per-group statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStats {
    pub group: GroupNumber,
    pub free_blocks: u32,
    pub free_inodes: u32,
    pub used_dirs: u32,
}

#[derive(Debug, Clone)]
struct GroupBitmaps {
    blocks: Vec<u8>,
    inodes: Vec<u8>,
}

// ── Bitmap allocator ────────────────────────────────────────────────────────

/// In-memory ext2-style allocator over per-group bitmaps.
#[derive(Debug, Clone)]
pub struct BitmapAllocator {
    geo: FsGeometry,
    groups: Vec<GroupStats>,
    bitmaps: Vec<GroupBitmaps>,
    free_blocks_count: u64,
    free_inodes_count: u64,
}

impl BitmapAllocator {
    /// Build a freshly formatted allocator: group metadata blocks are marked
    /// used in every group, group 0 additionally holds the superblock and
    /// descriptor table, and inodes `1..EXT2_FIRST_INO` are reserved (the
    /// root directory, inode 2, among them).
    #[must_use]
    pub fn format(geo: FsGeometry) -> Self {
        let group_count = geo.group_count();
        let mut groups = Vec::with_capacity(group_count as usize);
        let mut bitmaps = Vec::with_capacity(group_count as usize);
        let mut free_blocks_count = 0_u64;
        let mut free_inodes_count = 0_u64;

        for g in 0..group_count {
            let group = GroupNumber(g);
            let nblocks = geo.blocks_in_group(group);
            let ninodes = geo.inodes_in_group(group);
            let mut blocks = vec![0_u8; geo.blocks_per_group.div_ceil(8) as usize];
            let mut inodes = vec![0_u8; geo.inodes_per_group.div_ceil(8) as usize];

            let mut meta = geo.metadata_blocks_per_group();
            if g == 0 {
                meta += 2;
            }
            for rel in 0..meta.min(nblocks) {
                bitmap_set(&mut blocks, rel);
            }

            let mut used_dirs = 0;
            if g == 0 {
                for idx in 0..(EXT2_FIRST_INO - 1) as u32 {
                    if idx < ninodes {
                        bitmap_set(&mut inodes, idx);
                    }
                }
                used_dirs = 1;
            }

            let free_blocks = bitmap_count_free(&blocks, nblocks);
            let free_inodes = bitmap_count_free(&inodes, ninodes);
            free_blocks_count += u64::from(free_blocks);
            free_inodes_count += u64::from(free_inodes);
            groups.push(GroupStats {
                group,
                free_blocks,
                free_inodes,
                used_dirs,
            });
            bitmaps.push(GroupBitmaps { blocks, inodes });
        }

        debug!(
            groups = group_count,
            free_blocks = free_blocks_count,
            free_inodes = free_inodes_count,
            "alloc_format"
        );
        Self {
            geo,
            groups,
            bitmaps,
            free_blocks_count,
            free_inodes_count,
        }
    }

    #[must_use]
    pub fn is_inode_allocated(&self, ino: InodeNumber) -> bool {
        let group = inode_to_group(ino, self.geo.inodes_per_group);
        let idx = inode_index_in_group(ino, self.geo.inodes_per_group);
        self.bitmaps
            .get(group.0 as usize)
            .is_some_and(|bm| bitmap_get(&bm.inodes, idx))
    }

    fn try_alloc_inode_in_group(&mut self, group: GroupNumber, is_dir: bool) -> Option<InodeNumber> {
        let gidx = group.0 as usize;
        if self.groups.get(gidx)?.free_inodes == 0 {
            return None;
        }
        let ninodes = self.geo.inodes_in_group(group);
        let bm = &mut self.bitmaps[gidx];
        let idx = bitmap_find_free(&bm.inodes, ninodes, 0)?;
        bitmap_set(&mut bm.inodes, idx);
        let gs = &mut self.groups[gidx];
        gs.free_inodes -= 1;
        if is_dir {
            gs.used_dirs += 1;
        }
        self.free_inodes_count -= 1;
        Some(group_index_to_inode(group, idx, self.geo.inodes_per_group))
    }
}

/// Orlov: choose a group for a new directory.
///
/// Prefers groups with above-average free inodes and blocks and the fewest
/// directories; falls back to any group with a free inode.
fn orlov_choose_group_for_dir(groups: &[GroupStats]) -> Option<GroupNumber> {
    if groups.is_empty() {
        return None;
    }
    let n = groups.len() as u64;
    let avg_free_inodes = groups.iter().map(|g| u64::from(g.free_inodes)).sum::<u64>() / n;
    let avg_free_blocks = groups.iter().map(|g| u64::from(g.free_blocks)).sum::<u64>() / n;

    groups
        .iter()
        .filter(|gs| gs.free_inodes > 0)
        .filter(|gs| u64::from(gs.free_inodes) >= avg_free_inodes)
        .filter(|gs| u64::from(gs.free_blocks) >= avg_free_blocks)
        .min_by_key(|gs| gs.used_dirs)
        .or_else(|| groups.iter().find(|gs| gs.free_inodes > 0))
        .map(|gs| gs.group)
}

impl BlockAllocator for BitmapAllocator {
    fn alloc_block(&mut self) -> Result<BlockNumber> {
        for gidx in 0..self.groups.len() {
            if self.groups[gidx].free_blocks == 0 {
                continue;
            }
            let group = self.groups[gidx].group;
            let nblocks = self.geo.blocks_in_group(group);
            let bm = &mut self.bitmaps[gidx];
            if let Some(rel) = bitmap_find_free(&bm.blocks, nblocks, 0) {
                bitmap_set(&mut bm.blocks, rel);
                self.groups[gidx].free_blocks -= 1;
                self.free_blocks_count -= 1;
                let block = self.geo.group_block_to_absolute(group, rel);
                trace!(block = block.0, group = group.0, "block_alloc");
                return Ok(block);
            }
        }
        Err(FsError::OutOfSpace)
    }

    fn free_block(&mut self, block: BlockNumber) -> Result<()> {
        if block.0 < u64::from(self.geo.first_data_block) || block.0 >= self.geo.total_blocks {
            return Err(FsError::InvalidArgument(format!(
                "block {block} outside filesystem"
            )));
        }
        let (group, rel) = self.geo.absolute_to_group_block(block);
        let gidx = group.0 as usize;
        let bm = &mut self.bitmaps[gidx];
        if !bitmap_get(&bm.blocks, rel) {
            return Err(FsError::InvalidArgument(format!(
                "double free of block {block}"
            )));
        }
        bitmap_clear(&mut bm.blocks, rel);
        self.groups[gidx].free_blocks += 1;
        self.free_blocks_count += 1;
        trace!(block = block.0, group = group.0, "block_free");
        Ok(())
    }
}

impl InodeAllocator for BitmapAllocator {
    fn new_inode(
        &mut self,
        parent: InodeNumber,
        kind: FileType,
        name_hint: &[u8],
    ) -> Result<InodeNumber> {
        let is_dir = kind.is_dir();
        let parent_group = inode_to_group(parent, self.geo.inodes_per_group);
        let target = if is_dir {
            orlov_choose_group_for_dir(&self.groups).ok_or(FsError::OutOfSpace)?
        } else {
            parent_group
        };

        let ino = match self.try_alloc_inode_in_group(target, is_dir) {
            Some(ino) => Some(ino),
            None => (0..self.geo.group_count())
                .map(GroupNumber)
                .filter(|g| *g != target)
                .find_map(|g| self.try_alloc_inode_in_group(g, is_dir)),
        };
        let ino = ino.ok_or(FsError::OutOfSpace)?;
        debug!(
            ino = ino.0,
            parent = parent.0,
            ?kind,
            name_hint = %String::from_utf8_lossy(name_hint),
            "inode_alloc"
        );
        Ok(ino)
    }

    fn free_inode(&mut self, ino: InodeNumber, kind: FileType) -> Result<()> {
        if ino.0 < EXT2_FIRST_INO || ino.0 > u64::from(self.geo.total_inodes) {
            return Err(FsError::InvalidArgument(format!(
                "cannot free reserved or out-of-range inode {ino}"
            )));
        }
        let group = inode_to_group(ino, self.geo.inodes_per_group);
        let idx = inode_index_in_group(ino, self.geo.inodes_per_group);
        let gidx = group.0 as usize;
        let bm = &mut self.bitmaps[gidx];
        if !bitmap_get(&bm.inodes, idx) {
            return Err(FsError::InvalidArgument(format!(
                "double free of inode {ino}"
            )));
        }
        bitmap_clear(&mut bm.inodes, idx);
        let gs = &mut self.groups[gidx];
        gs.free_inodes += 1;
        if kind.is_dir() {
            gs.used_dirs = gs.used_dirs.saturating_sub(1);
        }
        self.free_inodes_count += 1;
        debug!(ino = ino.0, ?kind, "inode_free");
        Ok(())
    }

    fn free_space_bytes(&self) -> u64 {
        available_bytes(
            self.free_blocks_count,
            self.geo.reserved_blocks,
            self.geo.block_size,
        )
    }

    fn space_report(&self) -> SpaceReport {
        SpaceReport {
            block_size: self.geo.block_size.get(),
            total_blocks: self.geo.total_blocks,
            free_blocks: self.free_blocks_count,
            reserved_blocks: self.geo.reserved_blocks,
            total_inodes: self.geo.total_inodes,
            free_inodes: self.free_inodes_count,
            available_bytes: self.free_space_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_geometry() -> FsGeometry {
        // Four 8192-block groups at 1K block size.
        FsGeometry::new(BlockSize::new(1024).unwrap(), 4 * 8192 + 1, 1024, 100).unwrap()
    }

    #[test]
    fn bitmap_get_set_clear() {
        let mut bm = vec![0_u8; 4];
        assert!(!bitmap_get(&bm, 9));
        bitmap_set(&mut bm, 9);
        assert!(bitmap_get(&bm, 9));
        assert_eq!(bm[1], 0b0000_0010);
        bitmap_clear(&mut bm, 9);
        assert!(!bitmap_get(&bm, 9));
        // Out-of-range indices are ignored.
        bitmap_set(&mut bm, 1000);
        assert!(!bitmap_get(&bm, 1000));
    }

    #[test]
    fn bitmap_find_free_wraps() {
        let mut bm = vec![0xFF_u8; 2];
        bitmap_clear(&mut bm, 3);
        assert_eq!(bitmap_find_free(&bm, 16, 5), Some(3));
        assert_eq!(bitmap_count_free(&bm, 16), 1);
        bitmap_set(&mut bm, 3);
        assert_eq!(bitmap_find_free(&bm, 16, 0), None);
    }

    #[test]
    fn geometry_from_counts() {
        let geo = make_geometry();
        assert_eq!(geo.first_data_block, 1);
        assert_eq!(geo.blocks_per_group, 8192);
        assert_eq!(geo.group_count(), 4);
        assert_eq!(geo.inodes_per_group, 256);
        assert_eq!(geo.metadata_blocks_per_group(), 2 + 32);
        assert_eq!(
            geo.absolute_to_group_block(geo.group_block_to_absolute(GroupNumber(2), 7)),
            (GroupNumber(2), 7)
        );
    }

    #[test]
    fn geometry_rejects_tiny_inode_table() {
        let err = FsGeometry::new(BlockSize::new(1024).unwrap(), 8192, 4, 0).unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
    }

    #[test]
    fn geometry_rejects_reserved_inodes_outside_group_zero() {
        // 16 inodes over four groups would put inodes 5..=10 in groups 1 and 2.
        let bs = BlockSize::new(1024).unwrap();
        let err = FsGeometry::new(bs, 4 * 8192 + 1, 16, 0).unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
        let geo = FsGeometry::new(bs, 4 * 8192 + 1, 44, 0).unwrap();
        assert_eq!(geo.inodes_per_group, 11);
    }

    #[test]
    fn first_inode_is_never_reserved_and_frees_cleanly() {
        let geo = FsGeometry::new(BlockSize::new(1024).unwrap(), 4 * 8192 + 1, 44, 0).unwrap();
        let mut alloc = BitmapAllocator::format(geo);
        let ino = alloc
            .new_inode(InodeNumber::ROOT, FileType::RegularFile, b"f")
            .unwrap();
        assert!(ino.0 >= EXT2_FIRST_INO);
        alloc.free_inode(ino, FileType::RegularFile).unwrap();
        assert!(!alloc.is_inode_allocated(ino));
    }

    #[test]
    fn available_bytes_clamps_at_zero() {
        let bs = BlockSize::new(4096).unwrap();
        assert_eq!(available_bytes(100, 10, bs), 90 * 4096);
        assert_eq!(available_bytes(10, 10, bs), 0);
        assert_eq!(available_bytes(5, 10, bs), 0);
    }

    #[test]
    fn format_reserves_low_inodes_and_metadata() {
        let alloc = BitmapAllocator::format(make_geometry());
        assert!(alloc.is_inode_allocated(InodeNumber::ROOT));
        assert!(!alloc.is_inode_allocated(InodeNumber(EXT2_FIRST_INO)));
        assert_eq!(alloc.groups[0].free_inodes, 256 - 10);
        assert_eq!(alloc.groups[0].free_blocks, 8192 - 36);
        assert_eq!(alloc.groups[1].free_blocks, 8192 - 34);
    }

    #[test]
    fn file_inode_lands_in_parent_group() {
        let mut alloc = BitmapAllocator::format(make_geometry());
        let ino = alloc
            .new_inode(InodeNumber::ROOT, FileType::RegularFile, b"a")
            .unwrap();
        assert_eq!(ino, InodeNumber(EXT2_FIRST_INO));
        assert_eq!(alloc.space_report().free_inodes, 1024 - 11);
    }

    #[test]
    fn directory_inode_uses_orlov_spread() {
        let mut alloc = BitmapAllocator::format(make_geometry());
        // Group 0 already holds the root directory.
        let ino = alloc
            .new_inode(InodeNumber::ROOT, FileType::Directory, b"d")
            .unwrap();
        assert_ne!(inode_to_group(ino, 256), GroupNumber(0));
    }

    #[test]
    fn inode_alloc_free_roundtrip_and_double_free() {
        let mut alloc = BitmapAllocator::format(make_geometry());
        let ino = alloc
            .new_inode(InodeNumber::ROOT, FileType::RegularFile, b"f")
            .unwrap();
        alloc.free_inode(ino, FileType::RegularFile).unwrap();
        assert!(!alloc.is_inode_allocated(ino));
        let err = alloc.free_inode(ino, FileType::RegularFile).unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
        let err = alloc
            .free_inode(InodeNumber::ROOT, FileType::Directory)
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
    }

    #[test]
    fn inode_exhaustion_is_out_of_space() {
        let geo = FsGeometry::new(BlockSize::new(1024).unwrap(), 8193, 12, 0).unwrap();
        let mut alloc = BitmapAllocator::format(geo);
        alloc
            .new_inode(InodeNumber::ROOT, FileType::RegularFile, b"x")
            .unwrap();
        alloc
            .new_inode(InodeNumber::ROOT, FileType::RegularFile, b"y")
            .unwrap();
        let err = alloc
            .new_inode(InodeNumber::ROOT, FileType::RegularFile, b"z")
            .unwrap_err();
        assert!(matches!(err, FsError::OutOfSpace));
    }

    #[test]
    fn block_alloc_updates_free_space() {
        let mut alloc = BitmapAllocator::format(make_geometry());
        let before = alloc.free_space_bytes();
        let block = alloc.alloc_block().unwrap();
        let (group, rel) = alloc.geo.absolute_to_group_block(block);
        assert!(bitmap_get(&alloc.bitmaps[group.0 as usize].blocks, rel));
        assert_eq!(alloc.free_space_bytes(), before - 1024);
        alloc.free_block(block).unwrap();
        assert_eq!(alloc.free_space_bytes(), before);
        assert!(alloc.free_block(block).is_err());
    }

    #[test]
    fn block_exhaustion_is_out_of_space() {
        let geo = FsGeometry::new(BlockSize::new(1024).unwrap(), 40, 16, 0).unwrap();
        let mut alloc = BitmapAllocator::format(geo);
        let free = alloc.space_report().free_blocks;
        for _ in 0..free {
            alloc.alloc_block().unwrap();
        }
        assert!(matches!(alloc.alloc_block(), Err(FsError::OutOfSpace)));
        assert_eq!(alloc.free_space_bytes(), 0);
    }
}
