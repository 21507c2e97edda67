#![forbid(unsafe_code)]
//! Inode management.
//!
//! Inode records, link-count accounting against `EXT2_LINK_MAX`, timestamp
//! updates, and the inode table. The table tracks three things the
//! namespace layer needs beyond plain storage: which inodes were modified
//! (so a writeback layer can flush them), how many open references each
//! inode has, and which inodes dropped to zero links and await reclaim.

use nsfs_error::{FsError, Result};
use nsfs_types::{BlockNumber, EXT2_LINK_MAX, FileType, InodeNumber};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::SystemTime;
use tracing::{debug, trace};

// ── Inode record ────────────────────────────────────────────────────────────

/// Where a symbolic link keeps its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymlinkBody {
    /// Target stored inline in the inode's block-pointer area.
    Fast(Vec<u8>),
    /// Target stored in a separately allocated data block.
    Slow { block: BlockNumber, target: Vec<u8> },
}

impl SymlinkBody {
    #[must_use]
    pub fn target(&self) -> &[u8] {
        match self {
            Self::Fast(target) | Self::Slow { target, .. } => target,
        }
    }
}

/// Result of dropping a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Linked(u32),
    /// No names remain; the inode is reclaimable once unreferenced.
    Orphaned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub ino: InodeNumber,
    pub kind: FileType,
    /// Permission bits (lower 12 bits of mode).
    pub perm: u16,
    pub nlink: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub symlink: Option<SymlinkBody>,
}

impl Inode {
    /// A freshly allocated inode with one link and all timestamps at `now`.
    #[must_use]
    pub fn new(ino: InodeNumber, kind: FileType, mode: u16, now: SystemTime) -> Self {
        Self {
            ino,
            kind,
            perm: mode & 0o7777,
            nlink: 1,
            size: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            symlink: None,
        }
    }

    /// Full POSIX mode (type bits plus permission bits).
    #[must_use]
    pub fn mode(&self) -> u16 {
        self.kind.mode_bits() | self.perm
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Add one link. Fails with [`FsError::LinkLimitExceeded`] at `EXT2_LINK_MAX`.
    pub fn inc_link(&mut self) -> Result<()> {
        if self.nlink >= EXT2_LINK_MAX {
            return Err(FsError::LinkLimitExceeded);
        }
        self.nlink += 1;
        Ok(())
    }

    /// Whether one more link would still fit.
    #[must_use]
    pub fn can_link(&self) -> bool {
        self.nlink < EXT2_LINK_MAX
    }

    /// Drop one link, saturating at zero.
    pub fn dec_link(&mut self) -> LinkState {
        self.nlink = self.nlink.saturating_sub(1);
        if self.nlink == 0 {
            LinkState::Orphaned
        } else {
            LinkState::Linked(self.nlink)
        }
    }

    pub fn touch_ctime(&mut self, now: SystemTime) {
        self.ctime = now;
    }

    pub fn touch_mtime_ctime(&mut self, now: SystemTime) {
        self.mtime = now;
        self.ctime = now;
    }

    /// `stat`-like view of this inode.
    #[must_use]
    pub fn attr(&self, blksize: u32) -> InodeAttr {
        InodeAttr {
            ino: self.ino,
            kind: self.kind,
            perm: self.perm,
            nlink: self.nlink,
            size: self.size,
            uid: self.uid,
            gid: self.gid,
            rdev: self.rdev,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            crtime: self.crtime,
            blksize,
        }
    }
}

/// Inode attributes returned by `getattr`, analogous to POSIX `struct stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeAttr {
    pub ino: InodeNumber,
    pub kind: FileType,
    pub perm: u16,
    pub nlink: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    /// Preferred I/O block size.
    pub blksize: u32,
}

// ── Inode table ─────────────────────────────────────────────────────────────

/// All live inodes plus dirty, open-reference, and orphan bookkeeping.
#[derive(Debug, Default)]
pub struct InodeTable {
    inodes: HashMap<InodeNumber, Inode>,
    dirty: BTreeSet<InodeNumber>,
    open_refs: HashMap<InodeNumber, u32>,
    orphans: BTreeSet<InodeNumber>,
}

impl InodeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a newly allocated inode; it starts dirty.
    pub fn insert(&mut self, inode: Inode) {
        let ino = inode.ino;
        trace!(ino = ino.0, kind = ?inode.kind, "inode_insert");
        self.inodes.insert(ino, inode);
        self.dirty.insert(ino);
    }

    pub fn get(&self, ino: InodeNumber) -> Result<&Inode> {
        self.inodes
            .get(&ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))
    }

    /// Mutable access; the inode is marked dirty.
    pub fn get_mut(&mut self, ino: InodeNumber) -> Result<&mut Inode> {
        let inode = self
            .inodes
            .get_mut(&ino)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))?;
        self.dirty.insert(ino);
        Ok(inode)
    }

    #[must_use]
    pub fn contains(&self, ino: InodeNumber) -> bool {
        self.inodes.contains_key(&ino)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Inode> {
        self.inodes.values()
    }

    pub fn mark_dirty(&mut self, ino: InodeNumber) {
        self.dirty.insert(ino);
    }

    /// Drain the dirty set in inode order.
    pub fn take_dirty(&mut self) -> Vec<InodeNumber> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    // ── Link accounting ─────────────────────────────────────────────────

    pub fn inc_link(&mut self, ino: InodeNumber) -> Result<()> {
        self.get_mut(ino)?.inc_link()?;
        self.orphans.remove(&ino);
        Ok(())
    }

    /// Drop one link; an inode reaching zero joins the orphan list.
    pub fn dec_link(&mut self, ino: InodeNumber) -> Result<LinkState> {
        let state = self.get_mut(ino)?.dec_link();
        if state == LinkState::Orphaned {
            debug!(ino = ino.0, "inode_orphaned");
            self.orphans.insert(ino);
        }
        Ok(state)
    }

    // ── Open references ─────────────────────────────────────────────────

    /// Take an open reference (`iget`).
    pub fn open(&mut self, ino: InodeNumber) -> Result<()> {
        self.get(ino)?;
        *self.open_refs.entry(ino).or_insert(0) += 1;
        Ok(())
    }

    /// Release an open reference (`iput`). Returns `true` when the inode is
    /// now both unlinked and unreferenced.
    pub fn release(&mut self, ino: InodeNumber) -> Result<bool> {
        let refs = self
            .open_refs
            .get_mut(&ino)
            .ok_or_else(|| FsError::InvalidArgument(format!("inode {ino} is not open")))?;
        *refs -= 1;
        if *refs == 0 {
            self.open_refs.remove(&ino);
        }
        Ok(self.is_reclaimable(ino))
    }

    #[must_use]
    pub fn open_refs(&self, ino: InodeNumber) -> u32 {
        self.open_refs.get(&ino).copied().unwrap_or(0)
    }

    // ── Orphans ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn is_orphan(&self, ino: InodeNumber) -> bool {
        self.orphans.contains(&ino)
    }

    #[must_use]
    pub fn is_reclaimable(&self, ino: InodeNumber) -> bool {
        self.orphans.contains(&ino) && self.open_refs(ino) == 0
    }

    /// Orphans with no open references, in inode order.
    #[must_use]
    pub fn reclaimable(&self) -> Vec<InodeNumber> {
        self.orphans
            .iter()
            .copied()
            .filter(|ino| self.open_refs(*ino) == 0)
            .collect()
    }

    /// Remove an inode entirely, returning its record.
    pub fn remove(&mut self, ino: InodeNumber) -> Option<Inode> {
        self.orphans.remove(&ino);
        self.dirty.remove(&ino);
        self.open_refs.remove(&ino);
        let removed = self.inodes.remove(&ino);
        if removed.is_some() {
            trace!(ino = ino.0, "inode_remove");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn file(ino: u64) -> Inode {
        Inode::new(
            InodeNumber(ino),
            FileType::RegularFile,
            0o644,
            SystemTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn new_inode_has_one_link_and_mode() {
        let inode = file(11);
        assert_eq!(inode.nlink, 1);
        assert_eq!(inode.mode(), 0o100_644);
        assert_eq!(inode.crtime, SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn inc_link_stops_at_limit() {
        let mut inode = file(11);
        inode.nlink = EXT2_LINK_MAX - 1;
        assert!(inode.can_link());
        inode.inc_link().unwrap();
        assert!(!inode.can_link());
        assert!(matches!(inode.inc_link(), Err(FsError::LinkLimitExceeded)));
        assert_eq!(inode.nlink, EXT2_LINK_MAX);
    }

    #[test]
    fn dec_link_reports_orphan_and_saturates() {
        let mut inode = file(11);
        inode.nlink = 2;
        assert_eq!(inode.dec_link(), LinkState::Linked(1));
        assert_eq!(inode.dec_link(), LinkState::Orphaned);
        assert_eq!(inode.dec_link(), LinkState::Orphaned);
        assert_eq!(inode.nlink, 0);
    }

    #[test]
    fn table_missing_inode_is_not_found() {
        let table = InodeTable::new();
        assert!(matches!(table.get(InodeNumber(99)), Err(FsError::NotFound(_))));
    }

    #[test]
    fn table_tracks_dirty_set() {
        let mut table = InodeTable::new();
        table.insert(file(11));
        table.insert(file(12));
        assert_eq!(table.take_dirty(), vec![InodeNumber(11), InodeNumber(12)]);
        assert!(table.take_dirty().is_empty());
        table.get_mut(InodeNumber(12)).unwrap().size = 5;
        assert_eq!(table.take_dirty(), vec![InodeNumber(12)]);
    }

    #[test]
    fn orphan_held_open_is_not_reclaimable() {
        let mut table = InodeTable::new();
        table.insert(file(11));
        table.open(InodeNumber(11)).unwrap();
        assert_eq!(
            table.dec_link(InodeNumber(11)).unwrap(),
            LinkState::Orphaned
        );
        assert!(table.is_orphan(InodeNumber(11)));
        assert!(table.reclaimable().is_empty());
        assert!(table.release(InodeNumber(11)).unwrap());
        assert_eq!(table.reclaimable(), vec![InodeNumber(11)]);
        assert!(table.remove(InodeNumber(11)).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn relinking_clears_orphan_status() {
        let mut table = InodeTable::new();
        table.insert(file(11));
        table.dec_link(InodeNumber(11)).unwrap();
        assert!(table.is_orphan(InodeNumber(11)));
        table.inc_link(InodeNumber(11)).unwrap();
        assert!(!table.is_orphan(InodeNumber(11)));
    }

    #[test]
    fn release_without_open_is_rejected() {
        let mut table = InodeTable::new();
        table.insert(file(11));
        assert!(matches!(
            table.release(InodeNumber(11)),
            Err(FsError::InvalidArgument(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn link_count_never_exceeds_limit(start in 0_u32..=EXT2_LINK_MAX, incs in 0_usize..8) {
            let mut inode = file(11);
            inode.nlink = start;
            for _ in 0..incs {
                let _ = inode.inc_link();
            }
            prop_assert!(inode.nlink <= EXT2_LINK_MAX);
            prop_assert_eq!(inode.nlink, start.saturating_add(incs as u32).min(EXT2_LINK_MAX));
        }
    }
}
