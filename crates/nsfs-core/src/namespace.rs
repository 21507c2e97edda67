//! The namespace orchestrator.
//!
//! [`Namespace`] sequences calls into the entry store, the inode table,
//! the allocator, and the audit logger so that every mutation leaves link
//! counts and `..` linkage consistent. All mutating methods take
//! `&mut self`: callers serialize access (see [`crate::SharedNamespace`]).

mod rename;

use crate::config::FsConfig;
use crate::policy::{CapacityPolicy, Clock, NameOp, NamePolicy, SystemClock};
use nsfs_alloc::{BitmapAllocator, BlockAllocator, FsGeometry, InodeAllocator, SpaceReport};
use nsfs_audit::{
    AuditLogger, AuditOp, AuditRecord, AuditSink, AuditStats, FileSink, NullSink, fixed_offset,
};
use nsfs_dir::{BlockDirStore, DirEntry, EntryHandle, EntryStore, resolve_dir_path};
use nsfs_error::{FsError, Result};
use nsfs_inode::{Inode, InodeAttr, InodeTable, LinkState, SymlinkBody};
use nsfs_types::{
    BlockSize, DirEntryType, EXT2_FAST_SYMLINK_MAX, EXT2_NAME_LEN, FileType, InodeNumber,
    S_IRWXUGO,
};
use nsfs_xattr::{CREATION_TIME_NAME, XattrIndex, XattrStore};
use std::collections::HashSet;
use tracing::{debug, info, trace, warn};

/// Upper bound on `..` hops when checking ancestry.
const MAX_ANCESTRY_DEPTH: usize = 4096;

/// Validate a name about to be committed to a directory.
fn check_new_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(FsError::InvalidArgument("empty entry name".to_owned()));
    }
    if name.len() > EXT2_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    if name == b"." || name == b".." {
        return Err(FsError::NameExists);
    }
    if name.contains(&b'/') || name.contains(&0) {
        return Err(FsError::InvalidArgument(format!(
            "invalid byte in entry name {:?}",
            String::from_utf8_lossy(name)
        )));
    }
    Ok(())
}

fn lossy(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Assembles a [`Namespace`], overriding the pieces `FsConfig` would pick.
pub struct NamespaceBuilder {
    config: FsConfig,
    sink: Option<Box<dyn AuditSink>>,
    clock: Option<Box<dyn Clock>>,
    names: Option<Box<dyn NamePolicy>>,
    capacity: Option<Box<dyn CapacityPolicy>>,
}

impl NamespaceBuilder {
    #[must_use]
    pub fn audit_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn name_policy(mut self, names: Box<dyn NamePolicy>) -> Self {
        self.names = Some(names);
        self
    }

    #[must_use]
    pub fn capacity_policy(mut self, capacity: Box<dyn CapacityPolicy>) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Format a fresh filesystem holding only the root directory.
    pub fn build(self) -> Result<Namespace> {
        let cfg = self.config;
        let block_size = cfg.block_size()?;
        let geo = FsGeometry::new(
            block_size,
            cfg.blocks_count,
            cfg.inodes_count,
            cfg.reserved_blocks,
        )?;
        let mut alloc = BitmapAllocator::format(geo);
        let mut dirs: Box<dyn EntryStore> = Box::new(BlockDirStore::new(block_size));
        let clock = self.clock.unwrap_or_else(|| Box::new(SystemClock));

        let mut root = Inode::new(InodeNumber::ROOT, FileType::Directory, 0o755, clock.now());
        root.nlink = 2;
        dirs.make_empty(InodeNumber::ROOT, InodeNumber::ROOT, &mut alloc)?;
        root.size = dirs.dir_size(InodeNumber::ROOT)?;
        let mut inodes = InodeTable::new();
        inodes.insert(root);

        let sink = self.sink.unwrap_or_else(|| match &cfg.audit_log_path {
            Some(path) => Box::new(FileSink::new(path)),
            None => Box::new(NullSink),
        });
        let audit = AuditLogger::new(sink, fixed_offset(cfg.audit_utc_offset_secs));
        let names = self.names.unwrap_or_else(|| cfg.name_policy.build());
        let capacity = self.capacity.unwrap_or_else(|| cfg.capacity_policy());

        info!(
            block_size = block_size.get(),
            blocks = cfg.blocks_count,
            inodes = cfg.inodes_count,
            audit_log = ?cfg.audit_log_path,
            "namespace_format"
        );
        Ok(Namespace {
            block_size,
            alloc,
            dirs,
            inodes,
            xattrs: XattrStore::new(block_size.bytes()),
            audit,
            names,
            capacity,
            clock,
            linkable: HashSet::new(),
        })
    }
}

// ── Namespace ───────────────────────────────────────────────────────────────

pub struct Namespace {
    block_size: BlockSize,
    alloc: BitmapAllocator,
    dirs: Box<dyn EntryStore>,
    inodes: InodeTable,
    xattrs: XattrStore,
    audit: AuditLogger,
    names: Box<dyn NamePolicy>,
    capacity: Box<dyn CapacityPolicy>,
    clock: Box<dyn Clock>,
    /// Unnamed tmpfile inodes that may still be given a name.
    linkable: HashSet<InodeNumber>,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("block_size", &self.block_size)
            .field("inodes", &self.inodes.len())
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

impl Namespace {
    /// Format a namespace from `config` with the default collaborators.
    pub fn new(config: FsConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn builder(config: FsConfig) -> NamespaceBuilder {
        NamespaceBuilder {
            config,
            sink: None,
            clock: None,
            names: None,
            capacity: None,
        }
    }

    // ── Internal helpers ────────────────────────────────────────────────

    fn require_dir(&self, dir: InodeNumber) -> Result<()> {
        if self.inodes.get(dir)?.is_dir() && self.dirs.is_directory(dir) {
            Ok(())
        } else {
            Err(FsError::NotDirectory)
        }
    }

    /// Entry insert/delete/replace bookkeeping on the directory inode.
    fn touch_dir(&mut self, dir: InodeNumber) -> Result<()> {
        let now = self.clock.now();
        let size = self.dirs.dir_size(dir)?;
        let inode = self.inodes.get_mut(dir)?;
        inode.touch_mtime_ctime(now);
        inode.size = size;
        Ok(())
    }

    fn audit_path(&self, dir: InodeNumber) -> Option<String> {
        match resolve_dir_path(self.dirs.as_ref(), dir) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(dir = dir.0, error = %err, "audit_path_unresolved");
                None
            }
        }
    }

    fn audit_mutation(&self, op: AuditOp, name: &[u8], dir: InodeNumber) {
        let Some(dir_path) = self.audit_path(dir) else {
            return;
        };
        let record = AuditRecord::Mutation {
            op,
            name: lossy(name),
            dir_path,
        };
        self.audit.record(self.clock.now(), &record);
    }

    fn stamp_creation_time(&mut self, ino: InodeNumber) {
        let now = self.clock.now();
        self.xattrs
            .stamp_creation_time(ino, now, self.audit.offset());
    }

    /// Consult the capacity policy, then reserve and record a new inode.
    fn allocate_inode(
        &mut self,
        parent: InodeNumber,
        kind: FileType,
        mode: u16,
        name: &[u8],
    ) -> Result<InodeNumber> {
        self.capacity.check(self.alloc.free_space_bytes(), kind)?;
        let ino = self.alloc.new_inode(parent, kind, name)?;
        self.inodes
            .insert(Inode::new(ino, kind, mode, self.clock.now()));
        Ok(ino)
    }

    /// Drop every link of a never-published inode and free it.
    fn discard_new_inode(&mut self, ino: InodeNumber) -> Result<()> {
        while let LinkState::Linked(_) = self.inodes.dec_link(ino)? {}
        self.reclaim(ino)
    }

    /// Free an inode and everything it owns.
    fn reclaim(&mut self, ino: InodeNumber) -> Result<()> {
        let Ok(inode) = self.inodes.get(ino) else {
            return Ok(());
        };
        let kind = inode.kind;
        let slow_block = match &inode.symlink {
            Some(SymlinkBody::Slow { block, .. }) => Some(*block),
            _ => None,
        };
        // The record stays in the table until its bitmap bit is released.
        self.alloc.free_inode(ino, kind)?;
        if kind.is_dir() && self.dirs.is_directory(ino) {
            self.dirs.release_dir(ino, &mut self.alloc)?;
        }
        if let Some(block) = slow_block {
            self.alloc.free_block(block)?;
        }
        self.xattrs.remove_all(ino);
        self.linkable.remove(&ino);
        self.inodes.remove(ino);
        debug!(ino = ino.0, kind = ?kind, "inode_reclaim");
        Ok(())
    }

    /// Publish a new non-directory inode under `name`, discarding it if the
    /// entry cannot be added.
    fn add_nondir(
        &mut self,
        parent: InodeNumber,
        name: &[u8],
        ino: InodeNumber,
        kind: FileType,
    ) -> Result<()> {
        if let Err(err) = self
            .dirs
            .insert(parent, name, ino, kind.into(), &mut self.alloc)
        {
            debug!(parent = parent.0, ino = ino.0, error = %err, "add_nondir_failed");
            self.discard_new_inode(ino)?;
            return Err(err);
        }
        self.touch_dir(parent)?;
        self.inodes.mark_dirty(ino);
        Ok(())
    }

    /// Delete a located entry and drop the target's link.
    fn remove_entry(&mut self, parent: InodeNumber, entry: EntryHandle) -> Result<InodeNumber> {
        let target = entry.ino();
        self.dirs.delete(parent, entry)?;
        self.touch_dir(parent)?;
        let ctime = self.inodes.get(parent)?.ctime;
        self.inodes.get_mut(target)?.touch_ctime(ctime);
        self.inodes.dec_link(target)?;
        Ok(target)
    }

    // ── Creation ────────────────────────────────────────────────────────

    /// Create a regular file.
    pub fn create(&mut self, parent: InodeNumber, name: &[u8], mode: u16) -> Result<InodeAttr> {
        self.require_dir(parent)?;
        check_new_name(name)?;
        let name = self
            .names
            .normalize(NameOp::Create, FileType::RegularFile, name);
        let ino = self.allocate_inode(parent, FileType::RegularFile, mode, &name)?;
        self.add_nondir(parent, &name, ino, FileType::RegularFile)?;
        self.stamp_creation_time(ino);
        self.audit_mutation(AuditOp::CreateFile, &name, parent);
        trace!(parent = parent.0, ino = ino.0, "create");
        self.getattr(ino)
    }

    /// Create a device node, fifo, or socket.
    pub fn mknod(
        &mut self,
        parent: InodeNumber,
        name: &[u8],
        kind: FileType,
        mode: u16,
        rdev: u32,
    ) -> Result<InodeAttr> {
        if !kind.is_special() {
            return Err(FsError::InvalidArgument(format!(
                "mknod cannot create {kind:?}"
            )));
        }
        self.require_dir(parent)?;
        check_new_name(name)?;
        let name = self.names.normalize(NameOp::Create, kind, name);
        let ino = self.allocate_inode(parent, kind, mode, &name)?;
        self.inodes.get_mut(ino)?.rdev = rdev;
        self.add_nondir(parent, &name, ino, kind)?;
        trace!(parent = parent.0, ino = ino.0, ?kind, "mknod");
        self.getattr(ino)
    }

    /// Create a symbolic link to `target`.
    ///
    /// Targets that fit the inline area (with their terminator) are stored
    /// in the inode; longer ones take a data block.
    pub fn symlink(
        &mut self,
        parent: InodeNumber,
        name: &[u8],
        target: &[u8],
    ) -> Result<InodeAttr> {
        self.require_dir(parent)?;
        check_new_name(name)?;
        if target.is_empty() {
            return Err(FsError::InvalidArgument("empty symlink target".to_owned()));
        }
        let stored_len = target.len() + 1;
        if stored_len > self.block_size.bytes() {
            return Err(FsError::NameTooLong);
        }
        let name = self.names.normalize(NameOp::Create, FileType::Symlink, name);
        let ino = self.allocate_inode(parent, FileType::Symlink, S_IRWXUGO, &name)?;

        let body = if stored_len > EXT2_FAST_SYMLINK_MAX {
            match self.alloc.alloc_block() {
                Ok(block) => SymlinkBody::Slow {
                    block,
                    target: target.to_vec(),
                },
                Err(err) => {
                    self.discard_new_inode(ino)?;
                    return Err(err);
                }
            }
        } else {
            SymlinkBody::Fast(target.to_vec())
        };
        let inode = self.inodes.get_mut(ino)?;
        inode.size = target.len() as u64;
        inode.symlink = Some(body);

        self.add_nondir(parent, &name, ino, FileType::Symlink)?;
        trace!(parent = parent.0, ino = ino.0, len = target.len(), "symlink");
        self.getattr(ino)
    }

    /// Allocate an unnamed regular file (`O_TMPFILE`).
    ///
    /// The inode starts with no links and one open reference held by the
    /// caller; it can be named later with [`Namespace::link`].
    pub fn tmpfile(&mut self, dir: InodeNumber, mode: u16) -> Result<InodeAttr> {
        self.require_dir(dir)?;
        let ino = self.allocate_inode(dir, FileType::RegularFile, mode, b"")?;
        self.inodes.dec_link(ino)?;
        self.inodes.open(ino)?;
        self.linkable.insert(ino);
        trace!(dir = dir.0, ino = ino.0, "tmpfile");
        self.getattr(ino)
    }

    /// Add a hard link `new_parent/new_name` to `ino`.
    pub fn link(
        &mut self,
        ino: InodeNumber,
        new_parent: InodeNumber,
        new_name: &[u8],
    ) -> Result<InodeAttr> {
        let inode = self.inodes.get(ino)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        if inode.nlink == 0 && !self.linkable.contains(&ino) {
            return Err(FsError::NotFound(format!("inode {ino} has no links")));
        }
        let kind = inode.kind;
        self.require_dir(new_parent)?;
        check_new_name(new_name)?;

        self.inodes.inc_link(ino)?;
        let now = self.clock.now();
        self.inodes.get_mut(ino)?.touch_ctime(now);
        self.inodes.open(ino)?;

        if let Err(err) = self
            .dirs
            .insert(new_parent, new_name, ino, kind.into(), &mut self.alloc)
        {
            self.inodes.dec_link(ino)?;
            self.inodes.release(ino)?;
            return Err(err);
        }
        self.touch_dir(new_parent)?;
        self.linkable.remove(&ino);
        self.inodes.release(ino)?;
        trace!(ino = ino.0, parent = new_parent.0, "link");
        self.getattr(ino)
    }

    // ── Removal ─────────────────────────────────────────────────────────

    /// Remove a non-directory entry.
    pub fn unlink(&mut self, parent: InodeNumber, name: &[u8]) -> Result<()> {
        self.require_dir(parent)?;
        let entry = self.dirs.find(parent, name)?;
        if self.inodes.get(entry.ino())?.is_dir() {
            return Err(FsError::IsDirectory);
        }
        self.audit_mutation(AuditOp::RemoveFile, name, parent);
        let target = self.remove_entry(parent, entry)?;
        trace!(parent = parent.0, ino = target.0, "unlink");
        Ok(())
    }

    /// Create a directory holding `.` and `..`.
    pub fn mkdir(&mut self, parent: InodeNumber, name: &[u8], mode: u16) -> Result<InodeAttr> {
        self.require_dir(parent)?;
        check_new_name(name)?;
        let name = self
            .names
            .normalize(NameOp::Create, FileType::Directory, name);

        // The new directory's ".." references the parent.
        self.inodes.inc_link(parent)?;
        let ino = match self.allocate_inode(parent, FileType::Directory, mode, &name) {
            Ok(ino) => ino,
            Err(err) => {
                self.inodes.dec_link(parent)?;
                return Err(err);
            }
        };
        self.inodes.inc_link(ino)?;

        let linked = self
            .dirs
            .make_empty(ino, parent, &mut self.alloc)
            .and_then(|()| {
                self.dirs
                    .insert(parent, &name, ino, DirEntryType::Dir, &mut self.alloc)
            });
        if let Err(err) = linked {
            debug!(parent = parent.0, ino = ino.0, error = %err, "mkdir_failed");
            self.discard_new_inode(ino)?;
            self.inodes.dec_link(parent)?;
            return Err(err);
        }

        self.touch_dir(parent)?;
        let size = self.dirs.dir_size(ino)?;
        self.inodes.get_mut(ino)?.size = size;
        self.audit_mutation(AuditOp::CreateDirectory, &name, parent);
        self.stamp_creation_time(ino);
        trace!(parent = parent.0, ino = ino.0, "mkdir");
        self.getattr(ino)
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, parent: InodeNumber, name: &[u8]) -> Result<()> {
        self.require_dir(parent)?;
        match name {
            b"." => {
                return Err(FsError::InvalidArgument("cannot remove '.'".to_owned()));
            }
            b".." => return Err(FsError::DirectoryNotEmpty),
            _ => {}
        }
        let entry = self.dirs.find(parent, name)?;
        let target = entry.ino();
        if !self.inodes.get(target)?.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if !self.dirs.is_empty(target)? {
            return Err(FsError::DirectoryNotEmpty);
        }
        self.audit_mutation(AuditOp::RemoveDirectory, name, parent);
        self.remove_entry(parent, entry)?;
        self.inodes.get_mut(target)?.size = 0;
        self.inodes.dec_link(target)?;
        self.inodes.dec_link(parent)?;
        trace!(parent = parent.0, ino = target.0, "rmdir");
        Ok(())
    }

    // ── Open references and reclamation ─────────────────────────────────

    /// Take an open reference on `ino`.
    pub fn open(&mut self, ino: InodeNumber) -> Result<()> {
        self.inodes.open(ino)
    }

    /// Drop an open reference. Returns `true` when `ino` is now reclaimable.
    pub fn release(&mut self, ino: InodeNumber) -> Result<bool> {
        self.inodes.release(ino)
    }

    /// Free every orphaned inode with no open references.
    pub fn reclaim_orphans(&mut self) -> Result<Vec<InodeNumber>> {
        let ready = self.inodes.reclaimable();
        for &ino in &ready {
            self.reclaim(ino)?;
        }
        if !ready.is_empty() {
            debug!(count = ready.len(), "reclaim_orphans");
        }
        Ok(ready)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr> {
        Ok(self.inodes.get(ino)?.attr(self.block_size.get()))
    }

    /// Attributes of `name` in `dir`.
    pub fn lookup(&self, dir: InodeNumber, name: &[u8]) -> Result<InodeAttr> {
        self.require_dir(dir)?;
        let ino = self.dirs.find(dir, name)?.ino();
        self.getattr(ino).map_err(|_| {
            FsError::corrupt(dir.0, format!("entry references missing inode {ino}"))
        })
    }

    /// Inode referenced by the `..` entry of `dir`.
    pub fn get_parent(&self, dir: InodeNumber) -> Result<InodeNumber> {
        self.require_dir(dir)?;
        Ok(self.dirs.dotdot(dir)?.ino())
    }

    pub fn readdir(&self, dir: InodeNumber) -> Result<Vec<DirEntry>> {
        self.require_dir(dir)?;
        self.dirs.entries(dir)
    }

    pub fn readlink(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        self.inodes
            .get(ino)?
            .symlink
            .as_ref()
            .map(|body| body.target().to_vec())
            .ok_or_else(|| FsError::InvalidArgument(format!("inode {ino} is not a symlink")))
    }

    /// Absolute path of directory `dir`.
    pub fn dir_path(&self, dir: InodeNumber) -> Result<String> {
        self.require_dir(dir)?;
        resolve_dir_path(self.dirs.as_ref(), dir)
    }

    /// Walk an absolute path to an inode. Symlinks are not followed.
    pub fn resolve(&self, path: &str) -> Result<InodeNumber> {
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| FsError::InvalidArgument(format!("path must be absolute: {path}")))?;
        let mut cur = InodeNumber::ROOT;
        for component in rest.split('/') {
            match component {
                "" | "." => {}
                ".." => cur = self.get_parent(cur)?,
                name => {
                    self.require_dir(cur)?;
                    cur = self.dirs.find(cur, name.as_bytes())?.ino();
                }
            }
        }
        Ok(cur)
    }

    /// Split an absolute path into its resolved parent and final name.
    pub fn resolve_parent(&self, path: &str) -> Result<(InodeNumber, Vec<u8>)> {
        let trimmed = path.trim_end_matches('/');
        let (dir, name) = trimmed
            .rsplit_once('/')
            .ok_or_else(|| FsError::InvalidArgument(format!("path must be absolute: {path}")))?;
        if name.is_empty() {
            return Err(FsError::InvalidArgument(format!("path has no final name: {path}")));
        }
        let parent = if dir.is_empty() {
            InodeNumber::ROOT
        } else {
            self.resolve(dir)?
        };
        Ok((parent, name.as_bytes().to_vec()))
    }

    /// Value of the `user.creation_time` attribute, if set.
    #[must_use]
    pub fn creation_time(&self, ino: InodeNumber) -> Option<String> {
        self.xattrs
            .get(ino, XattrIndex::User, CREATION_TIME_NAME)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
    }

    #[must_use]
    pub fn xattr_names(&self, ino: InodeNumber) -> Vec<String> {
        self.xattrs.list(ino)
    }

    #[must_use]
    pub fn free_space_bytes(&self) -> u64 {
        self.alloc.free_space_bytes()
    }

    #[must_use]
    pub fn space_report(&self) -> SpaceReport {
        self.alloc.space_report()
    }

    #[must_use]
    pub fn is_orphan(&self, ino: InodeNumber) -> bool {
        self.inodes.is_orphan(ino)
    }

    /// Whether `ino` still holds an allocated inode number.
    #[must_use]
    pub fn is_allocated(&self, ino: InodeNumber) -> bool {
        self.alloc.is_inode_allocated(ino)
    }

    /// Drain the set of inodes modified since the last call.
    pub fn take_dirty(&mut self) -> Vec<InodeNumber> {
        self.inodes.take_dirty()
    }

    #[must_use]
    pub fn audit_stats(&self) -> AuditStats {
        self.audit.stats()
    }

    /// Entry handles currently held; zero between operations.
    #[must_use]
    pub fn outstanding_handles(&self) -> usize {
        self.dirs.outstanding_handles()
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// Every live inode's attributes, in inode order.
    #[must_use]
    pub fn inodes(&self) -> Vec<InodeAttr> {
        let mut all: Vec<_> = self
            .inodes
            .iter()
            .map(|inode| inode.attr(self.block_size.get()))
            .collect();
        all.sort_by_key(|attr| attr.ino);
        all
    }

    /// Fail if `dir` is `ancestor` or lies beneath it.
    fn ensure_not_within(&self, ancestor: InodeNumber, dir: InodeNumber) -> Result<()> {
        let mut cur = dir;
        for _ in 0..MAX_ANCESTRY_DEPTH {
            if cur == ancestor {
                return Err(FsError::InvalidArgument(format!(
                    "cannot move directory {ancestor} beneath itself"
                )));
            }
            if cur == InodeNumber::ROOT {
                return Ok(());
            }
            cur = self.dirs.dotdot(cur)?.ino();
        }
        Err(FsError::corrupt(dir.0, "'..' chain does not reach the root"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{FixedClock, MinFreeBytes};
    use nsfs_audit::MemorySink;
    use std::time::{Duration, SystemTime};

    fn ns() -> (Namespace, MemorySink, FixedClock) {
        let sink = MemorySink::new();
        let clock = FixedClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));
        let ns = Namespace::builder(FsConfig::default())
            .audit_sink(Box::new(sink.clone()))
            .clock(Box::new(clock.clone()))
            .build()
            .unwrap();
        (ns, sink, clock)
    }

    const ROOT: InodeNumber = InodeNumber::ROOT;

    #[test]
    fn fresh_namespace_has_root_only() {
        let (ns, sink, _) = ns();
        let root = ns.getattr(ROOT).unwrap();
        assert_eq!(root.kind, FileType::Directory);
        assert_eq!(root.nlink, 2);
        assert_eq!(root.size, 1024);
        assert_eq!(ns.get_parent(ROOT).unwrap(), ROOT);
        assert_eq!(ns.readdir(ROOT).unwrap().len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn check_new_name_rules() {
        assert!(matches!(check_new_name(b""), Err(FsError::InvalidArgument(_))));
        assert!(matches!(check_new_name(b"."), Err(FsError::NameExists)));
        assert!(matches!(check_new_name(b"a/b"), Err(FsError::InvalidArgument(_))));
        assert!(matches!(
            check_new_name(&[b'n'; 256]),
            Err(FsError::NameTooLong)
        ));
        assert!(check_new_name(&[b'n'; 255]).is_ok());
    }

    #[test]
    fn create_in_non_directory_is_not_directory() {
        let (mut ns, _, _) = ns();
        let f = ns.create(ROOT, b"f", 0o644).unwrap();
        assert!(matches!(
            ns.create(f.ino, b"g", 0o644),
            Err(FsError::NotDirectory)
        ));
    }

    #[test]
    fn rename_within_parent_at_link_limit() {
        use nsfs_types::{EXT2_LINK_MAX, RenameFlags};

        let (mut ns, _, _) = ns();
        let parent = ns.mkdir(ROOT, b"p", 0o755).unwrap().ino;
        let child = ns.mkdir(parent, b"a", 0o755).unwrap().ino;
        ns.mkdir(ROOT, b"c", 0o755).unwrap();
        ns.inodes.get_mut(parent).unwrap().nlink = EXT2_LINK_MAX;

        ns.rename(parent, b"a", parent, b"b", RenameFlags::NONE)
            .unwrap();
        assert_eq!(ns.getattr(parent).unwrap().nlink, EXT2_LINK_MAX);
        assert_eq!(ns.lookup(parent, b"b").unwrap().ino, child);
        assert_eq!(ns.get_parent(child).unwrap(), parent);

        // Moving a directory in from elsewhere still needs a free link.
        let err = ns
            .rename(ROOT, b"c", parent, b"c", RenameFlags::NONE)
            .unwrap_err();
        assert!(matches!(err, FsError::LinkLimitExceeded));
        assert!(ns.lookup(ROOT, b"c").is_ok());
    }

    #[test]
    fn rename_directory_over_sibling_drops_parent_link() {
        use nsfs_types::RenameFlags;

        let (mut ns, _, _) = ns();
        let parent = ns.mkdir(ROOT, b"p", 0o755).unwrap().ino;
        ns.mkdir(parent, b"a", 0o755).unwrap();
        let victim = ns.mkdir(parent, b"b", 0o755).unwrap().ino;
        assert_eq!(ns.getattr(parent).unwrap().nlink, 4);

        ns.rename(parent, b"a", parent, b"b", RenameFlags::NONE)
            .unwrap();
        assert_eq!(ns.getattr(parent).unwrap().nlink, 3);
        assert_eq!(ns.getattr(victim).unwrap().nlink, 0);
        assert!(ns.is_orphan(victim));
    }

    #[test]
    fn refused_inode_free_keeps_record() {
        let (mut ns, _, _) = ns();
        let f = ns.create(ROOT, b"f", 0o644).unwrap();
        ns.unlink(ROOT, b"f").unwrap();
        // Release the bit behind the namespace's back so reclaim's free is refused.
        ns.alloc.free_inode(f.ino, FileType::RegularFile).unwrap();
        let err = ns.reclaim_orphans().unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
        assert!(ns.inodes.contains(f.ino));
        assert!(ns.is_orphan(f.ino));
    }

    #[test]
    fn reserved_inodes_outside_group_zero_refuse_to_format() {
        let cfg = FsConfig {
            inodes_count: 16,
            blocks_count: 4 * 8192 + 1,
            reserved_blocks: 0,
            audit_log_path: None,
            ..FsConfig::default()
        };
        let err = Namespace::builder(cfg)
            .audit_sink(Box::new(MemorySink::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
    }

    #[test]
    fn duplicate_create_discards_new_inode() {
        let (mut ns, sink, _) = ns();
        let first = ns.create(ROOT, b"a", 0o644).unwrap();
        let free_inodes = ns.space_report().free_inodes;
        let err = ns.create(ROOT, b"A", 0o644).unwrap_err();
        assert!(matches!(err, FsError::NameExists));
        assert_eq!(ns.space_report().free_inodes, free_inodes);
        assert_eq!(ns.inodes().len(), 2);
        assert_eq!(ns.getattr(first.ino).unwrap().nlink, 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn directory_times_follow_entry_changes() {
        let (mut ns, _, clock) = ns();
        let before = ns.getattr(ROOT).unwrap().mtime;
        clock.advance(Duration::from_secs(30));
        ns.create(ROOT, b"x", 0o644).unwrap();
        let after = ns.getattr(ROOT).unwrap();
        assert_eq!(after.mtime, before + Duration::from_secs(30));
        assert_eq!(after.ctime, after.mtime);
    }

    #[test]
    fn creation_time_attribute_is_stamped() {
        let (mut ns, _, _) = ns();
        let f = ns.create(ROOT, b"f", 0o644).unwrap();
        let d = ns.mkdir(ROOT, b"d", 0o755).unwrap();
        // 1970-01-12 13:46:40 UTC is 20:46 at +07:00.
        assert_eq!(ns.creation_time(f.ino).as_deref(), Some("20:46 12/01/1970"));
        assert!(ns.creation_time(d.ino).is_some());
        let l = ns.symlink(ROOT, b"l", b"/f").unwrap();
        assert_eq!(ns.creation_time(l.ino), None);
    }

    #[test]
    fn fast_and_slow_symlinks() {
        let (mut ns, _, _) = ns();
        let free = ns.free_space_bytes();
        let short = ns.symlink(ROOT, b"short", &[b'a'; 59]).unwrap();
        assert_eq!(ns.free_space_bytes(), free);
        let long_target = vec![b'b'; 60];
        let long = ns.symlink(ROOT, b"long", &long_target).unwrap();
        assert_eq!(ns.free_space_bytes(), free - 1024);
        assert_eq!(short.size, 59);
        assert_eq!(ns.readlink(long.ino).unwrap(), long_target);
        assert_eq!(short.kind, FileType::Symlink);
        assert_eq!(short.perm, S_IRWXUGO);
    }

    #[test]
    fn symlink_target_limited_by_block_size() {
        let (mut ns, _, _) = ns();
        assert!(ns.symlink(ROOT, b"max", &[b'c'; 1023]).is_ok());
        assert!(matches!(
            ns.symlink(ROOT, b"over", &[b'c'; 1024]),
            Err(FsError::NameTooLong)
        ));
    }

    #[test]
    fn mknod_rejects_non_special_kinds() {
        let (mut ns, _, _) = ns();
        assert!(matches!(
            ns.mknod(ROOT, b"f", FileType::RegularFile, 0o644, 0),
            Err(FsError::InvalidArgument(_))
        ));
        let dev = ns
            .mknod(ROOT, b"tty", FileType::CharDevice, 0o620, 0x0501)
            .unwrap();
        assert_eq!(dev.rdev, 0x0501);
        assert_eq!(ns.lookup(ROOT, b"tty").unwrap().ino, dev.ino);
    }

    #[test]
    fn capacity_policy_refuses_creates() {
        let sink = MemorySink::new();
        let mut ns = Namespace::builder(FsConfig::default())
            .audit_sink(Box::new(sink.clone()))
            .capacity_policy(Box::new(MinFreeBytes(u64::MAX)))
            .build()
            .unwrap();
        assert!(matches!(
            ns.create(ROOT, b"f", 0o644),
            Err(FsError::OutOfSpace)
        ));
        assert!(matches!(
            ns.mkdir(ROOT, b"d", 0o755),
            Err(FsError::OutOfSpace)
        ));
        assert_eq!(ns.getattr(ROOT).unwrap().nlink, 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn resolve_paths() {
        let (mut ns, _, _) = ns();
        let d = ns.mkdir(ROOT, b"d", 0o755).unwrap();
        let f = ns.create(d.ino, b"f", 0o644).unwrap();
        assert_eq!(ns.resolve("/").unwrap(), ROOT);
        assert_eq!(ns.resolve("/d/F").unwrap(), f.ino);
        assert_eq!(ns.resolve("/d/./../d").unwrap(), d.ino);
        assert!(matches!(ns.resolve("/d/F/x"), Err(FsError::NotDirectory)));
        assert!(matches!(ns.resolve("d"), Err(FsError::InvalidArgument(_))));
        assert_eq!(ns.resolve_parent("/d/new").unwrap(), (d.ino, b"new".to_vec()));
        assert_eq!(ns.resolve_parent("/top").unwrap(), (ROOT, b"top".to_vec()));
        assert_eq!(ns.dir_path(d.ino).unwrap(), "/d");
    }

    #[test]
    fn take_dirty_reports_touched_inodes() {
        let (mut ns, _, _) = ns();
        ns.take_dirty();
        let f = ns.create(ROOT, b"f", 0o644).unwrap();
        let dirty = ns.take_dirty();
        assert!(dirty.contains(&ROOT));
        assert!(dirty.contains(&f.ino));
        assert!(ns.take_dirty().is_empty());
    }
}
