#![forbid(unsafe_code)]
//! Namespace mutation orchestrator for an ext2-style filesystem.
//!
//! [`Namespace`] exposes one operation per namespace mutation (create,
//! mknod, symlink, link, unlink, mkdir, rmdir, rename, tmpfile) and keeps
//! link counts, `..` linkage, and the audit trail consistent across them.
//! Directory entries live in an [`nsfs_dir::EntryStore`], inode numbers and
//! blocks come from an [`nsfs_alloc::InodeAllocator`], and every successful
//! create/remove/move/rename appends one line through an
//! [`nsfs_audit::AuditLogger`].
//!
//! The orchestrator does no locking of its own. Mutations take `&mut self`;
//! [`SharedNamespace`] is the coarse caller-held lock for multi-threaded use.

mod config;
mod namespace;
mod policy;

pub use config::{FsConfig, NamePolicyKind};
pub use namespace::{Namespace, NamespaceBuilder};
pub use policy::{
    CapacityPolicy, CaseSignal, Clock, FixedClock, LogFreeSpace, MinFreeBytes, NameOp,
    NamePolicy, Preserve, SystemClock,
};

pub use nsfs_alloc::SpaceReport;
pub use nsfs_audit::{AuditSink, AuditStats, FileSink, MemorySink, NullSink};
pub use nsfs_dir::DirEntry;
pub use nsfs_error::{FsError, Result};
pub use nsfs_inode::InodeAttr;
pub use nsfs_types::{DirEntryType, FileType, InodeNumber, RenameFlags};

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

// ── Read-only VFS surface ───────────────────────────────────────────────────

/// Read-only operations a VFS front end calls.
///
/// `Send + Sync` so a front end can serve lookups from several threads.
pub trait FsOps: Send + Sync {
    /// Attributes of `ino`, or `NotFound`.
    fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr>;

    /// Attributes of the child `name` in `parent`. Fails with `NotFound`
    /// when absent, `NotDirectory` when `parent` is not a directory, and
    /// `NameTooLong` when `name` exceeds 255 bytes.
    fn lookup(&self, parent: InodeNumber, name: &[u8]) -> Result<InodeAttr>;

    /// Every entry of `ino`, `.` and `..` included.
    fn readdir(&self, ino: InodeNumber) -> Result<Vec<DirEntry>>;

    fn readlink(&self, ino: InodeNumber) -> Result<Vec<u8>>;
}

impl FsOps for Namespace {
    fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr> {
        Self::getattr(self, ino)
    }

    fn lookup(&self, parent: InodeNumber, name: &[u8]) -> Result<InodeAttr> {
        Self::lookup(self, parent, name)
    }

    fn readdir(&self, ino: InodeNumber) -> Result<Vec<DirEntry>> {
        Self::readdir(self, ino)
    }

    fn readlink(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        Self::readlink(self, ino)
    }
}

// ── Shared handle ───────────────────────────────────────────────────────────

/// A [`Namespace`] behind one mutex.
///
/// Every mutation runs with the lock held, so at most one structural change
/// is in flight at a time.
#[derive(Debug, Clone)]
pub struct SharedNamespace {
    inner: Arc<Mutex<Namespace>>,
}

impl SharedNamespace {
    #[must_use]
    pub fn new(ns: Namespace) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ns)),
        }
    }

    /// Hold the lock across several operations.
    pub fn lock(&self) -> MutexGuard<'_, Namespace> {
        self.inner.lock()
    }

    /// Run `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce(&mut Namespace) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl FsOps for SharedNamespace {
    fn getattr(&self, ino: InodeNumber) -> Result<InodeAttr> {
        self.inner.lock().getattr(ino)
    }

    fn lookup(&self, parent: InodeNumber, name: &[u8]) -> Result<InodeAttr> {
        self.inner.lock().lookup(parent, name)
    }

    fn readdir(&self, ino: InodeNumber) -> Result<Vec<DirEntry>> {
        self.inner.lock().readdir(ino)
    }

    fn readlink(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        self.inner.lock().readlink(ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> FsConfig {
        FsConfig {
            audit_log_path: None,
            ..FsConfig::default()
        }
    }

    #[test]
    fn fs_ops_is_object_safe() {
        let ns = Namespace::new(quiet_config()).unwrap();
        let ops: Box<dyn FsOps> = Box::new(ns);
        let root = ops.getattr(InodeNumber::ROOT).unwrap();
        assert_eq!(root.kind, FileType::Directory);
        assert!(matches!(
            ops.lookup(InodeNumber::ROOT, b"missing"),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn lookup_rejects_overlong_names() {
        let ns = Namespace::new(quiet_config()).unwrap();
        assert!(matches!(
            FsOps::lookup(&ns, InodeNumber::ROOT, &[b'x'; 256]),
            Err(FsError::NameTooLong)
        ));
    }

    #[test]
    fn shared_namespace_serializes_mutations() {
        let shared = SharedNamespace::new(Namespace::new(quiet_config()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for i in 0..16 {
                        let name = format!("t{t}-{i}");
                        shared
                            .with(|ns| ns.create(InodeNumber::ROOT, name.as_bytes(), 0o644))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let entries = shared.readdir(InodeNumber::ROOT).unwrap();
        assert_eq!(entries.len(), 2 + 64);
        assert_eq!(shared.lock().outstanding_handles(), 0);
    }
}
