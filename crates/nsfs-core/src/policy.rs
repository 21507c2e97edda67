//! Pluggable policies: name normalization, capacity checks, and time.

use nsfs_error::{FsError, Result};
use nsfs_types::FileType;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

// ── Name normalization ──────────────────────────────────────────────────────

/// Operation a name is being normalized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOp {
    Create,
    Rename,
}

/// Rewrites entry names before they are committed to a directory.
pub trait NamePolicy: Send + Sync {
    fn normalize(&self, op: NameOp, kind: FileType, name: &[u8]) -> Vec<u8>;
}

/// Encodes the object type in the name's ASCII case.
///
/// Created regular files are uppercased and created directories lowercased;
/// other creations keep their name. On rename, directories are lowercased
/// and everything else uppercased.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseSignal;

impl NamePolicy for CaseSignal {
    fn normalize(&self, op: NameOp, kind: FileType, name: &[u8]) -> Vec<u8> {
        match (op, kind) {
            (_, FileType::Directory) => name.to_ascii_lowercase(),
            (NameOp::Create, FileType::RegularFile) | (NameOp::Rename, _) => {
                name.to_ascii_uppercase()
            }
            (NameOp::Create, _) => name.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Preserve;

impl NamePolicy for Preserve {
    fn normalize(&self, _op: NameOp, _kind: FileType, name: &[u8]) -> Vec<u8> {
        name.to_vec()
    }
}

// ── Capacity ────────────────────────────────────────────────────────────────

/// Consulted with the current free space before every allocation.
pub trait CapacityPolicy: Send + Sync {
    fn check(&self, free_bytes: u64, kind: FileType) -> Result<()>;
}

/// Reports free space and never refuses.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFreeSpace;

impl CapacityPolicy for LogFreeSpace {
    fn check(&self, free_bytes: u64, kind: FileType) -> Result<()> {
        debug!(free_space_bytes = free_bytes, ?kind, "free_space");
        Ok(())
    }
}

/// Refuses allocation with `OutOfSpace` below a byte threshold.
#[derive(Debug, Clone, Copy)]
pub struct MinFreeBytes(pub u64);

impl CapacityPolicy for MinFreeBytes {
    fn check(&self, free_bytes: u64, kind: FileType) -> Result<()> {
        debug!(free_space_bytes = free_bytes, min = self.0, ?kind, "free_space");
        if free_bytes < self.0 {
            warn!(free_space_bytes = free_bytes, min = self.0, "free_space_below_threshold");
            return Err(FsError::OutOfSpace);
        }
        Ok(())
    }
}

// ── Clock ───────────────────────────────────────────────────────────────────

/// Source of wall-clock time for inode and audit timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually driven clock; clones share the same instant.
#[derive(Debug, Clone)]
pub struct FixedClock(Arc<Mutex<SystemTime>>);

impl FixedClock {
    #[must_use]
    pub fn new(at: SystemTime) -> Self {
        Self(Arc::new(Mutex::new(at)))
    }

    pub fn set(&self, at: SystemTime) {
        *self.0.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        *self.0.lock()
    }
}
