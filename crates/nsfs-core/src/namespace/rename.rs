//! Rename and cross-directory move.
//!
//! Everything up to the audit record is validation and can fail without
//! side effects. From the first entry mutation on, a failure is returned
//! as-is: earlier steps are not undone.

use super::{Namespace, check_new_name, lossy};
use crate::policy::NameOp;
use nsfs_audit::AuditRecord;
use nsfs_dir::EntryHandle;
use nsfs_error::{FsError, Result};
use nsfs_types::{DirEntryType, InodeNumber, RenameFlags};
use tracing::{debug, trace};

/// Validated rename, holding every handle the mutation phase needs.
struct RenamePlan {
    src: InodeNumber,
    src_is_dir: bool,
    src_kind: DirEntryType,
    old_entry: EntryHandle,
    new_name: Vec<u8>,
    target: Option<Target>,
    /// `..` of a directory changing parents.
    dotdot: Option<EntryHandle>,
}

struct Target {
    entry: EntryHandle,
    ino: InodeNumber,
}

impl Namespace {
    /// Rename `old_dir/old_name` to `new_dir/new_name`.
    ///
    /// Only [`RenameFlags::NOREPLACE`] is accepted. An existing target is
    /// replaced in place so the new name never disappears.
    ///
    /// The audit line is written once validation passes and before the first
    /// entry mutation. It stays in the log if a later step (such as growing
    /// `new_dir` when the disk is full) fails.
    pub fn rename(
        &mut self,
        old_dir: InodeNumber,
        old_name: &[u8],
        new_dir: InodeNumber,
        new_name: &[u8],
        flags: RenameFlags,
    ) -> Result<()> {
        let unsupported = flags.difference(RenameFlags::NOREPLACE);
        if !unsupported.is_empty() {
            return Err(FsError::InvalidArgument(format!(
                "unsupported rename flags {:#x}",
                unsupported.bits()
            )));
        }
        let Some(plan) = self.plan_rename(old_dir, old_name, new_dir, new_name, flags)? else {
            return Ok(());
        };
        self.audit_rename(old_dir, old_name, new_dir, &plan.new_name);
        self.apply_rename(old_dir, new_dir, plan)
    }

    /// Validate a rename. `None` means source and target are the same inode.
    fn plan_rename(
        &self,
        old_dir: InodeNumber,
        old_name: &[u8],
        new_dir: InodeNumber,
        new_name: &[u8],
        flags: RenameFlags,
    ) -> Result<Option<RenamePlan>> {
        self.require_dir(old_dir)?;
        self.require_dir(new_dir)?;
        if old_name == b"." || old_name == b".." {
            return Err(FsError::InvalidArgument(format!(
                "cannot rename {:?}",
                lossy(old_name)
            )));
        }
        check_new_name(new_name)?;

        let old_entry = self.dirs.find(old_dir, old_name)?;
        let src = old_entry.ino();
        let src_inode = self.inodes.get(src)?;
        let src_is_dir = src_inode.is_dir();
        let src_kind = DirEntryType::from(src_inode.kind);
        let new_name = self.names.normalize(NameOp::Rename, src_inode.kind, new_name);
        let cross_dir = old_dir != new_dir;

        if src_is_dir && cross_dir {
            self.ensure_not_within(src, new_dir)?;
        }

        let target = match self.dirs.find(new_dir, &new_name) {
            Ok(entry) => Some(Target {
                ino: entry.ino(),
                entry,
            }),
            Err(FsError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        if let Some(target) = &target {
            if target.ino == src {
                trace!(ino = src.0, "rename_same_inode");
                return Ok(None);
            }
            if flags.contains(RenameFlags::NOREPLACE) {
                return Err(FsError::NameExists);
            }
            let target_is_dir = self.inodes.get(target.ino)?.is_dir();
            match (src_is_dir, target_is_dir) {
                (true, false) => return Err(FsError::NotDirectory),
                (false, true) => return Err(FsError::IsDirectory),
                (true, true) if !self.dirs.is_empty(target.ino)? => {
                    return Err(FsError::DirectoryNotEmpty);
                }
                _ => {}
            }
        } else if src_is_dir && cross_dir && !self.inodes.get(new_dir)?.can_link() {
            return Err(FsError::LinkLimitExceeded);
        }

        let dotdot = if src_is_dir && cross_dir {
            Some(self.dirs.dotdot(src)?)
        } else {
            None
        };

        Ok(Some(RenamePlan {
            src,
            src_is_dir,
            src_kind,
            old_entry,
            new_name,
            target,
            dotdot,
        }))
    }

    fn audit_rename(
        &self,
        old_dir: InodeNumber,
        old_name: &[u8],
        new_dir: InodeNumber,
        new_name: &[u8],
    ) {
        let record = if old_dir == new_dir {
            let Some(dir_path) = self.audit_path(new_dir) else {
                return;
            };
            AuditRecord::Rename {
                old_name: lossy(old_name),
                new_name: lossy(new_name),
                dir_path,
            }
        } else {
            let (Some(old_path), Some(new_path)) =
                (self.audit_path(old_dir), self.audit_path(new_dir))
            else {
                return;
            };
            AuditRecord::Move {
                old_name: lossy(old_name),
                new_name: lossy(new_name),
                old_path,
                new_path,
            }
        };
        self.audit.record(self.clock.now(), &record);
    }

    fn apply_rename(
        &mut self,
        old_dir: InodeNumber,
        new_dir: InodeNumber,
        plan: RenamePlan,
    ) -> Result<()> {
        let RenamePlan {
            src,
            src_is_dir,
            src_kind,
            old_entry,
            new_name,
            target,
            dotdot,
        } = plan;
        let cross_dir = old_dir != new_dir;
        let replaced = target.is_some();

        if let Some(Target { entry, ino: victim }) = target {
            self.dirs.replace(new_dir, entry, src, src_kind)?;
            self.touch_dir(new_dir)?;
            let ctime = self.clock.now();
            self.inodes.get_mut(victim)?.touch_ctime(ctime);
            if src_is_dir {
                // The replaced directory's "." goes with it.
                self.inodes.dec_link(victim)?;
            }
            self.inodes.dec_link(victim)?;
            debug!(victim = victim.0, "rename_replaced_target");
        } else {
            self.dirs
                .insert(new_dir, &new_name, src, src_kind, &mut self.alloc)?;
            self.touch_dir(new_dir)?;
            if src_is_dir && cross_dir {
                self.inodes.inc_link(new_dir)?;
            }
        }

        let now = self.clock.now();
        self.inodes.get_mut(src)?.touch_ctime(now);

        self.dirs.delete(old_dir, old_entry)?;
        self.touch_dir(old_dir)?;

        if let Some(dotdot) = dotdot {
            self.dirs.replace(src, dotdot, new_dir, DirEntryType::Dir)?;
            self.inodes.mark_dirty(src);
        }
        // Unchanged only for a plain rename of a directory within one parent.
        if src_is_dir && (cross_dir || replaced) {
            self.inodes.dec_link(old_dir)?;
        }
        trace!(
            src = src.0,
            old_dir = old_dir.0,
            new_dir = new_dir.0,
            "rename"
        );
        Ok(())
    }
}
