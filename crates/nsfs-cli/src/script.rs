//! JSON operation scripts replayed against a fresh namespace.

use nsfs::{FileType, FsError, InodeNumber, Namespace, RenameFlags};
use serde::{Deserialize, Serialize};

fn default_file_mode() -> u16 {
    0o644
}

fn default_dir_mode() -> u16 {
    0o755
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialKind {
    Char,
    Block,
    Fifo,
    Socket,
}

impl From<SpecialKind> for FileType {
    fn from(kind: SpecialKind) -> Self {
        match kind {
            SpecialKind::Char => Self::CharDevice,
            SpecialKind::Block => Self::BlockDevice,
            SpecialKind::Fifo => Self::Fifo,
            SpecialKind::Socket => Self::Socket,
        }
    }
}

/// One namespace operation. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptOp {
    Create {
        path: String,
        #[serde(default = "default_file_mode")]
        mode: u16,
    },
    Mkdir {
        path: String,
        #[serde(default = "default_dir_mode")]
        mode: u16,
    },
    Mknod {
        path: String,
        kind: SpecialKind,
        #[serde(default = "default_file_mode")]
        mode: u16,
        #[serde(default)]
        rdev: u32,
    },
    Symlink {
        path: String,
        target: String,
    },
    Link {
        existing: String,
        path: String,
    },
    Unlink {
        path: String,
    },
    Rmdir {
        path: String,
    },
    Rename {
        from: String,
        to: String,
        #[serde(default)]
        noreplace: bool,
    },
    Reclaim,
}

/// Outcome of one replayed operation.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub op: ScriptOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ino: Option<InodeNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
}

impl StepReport {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

pub fn parse(text: &str) -> serde_json::Result<Vec<ScriptOp>> {
    serde_json::from_str(text)
}

fn apply(ns: &mut Namespace, op: &ScriptOp) -> nsfs::Result<Option<InodeNumber>> {
    match op {
        ScriptOp::Create { path, mode } => {
            let (parent, name) = ns.resolve_parent(path)?;
            Ok(Some(ns.create(parent, &name, *mode)?.ino))
        }
        ScriptOp::Mkdir { path, mode } => {
            let (parent, name) = ns.resolve_parent(path)?;
            Ok(Some(ns.mkdir(parent, &name, *mode)?.ino))
        }
        ScriptOp::Mknod {
            path,
            kind,
            mode,
            rdev,
        } => {
            let (parent, name) = ns.resolve_parent(path)?;
            Ok(Some(ns.mknod(parent, &name, (*kind).into(), *mode, *rdev)?.ino))
        }
        ScriptOp::Symlink { path, target } => {
            let (parent, name) = ns.resolve_parent(path)?;
            Ok(Some(ns.symlink(parent, &name, target.as_bytes())?.ino))
        }
        ScriptOp::Link { existing, path } => {
            let ino = ns.resolve(existing)?;
            let (parent, name) = ns.resolve_parent(path)?;
            Ok(Some(ns.link(ino, parent, &name)?.ino))
        }
        ScriptOp::Unlink { path } => {
            let (parent, name) = ns.resolve_parent(path)?;
            ns.unlink(parent, &name)?;
            Ok(None)
        }
        ScriptOp::Rmdir { path } => {
            let (parent, name) = ns.resolve_parent(path)?;
            ns.rmdir(parent, &name)?;
            Ok(None)
        }
        ScriptOp::Rename {
            from,
            to,
            noreplace,
        } => {
            let (old_dir, old_name) = ns.resolve_parent(from)?;
            let (new_dir, new_name) = ns.resolve_parent(to)?;
            let flags = if *noreplace {
                RenameFlags::NOREPLACE
            } else {
                RenameFlags::NONE
            };
            ns.rename(old_dir, &old_name, new_dir, &new_name, flags)?;
            Ok(None)
        }
        ScriptOp::Reclaim => {
            ns.reclaim_orphans()?;
            Ok(None)
        }
    }
}

/// Apply every operation in order. A failing step is recorded and the
/// replay continues.
pub fn replay(ns: &mut Namespace, ops: Vec<ScriptOp>) -> Vec<StepReport> {
    ops.into_iter()
        .enumerate()
        .map(|(step, op)| {
            let outcome = apply(ns, &op);
            let (ino, error, errno) = match outcome {
                Ok(ino) => (ino, None, None),
                Err(err) => {
                    tracing::debug!(step, error = %err, "script_step_failed");
                    (None, Some(err.to_string()), Some(FsError::to_errno(&err)))
                }
            };
            StepReport {
                step,
                op,
                ino,
                error,
                errno,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsfs::{FsConfig, NullSink};

    fn ns() -> Namespace {
        Namespace::builder(FsConfig {
            audit_log_path: None,
            ..FsConfig::default()
        })
        .audit_sink(Box::new(NullSink))
        .build()
        .unwrap()
    }

    #[test]
    fn parses_tagged_ops_with_defaults() {
        let ops = parse(
            r#"[
                {"op": "mkdir", "path": "/d"},
                {"op": "create", "path": "/d/a.txt", "mode": 420},
                {"op": "mknod", "path": "/d/null", "kind": "char", "rdev": 259},
                {"op": "rename", "from": "/d/A.TXT", "to": "/b.txt"},
                {"op": "reclaim"}
            ]"#,
        )
        .unwrap();
        assert_eq!(
            ops[0],
            ScriptOp::Mkdir {
                path: "/d".to_owned(),
                mode: 0o755
            }
        );
        assert_eq!(
            ops[3],
            ScriptOp::Rename {
                from: "/d/A.TXT".to_owned(),
                to: "/b.txt".to_owned(),
                noreplace: false
            }
        );
        assert!(matches!(ops[2], ScriptOp::Mknod { kind: SpecialKind::Char, rdev: 259, .. }));
        assert_eq!(ops[4], ScriptOp::Reclaim);
    }

    #[test]
    fn replay_records_failures_and_continues() {
        let mut ns = ns();
        let ops = parse(
            r#"[
                {"op": "mkdir", "path": "/d"},
                {"op": "unlink", "path": "/d/missing"},
                {"op": "create", "path": "/d/f"},
                {"op": "rmdir", "path": "/d"}
            ]"#,
        )
        .unwrap();
        let reports = replay(&mut ns, ops);
        assert!(reports[0].ok());
        assert_eq!(reports[1].errno, Some(FsError::NotFound(String::new()).to_errno()));
        assert!(reports[2].ok());
        assert_eq!(
            reports[3].errno,
            Some(FsError::DirectoryNotEmpty.to_errno())
        );
        assert!(ns.resolve("/d/F").is_ok());
    }
}
