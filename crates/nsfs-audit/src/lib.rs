#![forbid(unsafe_code)]
//! Audit trail for namespace mutations.
//!
//! Every create, remove, rename, and move is described by one
//! [`AuditRecord`], rendered as a single text line:
//!
//! ```text
//! [14:05-03/11/2024]: Create file: 'A.TXT' in directory '/d'
//! [14:05-03/11/2024]: rename: 'a' to 'b' in directory '/d'
//! [14:05-03/11/2024]: move: 'x' (renamed to 'y') from '/d1' to '/d2'
//! [14:05-03/11/2024]: move: 'x' from '/d1' to '/d2'
//! ```
//!
//! Paths are those of the *parent* directories. Timestamps are wall-clock
//! time shifted by a fixed UTC offset chosen at build time.
//!
//! Logging is best-effort: [`AuditLogger::record`] never returns an error.
//! Sink failures are reported through `tracing` and counted.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{trace, warn};

/// Default location of the audit log.
pub const DEFAULT_AUDIT_LOG_PATH: &str = "/var/log/ext2_log";

/// Rendering of the record timestamp, e.g. `14:05-03/11/2024`.
pub const AUDIT_TIME_FORMAT: &str = "%H:%M-%d/%m/%Y";

const DEFAULT_UTC_OFFSET_SECS: i32 = 7 * 3600;

/// Build-time UTC offset: `NSFS_AUDIT_UTC_OFFSET_SECS` when set at compile
/// time, else +07:00.
#[must_use]
pub fn default_utc_offset_secs() -> i32 {
    option_env!("NSFS_AUDIT_UTC_OFFSET_SECS")
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(DEFAULT_UTC_OFFSET_SECS)
}

/// `FixedOffset` for `secs`, falling back to UTC when out of range.
#[must_use]
pub fn fixed_offset(secs: i32) -> FixedOffset {
    FixedOffset::east_opt(secs).unwrap_or_else(|| {
        warn!(secs, "audit_offset_out_of_range");
        Utc.fix()
    })
}

#[must_use]
pub fn format_timestamp(at: SystemTime, offset: FixedOffset) -> String {
    DateTime::<Utc>::from(at)
        .with_timezone(&offset)
        .format(AUDIT_TIME_FORMAT)
        .to_string()
}

// ── Records ─────────────────────────────────────────────────────────────────

/// Plain single-entry mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOp {
    CreateFile,
    CreateDirectory,
    RemoveFile,
    RemoveDirectory,
}

impl AuditOp {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::CreateFile => "Create file",
            Self::CreateDirectory => "Create directory",
            Self::RemoveFile => "Remove file",
            Self::RemoveDirectory => "Remove directory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditRecord {
    Mutation {
        op: AuditOp,
        name: String,
        dir_path: String,
    },
    /// Same-directory rename.
    Rename {
        old_name: String,
        new_name: String,
        dir_path: String,
    },
    /// Cross-directory move, with or without a name change.
    Move {
        old_name: String,
        new_name: String,
        old_path: String,
        new_path: String,
    },
}

impl AuditRecord {
    /// Name of the entry the record is about (the new name for renames).
    #[must_use]
    pub fn primary_name(&self) -> &str {
        match self {
            Self::Mutation { name, .. } => name,
            Self::Rename { new_name, .. } | Self::Move { new_name, .. } => new_name,
        }
    }

    /// Record body without the timestamp prefix or trailing newline.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::Mutation { op, name, dir_path } => {
                format!("{}: '{name}' in directory '{dir_path}'", op.label())
            }
            Self::Rename {
                old_name,
                new_name,
                dir_path,
            } => format!("rename: '{old_name}' to '{new_name}' in directory '{dir_path}'"),
            Self::Move {
                old_name,
                new_name,
                old_path,
                new_path,
            } if old_name != new_name => format!(
                "move: '{old_name}' (renamed to '{new_name}') from '{old_path}' to '{new_path}'"
            ),
            Self::Move {
                old_name,
                old_path,
                new_path,
                ..
            } => format!("move: '{old_name}' from '{old_path}' to '{new_path}'"),
        }
    }

    /// Full log line, newline-terminated.
    #[must_use]
    pub fn render(&self, stamp: &str) -> String {
        format!("[{stamp}]: {}\n", self.body())
    }
}

// ── Sinks ───────────────────────────────────────────────────────────────────

/// Destination for rendered audit lines.
pub trait AuditSink: Send + Sync {
    fn append(&self, line: &str) -> io::Result<()>;
}

/// Appends to a file, opening and closing it for every record.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileSink {
    fn append(&self, line: &str) -> io::Result<()> {
        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o644);
        }
        let mut file = opts.open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

/// Keeps lines in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl AuditSink for MemorySink {
    fn append(&self, line: &str) -> io::Result<()> {
        self.lines.lock().push(line.to_owned());
        Ok(())
    }
}

/// Drops every record (audit disabled).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn append(&self, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

// ── Logger ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub appended: u64,
    pub failed: u64,
}

pub struct AuditLogger {
    sink: Box<dyn AuditSink>,
    offset: FixedOffset,
    appended: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("offset", &self.offset)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    #[must_use]
    pub fn new(sink: Box<dyn AuditSink>, offset: FixedOffset) -> Self {
        Self {
            sink,
            offset,
            appended: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Append one record stamped with `at`. Returns whether the line reached
    /// the sink; a failure is reported on the diagnostics channel only.
    pub fn record(&self, at: SystemTime, record: &AuditRecord) -> bool {
        if record.primary_name().is_empty() {
            warn!(?record, "audit_invalid_entry");
            self.failed.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let line = record.render(&format_timestamp(at, self.offset));
        match self.sink.append(&line) {
            Ok(()) => {
                trace!(line = line.trim_end(), "audit_append");
                self.appended.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                warn!(error = %err, line = line.trim_end(), "audit_append_failed");
                self.failed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> AuditStats {
        AuditStats {
            appended: self.appended.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // 2024-11-03 07:05:00 UTC, 14:05 at +07:00.
    fn at() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_730_617_500)
    }

    fn logger(sink: &MemorySink) -> AuditLogger {
        AuditLogger::new(Box::new(sink.clone()), fixed_offset(7 * 3600))
    }

    #[test]
    fn timestamp_format_applies_offset() {
        assert_eq!(format_timestamp(at(), fixed_offset(7 * 3600)), "14:05-03/11/2024");
        assert_eq!(format_timestamp(at(), fixed_offset(0)), "07:05-03/11/2024");
        assert_eq!(
            format_timestamp(SystemTime::UNIX_EPOCH, fixed_offset(-3600)),
            "23:00-31/12/1969"
        );
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        assert_eq!(fixed_offset(200_000), fixed_offset(0));
    }

    #[test]
    fn mutation_line_shape() {
        let rec = AuditRecord::Mutation {
            op: AuditOp::CreateFile,
            name: "A.TXT".into(),
            dir_path: "/d".into(),
        };
        assert_eq!(
            rec.render("14:05-03/11/2024"),
            "[14:05-03/11/2024]: Create file: 'A.TXT' in directory '/d'\n"
        );
    }

    #[test]
    fn rename_and_move_line_shapes() {
        let rename = AuditRecord::Rename {
            old_name: "a".into(),
            new_name: "B".into(),
            dir_path: "/".into(),
        };
        assert_eq!(rename.body(), "rename: 'a' to 'B' in directory '/'");

        let renamed_move = AuditRecord::Move {
            old_name: "x".into(),
            new_name: "Y".into(),
            old_path: "/d1".into(),
            new_path: "/d2".into(),
        };
        assert_eq!(
            renamed_move.body(),
            "move: 'x' (renamed to 'Y') from '/d1' to '/d2'"
        );

        let plain_move = AuditRecord::Move {
            old_name: "X".into(),
            new_name: "X".into(),
            old_path: "/d1".into(),
            new_path: "/d2".into(),
        };
        assert_eq!(plain_move.body(), "move: 'X' from '/d1' to '/d2'");
    }

    #[test]
    fn op_labels() {
        assert_eq!(AuditOp::CreateDirectory.label(), "Create directory");
        assert_eq!(AuditOp::RemoveFile.label(), "Remove file");
        assert_eq!(AuditOp::RemoveDirectory.label(), "Remove directory");
    }

    #[test]
    fn logger_appends_to_memory_sink() {
        let sink = MemorySink::new();
        let log = logger(&sink);
        let rec = AuditRecord::Mutation {
            op: AuditOp::RemoveDirectory,
            name: "sub".into(),
            dir_path: "/".into(),
        };
        assert!(log.record(at(), &rec));
        assert_eq!(
            sink.lines(),
            vec!["[14:05-03/11/2024]: Remove directory: 'sub' in directory '/'\n"]
        );
        assert_eq!(log.stats(), AuditStats { appended: 1, failed: 0 });
    }

    #[test]
    fn empty_name_is_not_logged() {
        let sink = MemorySink::new();
        let log = logger(&sink);
        let rec = AuditRecord::Mutation {
            op: AuditOp::CreateFile,
            name: String::new(),
            dir_path: "/".into(),
        };
        assert!(!log.record(at(), &rec));
        assert!(sink.is_empty());
        assert_eq!(log.stats().failed, 1);
    }

    #[test]
    fn file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ext2_log");
        let log = AuditLogger::new(Box::new(FileSink::new(&path)), fixed_offset(7 * 3600));
        for name in ["one", "two"] {
            log.record(
                at(),
                &AuditRecord::Mutation {
                    op: AuditOp::CreateFile,
                    name: name.into(),
                    dir_path: "/".into(),
                },
            );
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with("Create file: 'two' in directory '/'\n"));
    }

    #[test]
    fn unwritable_sink_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for append.
        let log = AuditLogger::new(Box::new(FileSink::new(dir.path())), fixed_offset(0));
        let ok = log.record(
            at(),
            &AuditRecord::Mutation {
                op: AuditOp::RemoveFile,
                name: "f".into(),
                dir_path: "/".into(),
            },
        );
        assert!(!ok);
        assert_eq!(log.stats(), AuditStats { appended: 0, failed: 1 });
    }
}
