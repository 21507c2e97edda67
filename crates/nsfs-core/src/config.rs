//! Filesystem configuration.

use crate::policy::{CapacityPolicy, CaseSignal, LogFreeSpace, MinFreeBytes, NamePolicy, Preserve};
use nsfs_audit::{DEFAULT_AUDIT_LOG_PATH, default_utc_offset_secs};
use nsfs_error::{FsError, Result};
use nsfs_types::BlockSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest block size whose free-slot `rec_len` still fits a u16.
const MAX_DIR_BLOCK_SIZE: u32 = 32 * 1024;

/// Which name normalization to apply on create and rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamePolicyKind {
    /// Uppercase regular files, lowercase directories.
    #[default]
    CaseSignal,
    /// Keep names exactly as given.
    Preserve,
}

impl NamePolicyKind {
    #[must_use]
    pub fn build(self) -> Box<dyn NamePolicy> {
        match self {
            Self::CaseSignal => Box::new(CaseSignal),
            Self::Preserve => Box::new(Preserve),
        }
    }
}

/// Options for formatting and running a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Block size in bytes (power of two, 1024..=32768).
    pub block_size: u32,
    pub inodes_count: u32,
    pub blocks_count: u64,
    /// Blocks excluded from `free_space_bytes`.
    pub reserved_blocks: u64,
    /// Audit log file; `None` disables the audit trail.
    pub audit_log_path: Option<PathBuf>,
    /// UTC offset applied to audit and creation-time stamps.
    pub audit_utc_offset_secs: i32,
    pub name_policy: NamePolicyKind,
    /// Refuse new objects once free space drops below this many bytes.
    pub min_free_bytes: Option<u64>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            inodes_count: 2048,
            blocks_count: 16_384,
            reserved_blocks: 819,
            audit_log_path: Some(PathBuf::from(DEFAULT_AUDIT_LOG_PATH)),
            audit_utc_offset_secs: default_utc_offset_secs(),
            name_policy: NamePolicyKind::default(),
            min_free_bytes: None,
        }
    }
}

impl FsConfig {
    /// Validated block size.
    pub fn block_size(&self) -> Result<BlockSize> {
        let bs = BlockSize::new(self.block_size)
            .map_err(|err| FsError::InvalidArgument(err.to_string()))?;
        if bs.get() > MAX_DIR_BLOCK_SIZE {
            return Err(FsError::InvalidArgument(format!(
                "block_size={} exceeds {MAX_DIR_BLOCK_SIZE}",
                bs.get()
            )));
        }
        Ok(bs)
    }

    #[must_use]
    pub fn capacity_policy(&self) -> Box<dyn CapacityPolicy> {
        match self.min_free_bytes {
            Some(min) => Box::new(MinFreeBytes(min)),
            None => Box::new(LogFreeSpace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_ext2_audit_setup() {
        let cfg = FsConfig::default();
        assert_eq!(cfg.block_size, 1024);
        assert_eq!(
            cfg.audit_log_path.as_deref(),
            Some(std::path::Path::new("/var/log/ext2_log"))
        );
        assert_eq!(cfg.name_policy, NamePolicyKind::CaseSignal);
        assert!(cfg.block_size().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: FsConfig = serde_json::from_str(
            r#"{"block_size": 4096, "name_policy": "preserve", "audit_log_path": null}"#,
        )
        .unwrap();
        assert_eq!(cfg.block_size, 4096);
        assert_eq!(cfg.name_policy, NamePolicyKind::Preserve);
        assert_eq!(cfg.audit_log_path, None);
        assert_eq!(cfg.inodes_count, FsConfig::default().inodes_count);
    }

    #[test]
    fn rejects_bad_block_sizes() {
        for bad in [0, 1000, 512, 65_536] {
            let cfg = FsConfig {
                block_size: bad,
                ..FsConfig::default()
            };
            assert!(matches!(
                cfg.block_size(),
                Err(FsError::InvalidArgument(_))
            ));
        }
    }
}
