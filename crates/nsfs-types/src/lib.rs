#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum length of a directory entry name (`EXT2_NAME_LEN`).
pub const EXT2_NAME_LEN: usize = 255;

/// Maximum link count representable by an ext2 inode (`EXT2_LINK_MAX`).
pub const EXT2_LINK_MAX: u32 = 32_000;

/// First inode number available for ordinary objects; 1..=10 are reserved.
pub const EXT2_FIRST_INO: u64 = 11;

/// Size of the inline `i_block` area, which holds "fast" symlink targets.
pub const EXT2_FAST_SYMLINK_MAX: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u64);

/// Block group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupNumber(pub u32);

/// Validated block size (must be a power of two in 1024..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [1024, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(1024..=65536).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 1024..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Block size as a byte count usable for buffer lengths.
    #[must_use]
    pub fn bytes(self) -> usize {
        self.0 as usize
    }

    /// Convert a block count to bytes, saturating on overflow.
    #[must_use]
    pub fn blocks_to_bytes(self, blocks: u64) -> u64 {
        blocks.saturating_mul(u64::from(self.0))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl InodeNumber {
    pub const ROOT: Self = Self(2);

    /// Narrow to the 32-bit inode number stored in a directory entry.
    pub fn to_u32(self) -> Result<u32, ParseError> {
        u32::try_from(self.0).map_err(|_| ParseError::IntegerConversion {
            field: "inode_number",
        })
    }
}

// ── POSIX file mode constants ────────────────────────────────────────────────

/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0o010_000;
/// Character device.
pub const S_IFCHR: u16 = 0o020_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Block device.
pub const S_IFBLK: u16 = 0o060_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;
/// Socket.
pub const S_IFSOCK: u16 = 0o140_000;
/// rwx for user, group and other.
pub const S_IRWXUGO: u16 = 0o777;

/// Filesystem object type carried by every inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    RegularFile,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    /// The `S_IF*` bits for this type.
    #[must_use]
    pub fn mode_bits(self) -> u16 {
        match self {
            Self::RegularFile => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
            Self::BlockDevice => S_IFBLK,
            Self::CharDevice => S_IFCHR,
            Self::Fifo => S_IFIFO,
            Self::Socket => S_IFSOCK,
        }
    }

    #[must_use]
    pub fn is_dir(self) -> bool {
        self == Self::Directory
    }

    /// Device nodes, pipes and sockets.
    #[must_use]
    pub fn is_special(self) -> bool {
        matches!(
            self,
            Self::BlockDevice | Self::CharDevice | Self::Fifo | Self::Socket
        )
    }
}

/// Type hint stored in the `file_type` byte of an ext2 directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DirEntryType {
    Unknown = 0,
    RegFile = 1,
    Dir = 2,
    ChrDev = 3,
    BlkDev = 4,
    Fifo = 5,
    Sock = 6,
    Symlink = 7,
}

impl DirEntryType {
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::RegFile,
            2 => Self::Dir,
            3 => Self::ChrDev,
            4 => Self::BlkDev,
            5 => Self::Fifo,
            6 => Self::Sock,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }
}

impl From<FileType> for DirEntryType {
    fn from(kind: FileType) -> Self {
        match kind {
            FileType::RegularFile => Self::RegFile,
            FileType::Directory => Self::Dir,
            FileType::Symlink => Self::Symlink,
            FileType::BlockDevice => Self::BlkDev,
            FileType::CharDevice => Self::ChrDev,
            FileType::Fifo => Self::Fifo,
            FileType::Socket => Self::Sock,
        }
    }
}

// ── rename(2) flags ─────────────────────────────────────────────────────────

/// Flags accepted by `renameat2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RenameFlags(u32);

impl RenameFlags {
    pub const NONE: Self = Self(0);
    /// Fail instead of replacing an existing target.
    pub const NOREPLACE: Self = Self(1);
    /// Atomically exchange source and target.
    pub const EXCHANGE: Self = Self(1 << 1);
    /// Leave a whiteout at the source.
    pub const WHITEOUT: Self = Self(1 << 2);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bits set in `self` that are not in `allowed`.
    #[must_use]
    pub const fn difference(self, allowed: Self) -> Self {
        Self(self.0 & !allowed.0)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for RenameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ── Group arithmetic ────────────────────────────────────────────────────────

/// Compute the inode's block group from its inode number.
///
/// Inode numbers are 1-indexed; group assignment uses `(ino - 1) / inodes_per_group`.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // group count is u32
pub fn inode_to_group(ino: InodeNumber, inodes_per_group: u32) -> GroupNumber {
    GroupNumber(((ino.0.saturating_sub(1)) / u64::from(inodes_per_group)) as u32)
}

/// Compute the index of an inode within its block group.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // modulo by u32 always fits in u32
pub fn inode_index_in_group(ino: InodeNumber, inodes_per_group: u32) -> u32 {
    ((ino.0.saturating_sub(1)) % u64::from(inodes_per_group)) as u32
}

/// Inverse of [`inode_to_group`] / [`inode_index_in_group`].
#[must_use]
pub fn group_index_to_inode(group: GroupNumber, index: u32, inodes_per_group: u32) -> InodeNumber {
    InodeNumber(u64::from(group.0) * u64::from(inodes_per_group) + u64::from(index) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_validation() {
        assert!(BlockSize::new(4096).is_ok());
        assert!(BlockSize::new(1024).is_ok());
        assert_eq!(BlockSize::new(1024).unwrap().bytes(), 1024);
        assert!(BlockSize::new(3000).is_err());
        assert!(BlockSize::new(512).is_err());
        assert!(BlockSize::new(131_072).is_err());
        assert!(BlockSize::new(0).is_err());
    }

    #[test]
    fn file_type_mode_bits() {
        assert_eq!(FileType::RegularFile.mode_bits(), S_IFREG);
        assert_eq!(FileType::Directory.mode_bits(), S_IFDIR);
        assert_eq!(FileType::Symlink.mode_bits(), S_IFLNK);
        assert_eq!(FileType::Socket.mode_bits(), S_IFSOCK);
        assert!(FileType::Fifo.is_special());
        assert!(!FileType::Directory.is_special());
    }

    #[test]
    fn dir_entry_type_matches_ext2_codes() {
        assert_eq!(DirEntryType::from(FileType::RegularFile) as u8, 1);
        assert_eq!(DirEntryType::from(FileType::Directory) as u8, 2);
        assert_eq!(DirEntryType::from(FileType::Symlink) as u8, 7);
        assert_eq!(DirEntryType::from_raw(9), DirEntryType::Unknown);
    }

    #[test]
    fn rename_flags_difference() {
        let flags = RenameFlags::NOREPLACE | RenameFlags::WHITEOUT;
        assert!(flags.contains(RenameFlags::NOREPLACE));
        assert_eq!(flags.difference(RenameFlags::NOREPLACE), RenameFlags::WHITEOUT);
        assert!(RenameFlags::NOREPLACE.difference(RenameFlags::NOREPLACE).is_empty());
    }

    #[test]
    fn test_inode_group_math() {
        assert_eq!(inode_to_group(InodeNumber(1), 8192), GroupNumber(0));
        assert_eq!(inode_to_group(InodeNumber(8193), 8192), GroupNumber(1));
        assert_eq!(inode_index_in_group(InodeNumber(8193), 8192), 0);
        assert_eq!(
            group_index_to_inode(GroupNumber(1), 0, 8192),
            InodeNumber(8193)
        );
    }

    #[test]
    fn inode_number_narrowing() {
        assert_eq!(InodeNumber(42).to_u32(), Ok(42));
        assert!(InodeNumber(u64::from(u32::MAX) + 1).to_u32().is_err());
    }
}
