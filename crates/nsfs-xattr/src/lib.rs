#![forbid(unsafe_code)]
//! Extended attributes (xattr).
//!
//! Per-inode attribute storage with namespace routing (`user.`, `trusted.`,
//! `security.`, `system.`). New regular files and directories carry a
//! `user.creation_time` attribute stamped at creation.

use chrono::{DateTime, FixedOffset, Utc};
use nsfs_error::{FsError, Result};
use nsfs_types::InodeNumber;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{trace, warn};

/// Name (without namespace prefix) of the creation-time attribute.
pub const CREATION_TIME_NAME: &[u8] = b"creation_time";

/// Rendering of the creation-time value, e.g. `14:05 03/11/2024`.
pub const CREATION_TIME_FORMAT: &str = "%H:%M %d/%m/%Y";

const XATTR_NAME_MAX: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum XattrIndex {
    User = 1,
    Trusted = 4,
    Security = 6,
    System = 7,
}

impl XattrIndex {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::User => "user.",
            Self::Trusted => "trusted.",
            Self::Security => "security.",
            Self::System => "system.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xattr {
    pub index: XattrIndex,
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl Xattr {
    /// Full attribute name including the namespace prefix.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}{}", self.index.prefix(), String::from_utf8_lossy(&self.name))
    }
}

/// Attribute storage for every inode.
#[derive(Debug)]
pub struct XattrStore {
    max_value_len: usize,
    attrs: HashMap<InodeNumber, Vec<Xattr>>,
}

impl XattrStore {
    /// Values larger than `max_value_len` (one block) are refused.
    #[must_use]
    pub fn new(max_value_len: usize) -> Self {
        Self {
            max_value_len,
            attrs: HashMap::new(),
        }
    }

    /// Insert or overwrite one attribute.
    pub fn set(
        &mut self,
        ino: InodeNumber,
        index: XattrIndex,
        name: &[u8],
        value: &[u8],
    ) -> Result<()> {
        if name.is_empty() {
            return Err(FsError::InvalidArgument("empty xattr name".to_owned()));
        }
        if name.len() > XATTR_NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        if value.len() > self.max_value_len {
            return Err(FsError::NoSpace);
        }
        let list = self.attrs.entry(ino).or_default();
        match list.iter_mut().find(|x| x.index == index && x.name == name) {
            Some(existing) => existing.value = value.to_vec(),
            None => list.push(Xattr {
                index,
                name: name.to_vec(),
                value: value.to_vec(),
            }),
        }
        trace!(ino = ino.0, ?index, len = value.len(), "xattr_set");
        Ok(())
    }

    #[must_use]
    pub fn get(&self, ino: InodeNumber, index: XattrIndex, name: &[u8]) -> Option<&[u8]> {
        self.attrs
            .get(&ino)?
            .iter()
            .find(|x| x.index == index && x.name == name)
            .map(|x| x.value.as_slice())
    }

    #[must_use]
    pub fn list(&self, ino: InodeNumber) -> Vec<String> {
        self.attrs
            .get(&ino)
            .map(|list| list.iter().map(Xattr::full_name).collect())
            .unwrap_or_default()
    }

    /// Drop every attribute of a reclaimed inode.
    pub fn remove_all(&mut self, ino: InodeNumber) {
        self.attrs.remove(&ino);
    }

    /// Stamp `user.creation_time` on `ino`. A failure is logged and
    /// swallowed; object creation never fails on this attribute.
    pub fn stamp_creation_time(&mut self, ino: InodeNumber, at: SystemTime, offset: FixedOffset) {
        let value = format_creation_time(at, offset);
        if let Err(err) = self.set(ino, XattrIndex::User, CREATION_TIME_NAME, value.as_bytes()) {
            warn!(ino = ino.0, error = %err, "creation_time_xattr_failed");
        }
    }
}

/// Render `at` shifted by `offset` as `HH:MM DD/MM/YYYY`.
#[must_use]
pub fn format_creation_time(at: SystemTime, offset: FixedOffset) -> String {
    DateTime::<Utc>::from(at)
        .with_timezone(&offset)
        .format(CREATION_TIME_FORMAT)
        .to_string()
}
