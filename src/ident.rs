use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IdentError;

/// Length of a rendered 256-bit digest.
pub const CHECKSUM_LEN: usize = 64;

/// Wire spelling of the alias for the current latest update.
pub const LATEST: &str = "latest";

/// Returns true if `s` is exactly 64 lowercase hex digits.
pub fn is_checksum(s: &str) -> bool {
    s.len() == CHECKSUM_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Returns true if `s` is a single safe path segment.
///
/// Only ASCII alphanumerics and `.`, `-`, `_` are allowed, so a file name can
/// never carry a separator. `.` and `..` are rejected outright.
pub fn is_file_name(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'))
}

/// A validated content checksum: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    pub fn new(s: impl Into<String>) -> Result<Self, IdentError> {
        let s = s.into();
        if is_checksum(&s) {
            Ok(Self(s))
        } else {
            Err(IdentError::Checksum(s))
        }
    }

    /// Render a raw digest as lowercase hex, two characters per byte.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Checksum {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Checksum {
    type Error = IdentError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> Self {
        c.0
    }
}

impl AsRef<str> for Checksum {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated file name, safe to join onto a storage directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileName(String);

impl FileName {
    pub fn new(s: impl Into<String>) -> Result<Self, IdentError> {
        let s = s.into();
        if is_file_name(&s) {
            Ok(Self(s))
        } else {
            Err(IdentError::FileName(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Archive entry name used for patches and delete markers.
    pub fn patch_name(&self) -> String {
        format!("{}.patch", self.0)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FileName {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for FileName {
    type Error = IdentError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FileName> for String {
    fn from(n: FileName) -> Self {
        n.0
    }
}

impl AsRef<str> for FileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An update reference as a client may spell it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdateId {
    /// Alias for whatever update the catalog currently marks as latest.
    Latest,
    Hash(Checksum),
}

impl FromStr for UpdateId {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == LATEST {
            return Ok(Self::Latest);
        }
        Checksum::new(s)
            .map(Self::Hash)
            .map_err(|_| IdentError::UpdateId(s.to_string()))
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str(LATEST),
            Self::Hash(c) => c.fmt(f),
        }
    }
}
