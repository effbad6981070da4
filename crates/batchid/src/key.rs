use crate::{Error, Result};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Longest tag name accepted, in bytes.
pub const MAX_TAG_LEN: usize = 128;

/// Checks that `tag` can name a sequence.
///
/// Tags name files in the tag configuration directory and in file storage, so
/// they are restricted to ASCII alphanumerics, `_`, `-` and `.`, must not be
/// empty, must not start with `.`, and must fit in [`MAX_TAG_LEN`] bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidTag`] describing the first violated rule.
pub fn validate_tag(tag: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(Error::InvalidTag {
            tag: tag.to_owned(),
            reason: reason.to_owned(),
        })
    };

    if tag.is_empty() {
        return invalid("tag must not be empty");
    }
    if tag.len() > MAX_TAG_LEN {
        return invalid("tag is longer than 128 bytes");
    }
    if tag.starts_with('.') {
        return invalid("tag must not start with `.`");
    }
    if !tag
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return invalid("tag may only contain ASCII alphanumerics, `_`, `-` and `.`");
    }
    Ok(())
}

/// Sub-partition of a tag. Every shard of a tag owns an independent counter.
///
/// Callers that do not partition per entity use [`ShardKey::default`], the
/// integer shard `0`. Integer and string shards never alias: `Int(5)` and
/// `Str("5")` are different counters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShardKey {
    Int(i64),
    Str(String),
}

impl Default for ShardKey {
    fn default() -> Self {
        Self::Int(0)
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for ShardKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ShardKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for ShardKey {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for ShardKey {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&ShardKey> for ShardKey {
    fn from(value: &ShardKey) -> Self {
        value.clone()
    }
}

/// A `(tag, shard)` pair: the unit that owns one watermark, one allocator
/// lock and one client cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeqKey {
    pub tag: String,
    pub shard: ShardKey,
}

impl SeqKey {
    pub fn new(tag: impl Into<String>, shard: impl Into<ShardKey>) -> Self {
        Self {
            tag: tag.into(),
            shard: shard.into(),
        }
    }
}

impl fmt::Display for SeqKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tag, self.shard)
    }
}
