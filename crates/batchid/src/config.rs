//! Per-tag allocation settings.
//!
//! Every tag must be configured explicitly: the step size decides how often
//! clients come back to the allocator, so there is no silent default. Settings
//! live in a directory with one JSON document per tag:
//!
//! ```text
//! <dir>/order.json   {"step": 1000}
//! <dir>/user.json    {"step": 100, "start": 10000}
//! ```
//!
//! Files are read on first use and cached for the life of the process. A tag
//! whose file appears later is picked up on its first request.

use crate::{Error, Result, validate_tag};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const fn default_start() -> u64 {
    1
}

/// Allocation settings of one tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagConfig {
    /// Number of IDs reserved per batch.
    pub step: u64,
    /// First ID ever issued for a fresh key. Ignored once the watermark has
    /// moved past it.
    #[serde(default = "default_start")]
    pub start: u64,
}

impl TagConfig {
    pub const fn with_step(step: u64) -> Self {
        Self { step, start: 1 }
    }

    fn validate(&self, tag: &str) -> Result<()> {
        if self.step == 0 {
            return Err(Error::configuration(format!(
                "tag `{tag}` has step 0; step must be at least 1"
            )));
        }
        if self.start == 0 {
            return Err(Error::configuration(format!(
                "tag `{tag}` has start 0; IDs start at 1 or later"
            )));
        }
        Ok(())
    }
}

/// Registry of [`TagConfig`]s, optionally backed by a configuration
/// directory.
#[derive(Debug, Default)]
pub struct TagConfigs {
    dir: Option<PathBuf>,
    cache: RwLock<HashMap<String, TagConfig>>,
}

impl TagConfigs {
    /// A registry that reads `<dir>/<tag>.json` on demand.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            cache: RwLock::default(),
        }
    }

    /// An in-memory registry with the given step sizes and default starts.
    pub fn from_steps<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let cache = steps
            .into_iter()
            .map(|(tag, step)| (tag.into(), TagConfig::with_step(step)))
            .collect();
        Self {
            dir: None,
            cache: RwLock::new(cache),
        }
    }

    /// Adds or replaces the settings of `tag`. In-memory entries take
    /// precedence over the directory.
    #[must_use]
    pub fn with(self, tag: impl Into<String>, config: TagConfig) -> Self {
        self.cache.write().insert(tag.into(), config);
        self
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Returns the settings of `tag`, loading them from disk on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTag`] if the tag name is not usable.
    /// - [`Error::UnconfiguredTag`] if no settings exist for the tag.
    /// - [`Error::Configuration`] if the settings file cannot be read or
    ///   parsed, or holds a zero step/start.
    pub fn get(&self, tag: &str) -> Result<TagConfig> {
        validate_tag(tag)?;

        if let Some(config) = self.cache.read().get(tag).copied() {
            config.validate(tag)?;
            return Ok(config);
        }

        let Some(dir) = &self.dir else {
            return Err(Error::UnconfiguredTag {
                tag: tag.to_owned(),
            });
        };

        let config = load_tag_file(dir, tag)?;
        config.validate(tag)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(tag, step = config.step, start = config.start, "loaded tag configuration");

        Ok(*self.cache.write().entry(tag.to_owned()).or_insert(config))
    }

    /// Shorthand for the step size of `tag`.
    ///
    /// # Errors
    ///
    /// Same as [`TagConfigs::get`].
    pub fn step(&self, tag: &str) -> Result<u64> {
        self.get(tag).map(|c| c.step)
    }
}

fn load_tag_file(dir: &Path, tag: &str) -> Result<TagConfig> {
    let path = dir.join(format!("{tag}.json"));
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::UnconfiguredTag {
                tag: tag.to_owned(),
            });
        }
        Err(e) => {
            return Err(Error::configuration(format!(
                "cannot read {}: {e}",
                path.display()
            )));
        }
    };
    serde_json::from_str(&raw)
        .map_err(|e| Error::configuration(format!("cannot parse {}: {e}", path.display())))
}
