//! Order-independent digest over the `(name, mtime)` pairs of a directory's
//! immediate entries.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use glob::Pattern;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "PROCESSING",
    "READY",
    "FAILED_*",
    "STATUS_*",
    "*.txt",
    ".*",
];

const NONE: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Sentinel for a missing or empty directory.
    pub fn none() -> Self {
        Self(NONE.to_string())
    }

    pub fn is_none(&self) -> bool {
        self.0 == NONE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Restores a fingerprint previously rendered with `as_str`.
    pub fn from_stored(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw.to_string()))
        }
    }

    pub fn of_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, SystemTime)>,
    {
        let mut pairs: Vec<(&str, u128)> = entries
            .into_iter()
            .map(|(name, mtime)| (name, nanos_since_epoch(mtime)))
            .collect();
        if pairs.is_empty() {
            return Self::none();
        }
        pairs.sort_unstable();

        let mut hasher = Sha256::new();
        for (name, nanos) in pairs {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(nanos.to_le_bytes());
            hasher.update([b'\n']);
        }
        let digest = hasher.finalize();
        Self(digest.iter().map(|byte| format!("{byte:02x}")).collect())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str(NONE)
        } else {
            f.write_str(&self.0[..12.min(self.0.len())])
        }
    }
}

fn nanos_since_epoch(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0)
}

/// Names excluded from fingerprints and snapshots (markers, notes, dotfiles).
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    patterns: Vec<Pattern>,
}

impl IgnoreSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|raw| {
                let raw = raw.as_ref().trim();
                if raw.is_empty() {
                    return None;
                }
                match Pattern::new(raw) {
                    Ok(pattern) => Some(pattern),
                    Err(err) => {
                        warn!(pattern = raw, error = %err, "ignoring invalid ignore pattern");
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    /// Adds an exact file name, with glob metacharacters taken literally.
    pub fn with_name(mut self, name: &str) -> Self {
        if let Ok(pattern) = Pattern::new(&Pattern::escape(name)) {
            self.patterns.push(pattern);
        }
        self
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(name))
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORE_PATTERNS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub fingerprint: Fingerprint,
    pub entries: usize,
}

impl Observation {
    pub fn empty() -> Self {
        Self {
            fingerprint: Fingerprint::none(),
            entries: 0,
        }
    }
}

/// Fingerprints the non-ignored immediate entries of `dir`.
///
/// A directory that does not exist yet observes as empty. Entries that vanish
/// between listing and `stat` are skipped; the next tick sees the new state.
pub fn observe(dir: &Path, ignore: &IgnoreSet) -> io::Result<Observation> {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Observation::empty()),
        Err(err) => return Err(err),
    };

    let mut entries: Vec<(String, SystemTime)> = Vec::new();
    for entry in listing {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if ignore.matches(&name) {
            continue;
        }
        let modified = match entry.metadata().and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        entries.push((name, modified));
    }

    let fingerprint = Fingerprint::of_entries(entries.iter().map(|(n, t)| (n.as_str(), *t)));
    Ok(Observation {
        fingerprint,
        entries: entries.len(),
    })
}
