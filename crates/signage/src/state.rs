//! Shared state files read by the slideshow viewer: content mode, display
//! power and the fingerprint of the last published batch.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use serde::Serialize;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Normal,
    OffDeck,
    /// Slideshow stopped entirely.
    None,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::OffDeck => "off-deck",
            Mode::None => "none",
        }
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "normal" => Ok(Mode::Normal),
            "off-deck" => Ok(Mode::OffDeck),
            "none" => Ok(Mode::None),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "on",
            PowerState::Off => "off",
        }
    }
}

impl FromStr for PowerState {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "on" => Ok(PowerState::On),
            "off" => Ok(PowerState::Off),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted cross-process state. Unreadable or unrecognised content loads
/// as `None`, which callers treat as "unknown, rewrite".
pub trait StateStore: Send + Sync {
    fn mode(&self) -> Result<Option<Mode>>;
    fn set_mode(&self, mode: Mode) -> Result<()>;
    fn power(&self) -> Result<Option<PowerState>>;
    fn set_power(&self, power: PowerState) -> Result<()>;
    fn published(&self) -> Result<Option<Fingerprint>>;
    fn set_published(&self, fingerprint: &Fingerprint) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileStateStore {
    mode_path: PathBuf,
    power_path: PathBuf,
    published_path: PathBuf,
}

impl FileStateStore {
    pub fn new(mode_path: PathBuf, power_path: PathBuf, published_path: PathBuf) -> Self {
        Self {
            mode_path,
            power_path,
            published_path,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.mode_file.clone(),
            settings.power_file.clone(),
            settings.published_file(),
        )
    }
}

impl StateStore for FileStateStore {
    fn mode(&self) -> Result<Option<Mode>> {
        Ok(read_line(&self.mode_path)?.and_then(|raw| raw.parse().ok()))
    }

    fn set_mode(&self, mode: Mode) -> Result<()> {
        write_line(&self.mode_path, mode.as_str())
    }

    fn power(&self) -> Result<Option<PowerState>> {
        Ok(read_line(&self.power_path)?.and_then(|raw| raw.parse().ok()))
    }

    fn set_power(&self, power: PowerState) -> Result<()> {
        write_line(&self.power_path, power.as_str())
    }

    fn published(&self) -> Result<Option<Fingerprint>> {
        Ok(read_line(&self.published_path)?.and_then(|raw| Fingerprint::from_stored(&raw)))
    }

    fn set_published(&self, fingerprint: &Fingerprint) -> Result<()> {
        write_line(&self.published_path, fingerprint.as_str())
    }
}

fn read_line(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text.lines().next().map(|line| line.trim().to_string())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::io("read", path, err)),
    }
}

/// Writes through a sibling temp file so readers never see a partial line.
pub(crate) fn write_line(path: &Path, value: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::io("create directory", parent, err))?;
    }
    let tmp = temp_sibling(path);
    fs::write(&tmp, format!("{value}\n")).map_err(|err| Error::io("write", &tmp, err))?;
    fs::rename(&tmp, path).map_err(|err| Error::io("rename into place", path, err))
}

pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// In-memory store for tests and dry runs. Counts writes so debouncing can
/// be asserted.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default, Clone)]
struct MemoryState {
    mode: Option<Mode>,
    power: Option<PowerState>,
    published: Option<Fingerprint>,
    writes: usize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn mode(&self) -> Result<Option<Mode>> {
        Ok(self.lock().mode)
    }

    fn set_mode(&self, mode: Mode) -> Result<()> {
        let mut state = self.lock();
        state.mode = Some(mode);
        state.writes += 1;
        Ok(())
    }

    fn power(&self) -> Result<Option<PowerState>> {
        Ok(self.lock().power)
    }

    fn set_power(&self, power: PowerState) -> Result<()> {
        let mut state = self.lock();
        state.power = Some(power);
        state.writes += 1;
        Ok(())
    }

    fn published(&self) -> Result<Option<Fingerprint>> {
        Ok(self.lock().published.clone())
    }

    fn set_published(&self, fingerprint: &Fingerprint) -> Result<()> {
        let mut state = self.lock();
        state.published = Some(fingerprint.clone());
        state.writes += 1;
        Ok(())
    }
}
