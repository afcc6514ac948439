//! Flat `key = value` configuration.
//!
//! Parsing never fails on content: unknown keys are ignored and malformed
//! values fall back to their defaults with a warning. Only an unreadable file
//! is an error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, Utc};
use chrono_tz::Tz;
use image::Rgba;
use schedule_model::{ScheduleTable, parse_weekday_key};
use serde::Serialize;
use tracing::{debug, warn};

use crate::fingerprint::{DEFAULT_IGNORE_PATTERNS, IgnoreSet};
use crate::platform::display_power::{DisplayPowerPlan, PowerSysfs};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/signage/signage.conf";

pub const DEFAULT_DOCUMENT_COMMAND: &str = "if [ @EXT@ = pdf ]; then cp @INPUT@ @OUTDIR@/source.pdf; \
else soffice --headless --convert-to pdf --outdir @OUTDIR@ @INPUT@ >/dev/null; fi \
&& pdftoppm -r 150 -png @OUTDIR@/*.pdf @OUTDIR@/page";

pub const DEFAULT_RESTART_COMMAND: &str = "systemctl restart signage-viewer.service";

const DEFAULT_DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "ppt", "pptx", "odp", "doc", "docx", "odt"];
const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// `key = value` pairs after comment stripping. Keys are lower-cased with
/// `-` folded to `_`; the last assignment of a key wins. Each key remembers
/// the position of its winning assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    values: HashMap<String, (usize, String)>,
}

impl RawConfig {
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        let mut seq = 0;
        for (lineno, line) in text.lines().enumerate() {
            let line = strip_comment(line).trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                debug!(line = lineno + 1, "config line without '=' ignored");
                continue;
            };
            let key = key.trim().to_ascii_lowercase().replace('-', "_");
            if key.is_empty() {
                continue;
            }
            values.insert(key, (seq, unquote(value.trim()).to_string()));
            seq += 1;
        }
        Self { values }
    }

    /// Reads and parses `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|(_, value)| value.as_str())
    }

    /// Entries in the order their winning assignments appear in the file.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut entries: Vec<_> = self.values.iter().collect();
        entries.sort_by_key(|(_, (seq, _))| *seq);
        entries
            .into_iter()
            .map(|(key, (_, value))| (key.as_str(), value.as_str()))
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.text(key).map(PathBuf::from)
    }

    fn positive_secs(&self, key: &str) -> Option<Duration> {
        let raw = self.text(key)?;
        match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => {
                warn!(key, value = raw, "expected a positive number of seconds; using default");
                None
            }
        }
    }

    fn count(&self, key: &str) -> Option<usize> {
        let raw = self.text(key)?;
        match raw.parse::<usize>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = raw, "expected a non-negative integer; using default");
                None
            }
        }
    }

    fn boolean(&self, key: &str) -> Option<bool> {
        let raw = self.text(key)?;
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => {
                warn!(key, value = raw, "expected true/yes/1 or false/no/0; using default");
                None
            }
        }
    }

    fn parsed<T: FromStr>(&self, key: &str, expected: &'static str) -> Option<T> {
        let raw = self.text(key)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = raw, expected, "malformed value; using default");
                None
            }
        }
    }

    fn list(&self, key: &str, default: &[&str]) -> Vec<String> {
        let items: Vec<String> = match self.get(key) {
            Some(raw) => raw
                .split(',')
                .map(|item| item.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|item| !item.is_empty())
                .collect(),
            None => Vec::new(),
        };
        if items.is_empty() {
            default.iter().map(|item| item.to_string()).collect()
        } else {
            items
        }
    }
}

/// A `#` starts a comment at line start or after whitespace, outside quotes.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut previous_is_space = true;
    for (idx, ch) in line.char_indices() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '#' && previous_is_space => return &line[..idx],
            None => {}
        }
        previous_is_space = ch.is_whitespace();
    }
    line
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageFit {
    /// Scale to fit inside the frame and letterbox on the background.
    Center,
    /// Scale to exactly the frame size, ignoring aspect ratio.
    Stretch,
}

impl FromStr for ImageFit {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "center" | "centre" | "letterbox" => Ok(Self::Center),
            "stretch" | "fill" => Ok(Self::Stretch),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Resolution {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        let (w, h) = lowered.split_once('x').ok_or(())?;
        let width = w.trim().parse::<u32>().map_err(|_| ())?;
        let height = h.trim().parse::<u32>().map_err(|_| ())?;
        if width == 0 || height == 0 {
            return Err(());
        }
        Ok(Self { width, height })
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Parses `#rrggbb`, `rrggbb`, `black` or `white`.
pub fn parse_color(raw: &str) -> Option<Rgba<u8>> {
    let raw = raw.trim();
    match raw.to_ascii_lowercase().as_str() {
        "black" => return Some(Rgba([0, 0, 0, 255])),
        "white" => return Some(Rgba([255, 255, 255, 255])),
        _ => {}
    }
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub quiet_period: Duration,
}

/// Immutable configuration snapshot.
#[derive(Debug, Clone)]
pub struct Settings {
    pub inbox_dir: PathBuf,
    pub live_dir: PathBuf,
    pub work_dir: PathBuf,
    pub state_dir: PathBuf,
    pub mode_file: PathBuf,
    pub power_file: PathBuf,
    pub inbox_watch: WatchSettings,
    pub live_watch: WatchSettings,
    pub status_interval: Duration,
    pub schedule_poll_interval: Duration,
    pub resolution: Resolution,
    pub image_fit: ImageFit,
    pub background: Rgba<u8>,
    pub document_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    /// Zero means unlimited.
    pub max_slides: usize,
    pub document_command: String,
    pub restart_command: Option<String>,
    pub readme_template: Option<PathBuf>,
    pub ignore: IgnoreSet,
    pub hdmi_control: bool,
    pub off_schedule_slides: bool,
    pub power: DisplayPowerPlan,
    pub timezone: Option<Tz>,
    pub schedule: ScheduleTable,
}

impl Settings {
    pub fn parse(text: &str) -> Self {
        Self::from_raw(&RawConfig::parse(text))
    }

    pub fn from_raw(raw: &RawConfig) -> Self {
        let state_dir = raw
            .path("state_dir")
            .unwrap_or_else(|| PathBuf::from("/var/lib/signage/state"));

        let poll_interval = raw
            .positive_secs("poll_interval")
            .unwrap_or(Duration::from_secs(10));
        let quiet_period = raw
            .positive_secs("quiet_period")
            .unwrap_or(Duration::from_secs(60));
        let inbox_watch = WatchSettings {
            poll_interval,
            quiet_period,
        };
        let live_watch = WatchSettings {
            poll_interval: raw
                .positive_secs("live_poll_interval")
                .unwrap_or(poll_interval),
            quiet_period: raw
                .positive_secs("live_quiet_period")
                .unwrap_or(quiet_period),
        };

        let background = match raw.text("background") {
            Some(value) => parse_color(value).unwrap_or_else(|| {
                warn!(key = "background", value, "malformed colour; using black");
                Rgba([0, 0, 0, 255])
            }),
            None => Rgba([0, 0, 0, 255]),
        };

        let restart_command = match raw.get("restart_command") {
            Some(command) if command.trim().is_empty() => None,
            Some(command) => Some(command.to_string()),
            None => Some(DEFAULT_RESTART_COMMAND.to_string()),
        };

        let readme_template = raw.path("readme_template");
        let mut ignore = match raw.get("ignore_patterns") {
            Some(value) => IgnoreSet::new(value.split(',')),
            None => IgnoreSet::new(DEFAULT_IGNORE_PATTERNS),
        };
        // The restored readme must not look like a fresh upload.
        if let Some(name) = readme_template
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
        {
            ignore = ignore.with_name(name);
        }

        let sysfs = raw.path("power_sysfs_path").map(|path| PowerSysfs {
            path,
            on_value: raw.text("power_on_value").unwrap_or("1").to_string(),
            off_value: raw.text("power_off_value").unwrap_or("0").to_string(),
        });
        let power = DisplayPowerPlan {
            sysfs,
            on_command: raw.text("power_on_command").map(str::to_string),
            off_command: raw.text("power_off_command").map(str::to_string),
        };

        let timezone = raw.parsed::<Tz>("timezone", "an IANA timezone name");

        let mut schedule = ScheduleTable::new();
        // Aliases such as `mon` and `monday` name one day; the later line wins.
        for (key, value) in raw.iter() {
            if let Some(weekday) = parse_weekday_key(key) {
                let day = schedule.set_day(weekday, value);
                for rejected in day.rejected() {
                    warn!(
                        key,
                        range = rejected.raw,
                        error = %rejected.error,
                        "skipping malformed schedule range"
                    );
                }
            }
        }

        Self {
            inbox_dir: raw
                .path("inbox_dir")
                .unwrap_or_else(|| PathBuf::from("/srv/signage/inbox")),
            live_dir: raw
                .path("live_dir")
                .unwrap_or_else(|| PathBuf::from("/srv/signage/live")),
            work_dir: raw
                .path("work_dir")
                .unwrap_or_else(|| PathBuf::from("/var/lib/signage/work")),
            mode_file: raw
                .path("mode_file")
                .unwrap_or_else(|| state_dir.join("mode")),
            power_file: raw
                .path("power_file")
                .unwrap_or_else(|| state_dir.join("power")),
            state_dir,
            inbox_watch,
            live_watch,
            status_interval: raw
                .positive_secs("status_interval")
                .unwrap_or(Duration::from_secs(30)),
            schedule_poll_interval: raw
                .positive_secs("schedule_poll_interval")
                .unwrap_or(Duration::from_secs(30)),
            resolution: raw
                .parsed("resolution", "WIDTHxHEIGHT")
                .unwrap_or_default(),
            image_fit: raw
                .parsed("image_fit", "center or stretch")
                .unwrap_or(ImageFit::Center),
            background,
            document_extensions: raw.list("document_extensions", DEFAULT_DOCUMENT_EXTENSIONS),
            image_extensions: raw.list("image_extensions", DEFAULT_IMAGE_EXTENSIONS),
            max_slides: raw.count("max_slides").unwrap_or(0),
            document_command: raw
                .text("document_command")
                .unwrap_or(DEFAULT_DOCUMENT_COMMAND)
                .to_string(),
            restart_command,
            readme_template,
            ignore,
            hdmi_control: raw.boolean("hdmi_control").unwrap_or(true),
            off_schedule_slides: raw.boolean("off_schedule_slides").unwrap_or(false),
            power,
            timezone,
            schedule,
        }
    }

    /// Wall-clock time in the configured timezone, or system local time.
    pub fn local_now(&self) -> NaiveDateTime {
        match self.timezone {
            Some(tz) => Utc::now().with_timezone(&tz).naive_local(),
            None => Local::now().naive_local(),
        }
    }

    /// Path of the file recording the last published fingerprint.
    pub fn published_file(&self) -> PathBuf {
        self.state_dir.join("published")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_raw(&RawConfig::default())
    }
}

/// Holds the current [`Settings`] snapshot and swaps it on reload.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    raw: RawConfig,
    current: Arc<Settings>,
}

impl ConfigStore {
    pub fn open(path: &Path) -> Result<Self> {
        let raw = RawConfig::load(path)?;
        let current = Arc::new(Settings::from_raw(&raw));
        Ok(Self {
            path: path.to_path_buf(),
            raw,
            current,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<Settings> {
        Arc::clone(&self.current)
    }

    /// Re-reads the file. Returns whether the snapshot changed; on a read
    /// error the previous snapshot stays in place.
    pub fn reload(&mut self) -> bool {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "config reload failed; keeping previous settings"
                );
                return false;
            }
        };
        let raw = RawConfig::parse(&text);
        if raw == self.raw {
            return false;
        }
        self.current = Arc::new(Settings::from_raw(&raw));
        self.raw = raw;
        true
    }
}
