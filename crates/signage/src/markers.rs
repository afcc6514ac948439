//! Inbox marker files: the on-disk form of [`RunState`].
//!
//! Names are a contract with whoever browses the drop folder:
//! `PROCESSING`, `READY`, `FAILED_<YYYYMMDD-HHMMSS>`, `STATUS_<YYYYMMDD-HHMMSS>`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::state::temp_sibling;

pub const PROCESSING: &str = "PROCESSING";
pub const READY: &str = "READY";
pub const FAILED_PREFIX: &str = "FAILED_";
pub const STATUS_PREFIX: &str = "STATUS_";

const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const HUMAN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn stamp(at: NaiveDateTime) -> String {
    at.format(STAMP_FORMAT).to_string()
}

pub fn is_marker_name(name: &str) -> bool {
    name == PROCESSING
        || name == READY
        || name.starts_with(FAILED_PREFIX)
        || name.starts_with(STATUS_PREFIX)
}

fn is_status_name(name: &str) -> bool {
    name.starts_with(STATUS_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum RunState {
    /// No run active. Carries the last result summary when `READY` exists.
    Idle { last_result: Option<String> },
    /// `PROCESSING` exists.
    Processing { started: Option<NaiveDateTime> },
    /// Idle, but the last run failed.
    Failed { message: String },
}

/// Content of the `READY` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyNote {
    pub finished: NaiveDateTime,
    pub ok: bool,
    pub summary: String,
}

impl ReadyNote {
    pub fn ok(finished: NaiveDateTime, summary: impl Into<String>) -> Self {
        Self {
            finished,
            ok: true,
            summary: summary.into(),
        }
    }

    pub fn failed(finished: NaiveDateTime, message: impl Into<String>) -> Self {
        Self {
            finished,
            ok: false,
            summary: message.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "Status: {}\nFinished: {}\n{}\n",
            if self.ok { "OK" } else { "ERROR" },
            self.finished.format(HUMAN_FORMAT),
            self.summary.trim_end()
        )
    }

    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let ok = match lines.next()?.strip_prefix("Status: ")?.trim() {
            "OK" => true,
            "ERROR" => false,
            _ => return None,
        };
        let finished = lines.next()?.strip_prefix("Finished: ")?.trim();
        let finished = NaiveDateTime::parse_from_str(finished, HUMAN_FORMAT).ok()?;
        let summary = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        Some(Self {
            finished,
            ok,
            summary,
        })
    }

    fn into_state(self) -> RunState {
        if self.ok {
            RunState::Idle {
                last_result: Some(self.summary),
            }
        } else {
            RunState::Failed {
                message: self.summary,
            }
        }
    }
}

fn state_from_ready(text: &str) -> RunState {
    match ReadyNote::parse(text) {
        Some(note) => note.into_state(),
        None => RunState::Idle {
            last_result: Some(text.trim().to_string()),
        },
    }
}

fn processing_text(started: NaiveDateTime) -> String {
    format!("Started: {}\n", started.format(HUMAN_FORMAT))
}

fn parse_processing(text: &str) -> Option<NaiveDateTime> {
    let line = text.lines().next()?.strip_prefix("Started: ")?;
    NaiveDateTime::parse_from_str(line.trim(), HUMAN_FORMAT).ok()
}

/// What crash recovery did with a stale `PROCESSING` marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "name", rename_all = "kebab-case")]
pub enum MarkerRecovery {
    Clean,
    Renamed(String),
    Deleted,
}

/// Persistence seam for the run-state markers.
pub trait MarkerStore: Send + Sync {
    fn run_state(&self) -> Result<RunState>;
    /// Drops `READY`, then writes `PROCESSING`.
    fn begin_run(&self, started: NaiveDateTime) -> Result<()>;
    /// Drops `PROCESSING`, then writes `READY`.
    fn finish_run(&self, note: &ReadyNote) -> Result<()>;
    /// Renames a stale `PROCESSING` to `FAILED_<stamp>`, deleting it when the
    /// rename is refused.
    fn recover_stale(&self, now: NaiveDateTime) -> Result<MarkerRecovery>;
    /// Removes every `STATUS_*` and writes a single `STATUS_<stamp>`.
    fn replace_status(&self, now: NaiveDateTime, text: &str) -> Result<String>;
    /// Removes every `STATUS_*`; returns how many were removed.
    fn clear_status(&self) -> Result<usize>;
}

/// Markers stored as files inside the inbox directory.
#[derive(Debug, Clone)]
pub struct InboxMarkers {
    dir: PathBuf,
}

impl InboxMarkers {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn write(&self, name: &str, text: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| Error::io("create directory", &self.dir, err))?;
        let path = self.path(name);
        let tmp = temp_sibling(&path);
        fs::write(&tmp, text).map_err(|err| Error::io("write", &tmp, err))?;
        fs::rename(&tmp, &path).map_err(|err| Error::io("rename into place", &path, err))
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Error::io("remove", &path, err)),
        }
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        let path = self.path(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io("read", &path, err)),
        }
    }

    fn status_names(&self) -> Result<Vec<String>> {
        let listing = match fs::read_dir(&self.dir) {
            Ok(listing) => listing,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::io("list", &self.dir, err)),
        };
        let mut names = Vec::new();
        for entry in listing {
            let entry = entry.map_err(|err| Error::io("list", &self.dir, err))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_status_name(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

impl MarkerStore for InboxMarkers {
    fn run_state(&self) -> Result<RunState> {
        if let Some(text) = self.read(PROCESSING)? {
            return Ok(RunState::Processing {
                started: parse_processing(&text),
            });
        }
        Ok(match self.read(READY)? {
            Some(text) => state_from_ready(&text),
            None => RunState::Idle { last_result: None },
        })
    }

    fn begin_run(&self, started: NaiveDateTime) -> Result<()> {
        self.remove(READY)?;
        self.write(PROCESSING, &processing_text(started))
    }

    fn finish_run(&self, note: &ReadyNote) -> Result<()> {
        self.remove(PROCESSING)?;
        self.write(READY, &note.render())
    }

    fn recover_stale(&self, now: NaiveDateTime) -> Result<MarkerRecovery> {
        let stale = self.path(PROCESSING);
        if !stale.exists() {
            return Ok(MarkerRecovery::Clean);
        }
        let failed_name = format!("{FAILED_PREFIX}{}", stamp(now));
        match fs::rename(&stale, self.path(&failed_name)) {
            Ok(()) => Ok(MarkerRecovery::Renamed(failed_name)),
            Err(err) => {
                warn!(error = %err, "could not rename stale PROCESSING marker; deleting it");
                fs::remove_file(&stale).map_err(|err| Error::io("remove", &stale, err))?;
                Ok(MarkerRecovery::Deleted)
            }
        }
    }

    fn replace_status(&self, now: NaiveDateTime, text: &str) -> Result<String> {
        let name = format!("{STATUS_PREFIX}{}", stamp(now));
        for old in self.status_names()? {
            if old != name {
                self.remove(&old)?;
            }
        }
        self.write(&name, text)?;
        debug!(name, "status snapshot written");
        Ok(name)
    }

    fn clear_status(&self) -> Result<usize> {
        let mut removed = 0;
        for old in self.status_names()? {
            if self.remove(&old)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// In-memory marker store for tests.
#[derive(Debug, Default)]
pub struct MemoryMarkers {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker names currently present, sorted.
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn contents(&self, name: &str) -> Option<String> {
        self.lock().get(name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MarkerStore for MemoryMarkers {
    fn run_state(&self) -> Result<RunState> {
        let files = self.lock();
        if let Some(text) = files.get(PROCESSING) {
            return Ok(RunState::Processing {
                started: parse_processing(text),
            });
        }
        Ok(match files.get(READY) {
            Some(text) => state_from_ready(text),
            None => RunState::Idle { last_result: None },
        })
    }

    fn begin_run(&self, started: NaiveDateTime) -> Result<()> {
        let mut files = self.lock();
        files.remove(READY);
        files.insert(PROCESSING.to_string(), processing_text(started));
        Ok(())
    }

    fn finish_run(&self, note: &ReadyNote) -> Result<()> {
        let mut files = self.lock();
        files.remove(PROCESSING);
        files.insert(READY.to_string(), note.render());
        Ok(())
    }

    fn recover_stale(&self, now: NaiveDateTime) -> Result<MarkerRecovery> {
        let mut files = self.lock();
        match files.remove(PROCESSING) {
            Some(text) => {
                let name = format!("{FAILED_PREFIX}{}", stamp(now));
                files.insert(name.clone(), text);
                Ok(MarkerRecovery::Renamed(name))
            }
            None => Ok(MarkerRecovery::Clean),
        }
    }

    fn replace_status(&self, now: NaiveDateTime, text: &str) -> Result<String> {
        let mut files = self.lock();
        files.retain(|name, _| !is_status_name(name));
        let name = format!("{STATUS_PREFIX}{}", stamp(now));
        files.insert(name.clone(), text.to_string());
        Ok(name)
    }

    fn clear_status(&self) -> Result<usize> {
        let mut files = self.lock();
        let before = files.len();
        files.retain(|name, _| !is_status_name(name));
        Ok(before - files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn at(hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(hh, mm, ss)
            .unwrap()
    }

    #[test]
    fn stamp_matches_marker_contract() {
        assert_eq!(stamp(at(9, 5, 7)), "20240305-090507");
        assert!(is_marker_name("FAILED_20240305-090507"));
        assert!(is_marker_name("READY"));
        assert!(!is_marker_name("READY.pdf"));
    }

    #[test]
    fn ready_note_round_trips_through_text() {
        let note = ReadyNote::failed(at(10, 0, 0), "failed to render deck.pptx: exit 1");
        let parsed = ReadyNote::parse(&note.render()).unwrap();
        assert_eq!(parsed, note);
    }

    #[test]
    fn begin_and_finish_keep_exactly_one_marker() {
        let tmp = tempdir().unwrap();
        let markers = InboxMarkers::new(tmp.path().to_path_buf());
        assert_eq!(
            markers.run_state().unwrap(),
            RunState::Idle { last_result: None }
        );

        markers.begin_run(at(8, 0, 0)).unwrap();
        assert!(tmp.path().join(PROCESSING).exists());
        assert!(!tmp.path().join(READY).exists());
        assert_eq!(
            markers.run_state().unwrap(),
            RunState::Processing {
                started: Some(at(8, 0, 0))
            }
        );

        markers
            .finish_run(&ReadyNote::ok(at(8, 1, 0), "Published 3 slides"))
            .unwrap();
        assert!(!tmp.path().join(PROCESSING).exists());
        assert_eq!(
            markers.run_state().unwrap(),
            RunState::Idle {
                last_result: Some("Published 3 slides".to_string())
            }
        );

        markers.begin_run(at(9, 0, 0)).unwrap();
        assert!(!tmp.path().join(READY).exists());
    }

    #[test]
    fn stale_marker_is_deleted_when_it_cannot_be_renamed() {
        let tmp = tempdir().unwrap();
        let markers = InboxMarkers::new(tmp.path().to_path_buf());
        fs::write(tmp.path().join(PROCESSING), "Started: 2024-03-05 07:00:00\n").unwrap();
        let now = at(8, 0, 0);
        let blocker = tmp.path().join(format!("{FAILED_PREFIX}{}", stamp(now)));
        fs::create_dir_all(blocker.join("sub")).unwrap();

        assert_eq!(markers.recover_stale(now).unwrap(), MarkerRecovery::Deleted);
        assert!(!tmp.path().join(PROCESSING).exists());
        assert!(blocker.join("sub").is_dir());
        assert_eq!(markers.recover_stale(now).unwrap(), MarkerRecovery::Clean);
    }

    #[test]
    fn failed_note_reads_back_as_failed_state() {
        let markers = MemoryMarkers::new();
        markers.begin_run(at(8, 0, 0)).unwrap();
        markers
            .finish_run(&ReadyNote::failed(at(8, 2, 0), "converter exited 1"))
            .unwrap();
        assert_eq!(
            markers.run_state().unwrap(),
            RunState::Failed {
                message: "converter exited 1".to_string()
            }
        );
    }

    #[test]
    fn stale_processing_is_renamed_to_failed() {
        let tmp = tempdir().unwrap();
        let markers = InboxMarkers::new(tmp.path().to_path_buf());
        markers.begin_run(at(7, 0, 0)).unwrap();

        let recovery = markers.recover_stale(at(7, 30, 0)).unwrap();
        assert_eq!(
            recovery,
            MarkerRecovery::Renamed("FAILED_20240305-073000".to_string())
        );
        assert!(!tmp.path().join(PROCESSING).exists());
        assert!(tmp.path().join("FAILED_20240305-073000").exists());
        assert_eq!(
            markers.recover_stale(at(7, 31, 0)).unwrap(),
            MarkerRecovery::Clean
        );
    }

    #[test]
    fn status_files_are_replaced_not_accumulated() {
        let tmp = tempdir().unwrap();
        let markers = InboxMarkers::new(tmp.path().to_path_buf());
        let first = markers.replace_status(at(8, 0, 0), "one").unwrap();
        let second = markers.replace_status(at(8, 0, 30), "two").unwrap();
        assert_ne!(first, second);
        assert!(!tmp.path().join(&first).exists());
        assert_eq!(
            fs::read_to_string(tmp.path().join(&second)).unwrap(),
            "two"
        );
        assert_eq!(markers.clear_status().unwrap(), 1);
        assert_eq!(markers.clear_status().unwrap(), 0);
    }
}
