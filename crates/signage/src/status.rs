//! Progress snapshots for people watching the drop folder during a run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::NaiveDateTime;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::Settings;
use crate::error::Result;
use crate::markers::{InboxMarkers, MarkerStore, RunState};
use crate::pipeline::staging::scratch_dirs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTick {
    /// A run is active; the named `STATUS_*` file replaced any previous one.
    Written(String),
    /// No run active; this many stale status files were removed.
    Cleared(usize),
}

pub struct StatusReporter {
    markers: Arc<dyn MarkerStore>,
    work_dir: PathBuf,
}

impl StatusReporter {
    pub fn new(markers: Arc<dyn MarkerStore>, work_dir: PathBuf) -> Self {
        Self { markers, work_dir }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Arc::new(InboxMarkers::new(settings.inbox_dir.clone())),
            settings.work_dir.clone(),
        )
    }

    pub fn tick(&self, now: NaiveDateTime) -> Result<StatusTick> {
        match self.markers.run_state()? {
            RunState::Processing { started } => {
                let mut text = match started {
                    Some(started) => format!(
                        "Conversion running since {} ({})\n",
                        started.format("%H:%M:%S"),
                        elapsed(started, now)
                    ),
                    None => "Conversion running\n".to_string(),
                };
                text.push_str(&describe_scratch(&self.work_dir));
                let name = self.markers.replace_status(now, &text)?;
                Ok(StatusTick::Written(name))
            }
            RunState::Idle { .. } | RunState::Failed { .. } => {
                let removed = self.markers.clear_status()?;
                if removed > 0 {
                    debug!(removed, "cleared status snapshots");
                }
                Ok(StatusTick::Cleared(removed))
            }
        }
    }
}

fn elapsed(started: NaiveDateTime, now: NaiveDateTime) -> String {
    let secs = (now - started).num_seconds().max(0) as u64;
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

/// Summarises the most recently modified scratch directory under `work_dir`.
pub fn describe_scratch(work_dir: &Path) -> String {
    let newest = scratch_dirs(work_dir).ok().and_then(|dirs| {
        dirs.into_iter()
            .filter_map(|dir| {
                let modified = fs::metadata(&dir).and_then(|m| m.modified()).ok()?;
                Some((modified, dir))
            })
            .max_by_key(|(modified, _)| *modified)
    });
    let Some((_, dir)) = newest else {
        return "Working directory: none found\n".to_string();
    };

    let mut files = 0usize;
    let mut bytes = 0u64;
    let mut latest: Option<(SystemTime, String)> = None;
    for entry in WalkDir::new(&dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        files += 1;
        bytes += metadata.len();
        if let Ok(modified) = metadata.modified() {
            if latest.as_ref().is_none_or(|(seen, _)| modified >= *seen) {
                latest = Some((modified, entry.file_name().to_string_lossy().into_owned()));
            }
        }
    }

    let name = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut text = format!("Working directory: {name}\nFiles: {files} ({} KiB)\n", bytes / 1024);
    if let Some((_, latest)) = latest {
        text.push_str(&format!("Latest file: {latest}\n"));
    }
    text
}
