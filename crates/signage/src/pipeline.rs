//! Inbox → slides → live directory, one run at a time.
//!
//! A run copies the inbox into a working snapshot, renders documents and
//! grooms images into a fresh staging directory, and only then replaces the
//! live directory. Every run ends with `READY`, success or not.

pub mod groom;
pub mod render;
pub mod staging;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, error, info, warn};

pub use groom::{GroomSpec, groom_file};
pub use render::{CommandRenderer, DocumentRenderer};
pub use staging::StagingSet;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::fingerprint::observe;
use crate::markers::{self, InboxMarkers, MarkerRecovery, MarkerStore, ReadyNote, RunState};
use crate::platform::ViewerControl;
use crate::platform::viewer::RestartCommand;
use crate::state::{FileStateStore, StateStore};
use staging::{RENDER_PREFIX, SNAPSHOT_DIR, STAGING_PREFIX, publish, remove_dir_if_exists, scratch_dirs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    Document,
    Image,
    Unsupported,
}

impl ContentKind {
    /// Case-insensitive match of the extension against the configured lists.
    pub fn classify(name: &str, settings: &Settings) -> Self {
        let Some(ext) = Path::new(name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        else {
            return Self::Unsupported;
        };
        if settings.document_extensions.iter().any(|known| *known == ext) {
            Self::Document
        } else if settings.image_extensions.iter().any(|known| *known == ext) {
            Self::Image
        } else {
            Self::Unsupported
        }
    }
}

#[derive(Debug, Clone)]
struct SnapshotEntry {
    name: String,
    original: PathBuf,
    copy: PathBuf,
    modified: SystemTime,
    kind: ContentKind,
}

impl SnapshotEntry {
    fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub marker: MarkerRecovery,
    pub purged: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub empty_inbox: bool,
    pub slides: usize,
    pub documents: usize,
    pub images: usize,
    pub skipped: Vec<String>,
    pub discarded: usize,
    pub published: bool,
    pub removed_from_inbox: usize,
    pub left_in_inbox: usize,
}

impl RunReport {
    fn empty_inbox() -> Self {
        Self {
            empty_inbox: true,
            ..Self::default()
        }
    }

    /// Human-readable result written into `READY`.
    pub fn summary(&self) -> String {
        if self.empty_inbox {
            return "Drop folder is empty; nothing to publish.".to_string();
        }
        let mut lines = Vec::new();
        if self.published {
            lines.push(format!(
                "Published {} slide(s) from {} document(s) and {} image(s).",
                self.slides, self.documents, self.images
            ));
        } else {
            lines.push("No publishable content found; the current slides stay on screen.".to_string());
        }
        if !self.skipped.is_empty() {
            lines.push(format!("Skipped unsupported files: {}", self.skipped.join(", ")));
        }
        if self.discarded > 0 {
            lines.push(format!(
                "Discarded {} page(s) over the slide limit.",
                self.discarded
            ));
        }
        if self.left_in_inbox > 0 {
            lines.push(format!(
                "{} file(s) changed during the run and were left for the next one.",
                self.left_in_inbox
            ));
        }
        lines.join("\n")
    }
}

pub struct PublishPipeline {
    settings: Arc<Settings>,
    markers: Arc<dyn MarkerStore>,
    state: Arc<dyn StateStore>,
    viewer: Arc<dyn ViewerControl>,
    renderer: Arc<dyn DocumentRenderer>,
}

impl PublishPipeline {
    pub fn new(
        settings: Arc<Settings>,
        markers: Arc<dyn MarkerStore>,
        state: Arc<dyn StateStore>,
        viewer: Arc<dyn ViewerControl>,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> Self {
        Self {
            settings,
            markers,
            state,
            viewer,
            renderer,
        }
    }

    pub fn from_settings(settings: Arc<Settings>) -> Self {
        let markers = Arc::new(InboxMarkers::new(settings.inbox_dir.clone()));
        let state = Arc::new(FileStateStore::from_settings(&settings));
        let viewer = Arc::new(RestartCommand::new(settings.restart_command.clone()));
        let renderer = Arc::new(CommandRenderer::new(settings.document_command.clone()));
        Self::new(settings, markers, state, viewer, renderer)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Startup recovery: a stale `PROCESSING` becomes `FAILED_<stamp>` and
    /// scratch directories from an interrupted run are removed.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let marker = self.markers.recover_stale(self.settings.local_now())?;
        match &marker {
            MarkerRecovery::Clean => debug!("no interrupted run found"),
            MarkerRecovery::Renamed(name) => {
                warn!(marker = name.as_str(), "previous run was interrupted")
            }
            MarkerRecovery::Deleted => {
                warn!("previous run was interrupted; stale marker deleted")
            }
        }

        let work_dir = &self.settings.work_dir;
        let mut purged = Vec::new();
        for dir in scratch_dirs(work_dir).map_err(|err| Error::io("list", work_dir, err))? {
            if remove_dir_if_exists(&dir)? {
                purged.push(dir);
            }
        }
        if !purged.is_empty() {
            info!(count = purged.len(), "purged leftover scratch directories");
        }
        Ok(RecoveryReport { marker, purged })
    }

    /// One conversion run. Fails fast with [`Error::AlreadyRunning`] when
    /// `PROCESSING` is present; otherwise always leaves `READY` behind.
    pub fn run(&self) -> Result<RunReport> {
        if let RunState::Processing { .. } = self.markers.run_state()? {
            return Err(Error::AlreadyRunning);
        }
        let started = self.settings.local_now();
        self.markers.begin_run(started)?;
        info!(inbox = %self.settings.inbox_dir.display(), "conversion run started");

        let token = run_token(started);
        let outcome = self.execute(&token);
        self.purge_run_scratch(&token);

        let finished = self.settings.local_now();
        let note = match &outcome {
            Ok(report) => {
                info!(
                    slides = report.slides,
                    published = report.published,
                    skipped = report.skipped.len(),
                    "conversion run finished"
                );
                ReadyNote::ok(finished, report.summary())
            }
            Err(err) => {
                error!(error = %err, "conversion run failed");
                ReadyNote::failed(finished, err.to_string())
            }
        };
        self.markers.finish_run(&note)?;
        outcome
    }

    fn execute(&self, token: &str) -> Result<RunReport> {
        let entries = self.take_snapshot()?;
        if entries.is_empty() {
            info!("drop folder is empty");
            return Ok(RunReport::empty_inbox());
        }

        let settings = &self.settings;
        let spec = GroomSpec::from_settings(settings);
        let mut staging = StagingSet::create(&settings.work_dir, token, settings.max_slides)?;
        let render_root = settings.work_dir.join(format!("{RENDER_PREFIX}{token}"));
        let mut report = RunReport::default();

        for entry in entries.iter().filter(|e| e.kind == ContentKind::Unsupported) {
            info!(file = entry.name.as_str(), "skipping unsupported file");
            report.skipped.push(entry.name.clone());
        }

        for entry in entries.iter().filter(|e| e.kind == ContentKind::Document) {
            if staging.is_full() {
                staging.discard(1);
                continue;
            }
            let base = staging.claim_base(&entry.stem());
            let pages = self.renderer.render(&entry.copy, &render_root.join(&base))?;
            report.documents += 1;
            let room = staging.room().unwrap_or(usize::MAX);
            for (index, page) in pages.iter().take(room).enumerate() {
                let dest = staging.slide_path(&base, Some(index + 1));
                groom_file(page, &dest, &spec)?;
                staging.push(dest);
            }
            staging.discard(pages.len().saturating_sub(room));
        }

        for entry in entries.iter().filter(|e| e.kind == ContentKind::Image) {
            if staging.is_full() {
                staging.discard(1);
                continue;
            }
            let base = staging.claim_base(&entry.stem());
            let dest = staging.slide_path(&base, None);
            groom_file(&entry.copy, &dest, &spec)?;
            staging.push(dest);
            report.images += 1;
        }

        report.slides = staging.len();
        report.discarded = staging.discarded();

        if staging.is_empty() {
            warn!("nothing publishable in the drop folder; live directory left unchanged");
        } else {
            publish(staging.slides(), &settings.live_dir)?;
            report.published = true;
            self.record_published();
            self.viewer.request_restart("new content published");
        }

        self.clean_inbox(&entries, &mut report);
        self.restore_readme();
        Ok(report)
    }

    /// Copies every non-marker regular file of the inbox into a fresh
    /// `work_dir/snapshot`.
    fn take_snapshot(&self) -> Result<Vec<SnapshotEntry>> {
        let inbox = self.settings.inbox_dir.as_path();
        let snapshot_dir = self.settings.work_dir.join(SNAPSHOT_DIR);
        remove_dir_if_exists(&snapshot_dir)?;
        fs::create_dir_all(&snapshot_dir)
            .map_err(|err| Error::io("create directory", &snapshot_dir, err))?;

        let snapshot_err = |path: &Path, source: io::Error| Error::Snapshot {
            path: path.to_path_buf(),
            source,
        };
        let listing = match fs::read_dir(inbox) {
            Ok(listing) => listing,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(snapshot_err(inbox, err)),
        };

        let mut entries = Vec::new();
        for entry in listing {
            let entry = entry.map_err(|err| snapshot_err(inbox, err))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if markers::is_marker_name(&name) || self.settings.ignore.matches(&name) {
                continue;
            }
            let original = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(snapshot_err(&original, err)),
            };
            if !metadata.is_file() {
                debug!(name, "skipping non-file inbox entry");
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|err| snapshot_err(&original, err))?;
            let copy = snapshot_dir.join(&name);
            match fs::copy(&original, &copy) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(snapshot_err(&original, err)),
            }
            let kind = ContentKind::classify(&name, &self.settings);
            entries.push(SnapshotEntry {
                name,
                original,
                copy,
                modified,
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = entries.len(), "inbox snapshot taken");
        Ok(entries)
    }

    fn record_published(&self) {
        match observe(&self.settings.live_dir, &self.settings.ignore) {
            Ok(observation) => {
                if let Err(err) = self.state.set_published(&observation.fingerprint) {
                    warn!(error = %err, "failed to record published fingerprint");
                }
            }
            Err(err) => warn!(error = %err, "failed to fingerprint live directory"),
        }
    }

    /// Deletes originals that were snapshotted and have not changed since.
    fn clean_inbox(&self, entries: &[SnapshotEntry], report: &mut RunReport) {
        for entry in entries {
            let current = match fs::metadata(&entry.original).and_then(|meta| meta.modified()) {
                Ok(current) => current,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!(file = entry.name.as_str(), error = %err, "cannot stat inbox file");
                    report.left_in_inbox += 1;
                    continue;
                }
            };
            if current != entry.modified {
                info!(file = entry.name.as_str(), "inbox file changed during run; keeping it");
                report.left_in_inbox += 1;
                continue;
            }
            match fs::remove_file(&entry.original) {
                Ok(()) => report.removed_from_inbox += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(file = entry.name.as_str(), error = %err, "failed to remove inbox file");
                    report.left_in_inbox += 1;
                }
            }
        }
    }

    fn restore_readme(&self) {
        let Some(template) = &self.settings.readme_template else {
            return;
        };
        let Some(name) = template.file_name() else {
            return;
        };
        let dest = self.settings.inbox_dir.join(name);
        if dest.exists() {
            return;
        }
        if let Err(err) = fs::copy(template, &dest) {
            warn!(
                template = %template.display(),
                error = %err,
                "failed to restore drop folder readme"
            );
        }
    }

    fn purge_run_scratch(&self, token: &str) {
        let work_dir = &self.settings.work_dir;
        for dir in [
            work_dir.join(SNAPSHOT_DIR),
            work_dir.join(format!("{STAGING_PREFIX}{token}")),
            work_dir.join(format!("{RENDER_PREFIX}{token}")),
        ] {
            if let Err(err) = remove_dir_if_exists(&dir) {
                warn!(error = %err, "failed to purge scratch directory");
            }
        }
    }
}

fn run_token(started: NaiveDateTime) -> String {
    format!(
        "{}-{:06x}",
        markers::stamp(started),
        rand::random::<u32>() & 0x00ff_ffff
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_case_insensitive() {
        let settings = Settings::default();
        assert_eq!(ContentKind::classify("Deck.PPTX", &settings), ContentKind::Document);
        assert_eq!(ContentKind::classify("photo.JPG", &settings), ContentKind::Image);
        assert_eq!(ContentKind::classify("notes.md", &settings), ContentKind::Unsupported);
        assert_eq!(ContentKind::classify("Makefile", &settings), ContentKind::Unsupported);
    }

    #[test]
    fn summary_mentions_skips_and_leftovers() {
        let report = RunReport {
            slides: 3,
            documents: 1,
            images: 1,
            skipped: vec!["notes.md".into()],
            published: true,
            left_in_inbox: 1,
            ..RunReport::default()
        };
        let summary = report.summary();
        assert!(summary.starts_with("Published 3 slide(s) from 1 document(s) and 1 image(s)."));
        assert!(summary.contains("notes.md"));
        assert!(summary.contains("left for the next one"));
        assert_eq!(
            RunReport::empty_inbox().summary(),
            "Drop folder is empty; nothing to publish."
        );
    }
}
