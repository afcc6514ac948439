//! Per-run scratch directory holding groomed slides until they are published.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub const STAGING_PREFIX: &str = "staging-";
pub const RENDER_PREFIX: &str = "render-";
pub const SNAPSHOT_DIR: &str = "snapshot";

/// Ordered slides of one run, capped at `max_slides` (zero means no cap).
#[derive(Debug)]
pub struct StagingSet {
    dir: PathBuf,
    max_slides: usize,
    slides: Vec<PathBuf>,
    bases: HashSet<String>,
    discarded: usize,
}

impl StagingSet {
    /// Creates `work_dir/staging-<token>`; an existing directory of that name
    /// is an error, never reused.
    pub fn create(work_dir: &Path, token: &str, max_slides: usize) -> Result<Self> {
        fs::create_dir_all(work_dir)
            .map_err(|err| Error::io("create directory", work_dir, err))?;
        let dir = work_dir.join(format!("{STAGING_PREFIX}{token}"));
        fs::create_dir(&dir).map_err(|err| Error::io("create staging directory", &dir, err))?;
        debug!(dir = %dir.display(), "staging directory created");
        Ok(Self {
            dir,
            max_slides,
            slides: Vec::new(),
            bases: HashSet::new(),
            discarded: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slides(&self) -> &[PathBuf] {
        &self.slides
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    /// Pages or images dropped because the cap was reached.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn is_full(&self) -> bool {
        self.max_slides > 0 && self.slides.len() >= self.max_slides
    }

    /// Number of further slides accepted, `None` when uncapped.
    pub fn room(&self) -> Option<usize> {
        (self.max_slides > 0).then(|| self.max_slides.saturating_sub(self.slides.len()))
    }

    pub fn discard(&mut self, count: usize) {
        if count > 0 {
            info!(count, cap = self.max_slides, "slide cap reached; discarding");
        }
        self.discarded += count;
    }

    /// Output base name for `stem`, unique within this run.
    pub fn claim_base(&mut self, stem: &str) -> String {
        let stem = sanitize_stem(stem);
        let mut candidate = stem.clone();
        let mut suffix = 2;
        while !self.bases.insert(candidate.to_ascii_lowercase()) {
            candidate = format!("{stem}-{suffix:02}");
            suffix += 1;
        }
        candidate
    }

    /// Path for the next slide. `page` is 1-based for multi-page documents.
    pub fn slide_path(&self, base: &str, page: Option<usize>) -> PathBuf {
        match page {
            Some(page) => self.dir.join(format!("{base}-{page:03}.png")),
            None => self.dir.join(format!("{base}.png")),
        }
    }

    /// Records a slide written at `path`. Returns false, and counts the slide
    /// as discarded, when the cap is already reached.
    pub fn push(&mut self, path: PathBuf) -> bool {
        if self.is_full() {
            self.discarded += 1;
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to drop excess slide");
                }
            }
            return false;
        }
        self.slides.push(path);
        true
    }
}

/// Keeps ASCII alphanumerics, `-` and `_`; everything else becomes `_`.
pub fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "slide".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Moves every slide into `live_dir` after removing the non-hidden files
/// already there. The window in which `live_dir` is empty is kept short but
/// is not zero.
pub fn publish(slides: &[PathBuf], live_dir: &Path) -> Result<usize> {
    let publish_err = |source: io::Error| Error::Publish {
        path: live_dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(live_dir).map_err(publish_err)?;

    let mut removed = 0;
    for entry in fs::read_dir(live_dir).map_err(publish_err)? {
        let entry = entry.map_err(publish_err)?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().map_err(publish_err)?;
        if file_type.is_dir() {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(publish_err(err)),
        }
    }

    for slide in slides {
        let Some(name) = slide.file_name() else {
            continue;
        };
        let dest = live_dir.join(name);
        move_file(slide, &dest).map_err(publish_err)?;
    }
    info!(
        live_dir = %live_dir.display(),
        removed,
        published = slides.len(),
        "live directory replaced"
    );
    Ok(slides.len())
}

/// `rename`, falling back to copy and remove across filesystems.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Removes `path` recursively if present.
pub fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::io("remove directory", path, err)),
    }
}

/// Scratch directories under `work_dir` left by this or any earlier run.
pub fn scratch_dirs(work_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let listing = match fs::read_dir(work_dir) {
        Ok(listing) => listing,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut dirs = Vec::new();
    for entry in listing {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == SNAPSHOT_DIR || name.starts_with(STAGING_PREFIX) || name.starts_with(RENDER_PREFIX)
        {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
