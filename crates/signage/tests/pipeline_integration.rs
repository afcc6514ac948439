use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::{Rgba, RgbaImage};
use signage::Error;
use signage::config::Settings;
use signage::fingerprint::observe;
use signage::markers::{InboxMarkers, MarkerRecovery, MarkerStore, RunState};
use signage::pipeline::{DocumentRenderer, PublishPipeline};
use signage::platform::ViewerControl;
use signage::state::{MemoryStateStore, StateStore};
use tempfile::{TempDir, tempdir};

#[derive(Default)]
struct RecordingViewer {
    reasons: Mutex<Vec<String>>,
}

impl RecordingViewer {
    fn count(&self) -> usize {
        self.reasons.lock().unwrap().len()
    }
}

impl ViewerControl for RecordingViewer {
    fn request_restart(&self, reason: &str) {
        self.reasons.lock().unwrap().push(reason.to_string());
    }
}

/// Writes `pages` small PNG pages, or fails like a broken converter.
struct FakeRenderer {
    pages: usize,
    fail: bool,
}

impl DocumentRenderer for FakeRenderer {
    fn render(&self, input: &Path, out_dir: &Path) -> signage::Result<Vec<PathBuf>> {
        if self.fail {
            return Err(Error::Render {
                file: input.file_name().unwrap().to_string_lossy().into_owned(),
                reason: "exit code 1".into(),
            });
        }
        fs::create_dir_all(out_dir).unwrap();
        Ok((1..=self.pages)
            .map(|page| {
                let path = out_dir.join(format!("page-{page:02}.png"));
                write_png(&path, 40, 30);
                path
            })
            .collect())
    }
}

fn write_png(path: &Path, width: u32, height: u32) {
    RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]))
        .save(path)
        .unwrap();
}

struct Fixture {
    _tmp: TempDir,
    inbox: PathBuf,
    live: PathBuf,
    work: PathBuf,
    settings: Arc<Settings>,
    markers: Arc<InboxMarkers>,
    state: Arc<MemoryStateStore>,
    viewer: Arc<RecordingViewer>,
}

impl Fixture {
    fn new(extra: &str) -> Self {
        Self::with_readme("README.txt", extra)
    }

    fn with_readme(readme_name: &str, extra: &str) -> Self {
        let tmp = tempdir().unwrap();
        let inbox = tmp.path().join("inbox");
        let live = tmp.path().join("live");
        let work = tmp.path().join("work");
        fs::create_dir_all(&inbox).unwrap();
        fs::create_dir_all(&live).unwrap();
        let readme = tmp.path().join(readme_name);
        fs::write(&readme, "Drop slides here.\n").unwrap();
        let settings = Settings::parse(&format!(
            "inbox_dir = {}\nlive_dir = {}\nwork_dir = {}\nstate_dir = {}\n\
             readme_template = {}\nresolution = 64x36\n{extra}\n",
            inbox.display(),
            live.display(),
            work.display(),
            tmp.path().join("state").display(),
            readme.display(),
        ));
        Self {
            markers: Arc::new(InboxMarkers::new(inbox.clone())),
            state: Arc::new(MemoryStateStore::new()),
            viewer: Arc::new(RecordingViewer::default()),
            settings: Arc::new(settings),
            inbox,
            live,
            work,
            _tmp: tmp,
        }
    }

    fn pipeline(&self, renderer: FakeRenderer) -> PublishPipeline {
        PublishPipeline::new(
            Arc::clone(&self.settings),
            self.markers.clone(),
            self.state.clone(),
            self.viewer.clone(),
            Arc::new(renderer),
        )
    }

    fn ready_text(&self) -> String {
        fs::read_to_string(self.inbox.join("READY")).unwrap()
    }
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn empty_inbox_is_a_normal_outcome_every_time() {
    let fx = Fixture::new("");
    let pipeline = fx.pipeline(FakeRenderer { pages: 1, fail: false });
    for _ in 0..2 {
        let report = pipeline.run().unwrap();
        assert!(report.empty_inbox);
        assert_eq!(report.slides, 0);
        assert!(fx.ready_text().contains("Status: OK"));
        assert!(fx.ready_text().contains("Drop folder is empty"));
        assert!(!fx.inbox.join("PROCESSING").exists());
    }
    assert_eq!(fx.viewer.count(), 0);
}

#[test]
fn successful_run_replaces_the_live_directory() {
    let fx = Fixture::new("");
    fs::write(fx.live.join("old-001.png"), b"old").unwrap();
    fs::write(fx.inbox.join("Q3 deck.pdf"), b"%PDF").unwrap();
    write_png(&fx.inbox.join("photo.png"), 100, 100);

    let report = fx.pipeline(FakeRenderer { pages: 3, fail: false }).run().unwrap();
    assert!(report.published);
    assert_eq!((report.slides, report.documents, report.images), (4, 1, 1));

    assert_eq!(
        names(&fx.live),
        vec!["Q3_deck-001.png", "Q3_deck-002.png", "Q3_deck-003.png", "photo.png"]
    );
    let slide = image::open(fx.live.join("photo.png")).unwrap();
    assert_eq!((slide.width(), slide.height()), (64, 36));

    // Originals are gone, the readme is back, exactly one marker remains.
    assert_eq!(names(&fx.inbox), vec!["README.txt", "READY"]);
    assert!(fx.ready_text().starts_with("Status: OK"));
    assert!(fx.ready_text().contains("Published 4 slide(s)"));

    assert_eq!(fx.viewer.count(), 1);
    let recorded = fx.state.published().unwrap().unwrap();
    assert_eq!(recorded, observe(&fx.live, &fx.settings.ignore).unwrap().fingerprint);

    // Scratch space is purged after the run.
    assert!(names(&fx.work).is_empty());
}

#[test]
fn restored_readme_does_not_trigger_another_run() {
    let fx = Fixture::with_readme("README.md", "");
    write_png(&fx.inbox.join("photo.png"), 10, 10);

    let pipeline = fx.pipeline(FakeRenderer { pages: 1, fail: false });
    assert!(pipeline.run().unwrap().published);
    assert_eq!(names(&fx.inbox), vec!["README.md", "READY"]);
    let ready = fx.ready_text();

    // The watcher sees nothing to settle on.
    let observation = observe(&fx.inbox, &fx.settings.ignore).unwrap();
    assert_eq!(observation.entries, 0);
    assert!(observation.fingerprint.is_none());

    // Even a forced run leaves the readme alone and reports an empty folder.
    let mtime = fs::metadata(fx.inbox.join("README.md")).unwrap().modified().unwrap();
    let report = pipeline.run().unwrap();
    assert!(report.empty_inbox);
    assert!(report.skipped.is_empty());
    assert_eq!(
        fs::metadata(fx.inbox.join("README.md")).unwrap().modified().unwrap(),
        mtime
    );
    assert!(ready.contains("Published 1 slide(s)"));
    assert_eq!(fx.viewer.count(), 1);
}

#[test]
fn failed_run_keeps_previous_slides_and_clears_processing() {
    let fx = Fixture::new("");
    fs::write(fx.live.join("old-001.png"), b"old").unwrap();
    fs::write(fx.inbox.join("broken.pptx"), b"pk").unwrap();
    write_png(&fx.inbox.join("photo.png"), 10, 10);

    let err = fx
        .pipeline(FakeRenderer { pages: 0, fail: true })
        .run()
        .unwrap_err();
    assert!(matches!(err, Error::Render { .. }));

    assert_eq!(names(&fx.live), vec!["old-001.png"]);
    assert!(!fx.inbox.join("PROCESSING").exists());
    let ready = fx.ready_text();
    assert!(ready.starts_with("Status: ERROR"));
    assert!(ready.contains("broken.pptx"));
    assert!(fx.inbox.join("broken.pptx").exists());
    assert!(fx.inbox.join("photo.png").exists());
    assert_eq!(fx.viewer.count(), 0);
    assert!(matches!(
        fx.markers.run_state().unwrap(),
        RunState::Failed { .. }
    ));
}

#[test]
fn slide_cap_drops_excess_pages_and_images() {
    let fx = Fixture::new("max_slides = 2");
    fs::write(fx.inbox.join("deck.pdf"), b"%PDF").unwrap();
    write_png(&fx.inbox.join("photo.png"), 10, 10);

    let report = fx.pipeline(FakeRenderer { pages: 3, fail: false }).run().unwrap();
    assert_eq!(report.slides, 2);
    assert_eq!(report.discarded, 2);
    assert_eq!(names(&fx.live), vec!["deck-001.png", "deck-002.png"]);
    assert!(fx.ready_text().contains("Discarded 2 page(s)"));
}

#[test]
fn unsupported_files_are_skipped_not_fatal() {
    let fx = Fixture::new("");
    fs::write(fx.inbox.join("agenda.md"), b"# hi").unwrap();
    write_png(&fx.inbox.join("photo.PNG"), 10, 10);

    let report = fx.pipeline(FakeRenderer { pages: 1, fail: false }).run().unwrap();
    assert_eq!(report.skipped, vec!["agenda.md".to_string()]);
    assert_eq!(names(&fx.live), vec!["photo.png"]);
    assert!(fx.ready_text().contains("agenda.md"));
}

#[test]
fn nothing_publishable_leaves_live_content_alone() {
    let fx = Fixture::new("");
    fs::write(fx.live.join("old-001.png"), b"old").unwrap();
    fs::write(fx.inbox.join("agenda.md"), b"# hi").unwrap();

    let report = fx.pipeline(FakeRenderer { pages: 1, fail: false }).run().unwrap();
    assert!(!report.published);
    assert_eq!(names(&fx.live), vec!["old-001.png"]);
    assert_eq!(fx.viewer.count(), 0);
}

#[test]
fn run_refuses_to_start_while_processing() {
    let fx = Fixture::new("");
    fs::write(fx.inbox.join("PROCESSING"), "Started: 2024-01-01 00:00:00\n").unwrap();
    write_png(&fx.inbox.join("photo.png"), 10, 10);

    let err = fx
        .pipeline(FakeRenderer { pages: 1, fail: false })
        .run()
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning));
    assert!(fx.inbox.join("photo.png").exists());
    assert!(!fx.inbox.join("READY").exists());
}

#[test]
fn recovery_turns_stale_processing_into_failed_and_purges_scratch() {
    let fx = Fixture::new("");
    fs::write(fx.inbox.join("PROCESSING"), "Started: 2024-01-01 00:00:00\n").unwrap();
    for dir in ["snapshot", "staging-20240101-000000-abcdef", "render-20240101-000000-abcdef"] {
        fs::create_dir_all(fx.work.join(dir)).unwrap();
        fs::write(fx.work.join(dir).join("x.png"), b"x").unwrap();
    }

    let pipeline = fx.pipeline(FakeRenderer { pages: 1, fail: false });
    let report = pipeline.recover().unwrap();

    let MarkerRecovery::Renamed(name) = &report.marker else {
        panic!("expected rename, got {:?}", report.marker);
    };
    assert!(name.starts_with("FAILED_"));
    assert_eq!(name.len(), "FAILED_YYYYMMDD-HHMMSS".len());
    assert!(!fx.inbox.join("PROCESSING").exists());
    assert!(fx.inbox.join(name).exists());
    assert_eq!(report.purged.len(), 3);
    assert!(names(&fx.work).is_empty());

    // The inbox is usable again straight away.
    assert!(pipeline.run().unwrap().empty_inbox);
}
