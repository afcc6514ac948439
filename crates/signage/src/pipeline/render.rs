use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::platform::shell::{CommandRunner, default_runner, shell_quote};

/// Turns one document into an ordered list of page images.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, input: &Path, out_dir: &Path) -> Result<Vec<PathBuf>>;
}

const PAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "ppm", "tif", "tiff"];

/// Runs a shell template with `@INPUT@`, `@OUTDIR@` and `@EXT@` substituted
/// (shell-quoted), then collects the images it left in the output directory.
#[derive(Clone)]
pub struct CommandRenderer {
    template: String,
    runner: CommandRunner,
}

impl fmt::Debug for CommandRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRenderer")
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl CommandRenderer {
    pub fn new(template: impl Into<String>) -> Self {
        Self::with_runner(template, default_runner())
    }

    pub fn with_runner(template: impl Into<String>, runner: CommandRunner) -> Self {
        Self {
            template: template.into(),
            runner,
        }
    }

    pub fn command_for(&self, input: &Path, out_dir: &Path) -> String {
        let ext = input
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        self.template
            .replace("@INPUT@", &shell_quote(&input.to_string_lossy()))
            .replace("@OUTDIR@", &shell_quote(&out_dir.to_string_lossy()))
            .replace("@EXT@", &shell_quote(&ext))
    }
}

impl DocumentRenderer for CommandRenderer {
    fn render(&self, input: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let file = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        fs::create_dir_all(out_dir).map_err(|err| Error::io("create directory", out_dir, err))?;

        let command = self.command_for(input, out_dir);
        debug!(file, command, "rendering document");
        let output = (self.runner)(&command).map_err(|err| Error::Render {
            file: file.clone(),
            reason: format!("{err:#}"),
        })?;
        if !output.success() {
            let exit = output
                .status
                .code()
                .map(|code| format!("exit code {code}"))
                .unwrap_or_else(|| "killed by signal".to_string());
            let stderr = output.stderr.trim();
            let reason = if stderr.is_empty() {
                exit
            } else {
                format!("{exit}: {}", last_line(stderr))
            };
            return Err(Error::Render { file, reason });
        }

        let pages = collect_pages(out_dir);
        if pages.is_empty() {
            return Err(Error::Render {
                file,
                reason: "converter produced no page images".to_string(),
            });
        }
        info!(file, pages = pages.len(), "document rendered");
        Ok(pages)
    }
}

fn last_line(text: &str) -> &str {
    text.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or(text)
}

/// Page images directly inside `dir`, in file-name order.
pub fn collect_pages(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .is_some_and(|ext| PAGE_EXTENSIONS.contains(&ext.as_str()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::shell::CommandOutput;
    use crate::platform::shell::testing::status;
    use std::sync::{Arc, Mutex};

    #[test]
    fn placeholders_are_quoted() {
        let renderer = CommandRenderer::new("convert @INPUT@ @OUTDIR@/page.png # @EXT@");
        let command = renderer.command_for(Path::new("/in/Q3 deck.PPTX"), Path::new("/out"));
        assert_eq!(command, "convert '/in/Q3 deck.PPTX' '/out'/page.png # 'pptx'");
    }

    #[test]
    fn pages_come_back_in_name_order() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["page-02.png", "page-10.png", "page-01.png", "source.pdf"] {
            fs::write(tmp.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = collect_pages(tmp.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page-01.png", "page-02.png", "page-10.png"]);
    }

    #[test]
    fn failing_converter_reports_the_last_stderr_line() {
        let tmp = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::clone(&seen);
        let runner: CommandRunner = Arc::new(move |command: &str| -> anyhow::Result<CommandOutput> {
            calls.lock().unwrap().push(command.to_string());
            Ok(CommandOutput {
                status: status(2),
                stdout: String::new(),
                stderr: "loading\nsource file could not be loaded\n".into(),
            })
        });
        let renderer = CommandRenderer::with_runner("soffice @INPUT@", runner);
        let err = renderer
            .render(&tmp.path().join("deck.odp"), &tmp.path().join("out"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to render deck.odp: exit code 2: source file could not be loaded"
        );
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn converter_without_output_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let renderer = CommandRenderer::new("true");
        let err = renderer
            .render(&tmp.path().join("deck.pdf"), &tmp.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
    }
}
