use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use crate::categorize::{CodeCategorizer, CodeCategory};
use crate::config::OutputConfig;
use crate::sandbox::{ExecutionResult, ExitReason};
use crate::utils::truncate_middle;

/// Below this confidence saved snippets go to the `general` folder.
const MIN_CATEGORY_CONFIDENCE: f64 = 0.5;

/// What the front ends show for one execution attempt.
#[derive(Clone, Debug, Serialize)]
pub struct RenderedOutput {
    /// One-line, user-facing outcome.
    pub summary: String,
    /// Summary plus formatted stdout/stderr, clipped for display.
    pub text: String,
    pub result: ExecutionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<CodeCategory>,
}

impl RenderedOutput {
    pub fn success(&self) -> bool {
        self.result.success
    }
}

#[derive(Clone, Debug)]
pub struct OutputHandler {
    config: OutputConfig,
    categorizer: CodeCategorizer,
}

impl OutputHandler {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            config,
            categorizer: CodeCategorizer::new(),
        }
    }

    pub fn handle(&self, mut result: ExecutionResult, source_code: &str) -> RenderedOutput {
        let mut category = None;
        if result.success && self.config.auto_save && !source_code.trim().is_empty() {
            let categorization = self.categorizer.categorize(source_code);
            let folder = if categorization.confidence < MIN_CATEGORY_CONFIDENCE {
                CodeCategory::General
            } else {
                categorization.category
            };
            match self.persist(source_code, folder) {
                Ok(path) => {
                    info!(path = %path.display(), category = %folder, "saved executed snippet");
                    result.saved_path = Some(path);
                    category = Some(folder);
                }
                Err(err) => {
                    warn!(error = %err, folder = %self.config.save_folder.display(), "failed to save snippet");
                    result.saved_path = None;
                }
            }
        }

        let summary = summarize(&result);
        let text = self.format_text(&summary, &result);
        RenderedOutput {
            summary,
            text,
            result,
            category,
        }
    }

    fn persist(&self, source_code: &str, category: CodeCategory) -> io::Result<PathBuf> {
        let dir = self.config.save_folder.join(category.as_str());
        fs::create_dir_all(&dir)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let mut attempt = 0;
        loop {
            let name = if attempt == 0 {
                format!("code_{stamp}.py")
            } else {
                format!("code_{stamp}_{attempt}.py")
            };
            let path = dir.join(name);
            match create_new(&path) {
                Ok(file) => {
                    write_or_remove(file, &path, source_code.as_bytes())?;
                    return Ok(path);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => {
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn format_text(&self, summary: &str, result: &ExecutionResult) -> String {
        let mut text = summary.to_owned();
        if result.exit_reason == ExitReason::RejectedByAnalyzer {
            return text;
        }
        let limit = self.config.display_limit;
        let stdout = result.stdout.trim_end();
        let stderr = result.stderr.trim_end();
        if !stdout.is_empty() {
            text.push_str("\n\nOutput:\n");
            text.push_str(&truncate_middle(stdout, limit));
        }
        if !stderr.is_empty() {
            text.push_str("\n\nErrors:\n");
            text.push_str(&truncate_middle(stderr, limit));
        }
        if stdout.is_empty() && stderr.is_empty() && result.success {
            text.push_str("\n\n(no output)");
        }
        if let Some(path) = &result.saved_path {
            text.push_str(&format!("\n\nSaved to {}", path.display()));
        }
        text
    }
}

fn create_new(path: &Path) -> io::Result<fs::File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// On a failed write `path` is removed, so no truncated snippet is left behind.
fn write_or_remove<W: Write>(mut file: W, path: &Path, contents: &[u8]) -> io::Result<()> {
    let written = file.write_all(contents).and_then(|()| file.flush());
    if let Err(err) = &written {
        drop(file);
        if let Err(remove_err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %remove_err, write_error = %err, "failed to remove partial snippet");
        }
    }
    written
}

fn summarize(result: &ExecutionResult) -> String {
    match result.exit_reason {
        ExitReason::Completed => format!("Execution completed in {} ms.", result.elapsed_ms),
        ExitReason::Timeout => "Execution timed out and was terminated.".to_owned(),
        ExitReason::MemoryExceeded => {
            "Execution exceeded the memory limit and was terminated.".to_owned()
        }
        ExitReason::RuntimeError => match result.exit_code {
            Some(code) => format!("Execution failed with exit code {code}."),
            None => "Execution failed.".to_owned(),
        },
        ExitReason::RejectedByAnalyzer => format!("Not executed: {}", result.stderr.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{DenyReason, FakeExecutor};

    fn handler(dir: &Path, auto_save: bool) -> OutputHandler {
        OutputHandler::new(OutputConfig {
            auto_save,
            save_folder: dir.to_path_buf(),
            ..OutputConfig::default()
        })
    }

    #[test]
    fn saves_successful_snippets_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let source = "import pandas as pd\ndf = pd.read_csv('a.csv')\ndf.plot()";
        let rendered = handler(dir.path(), true).handle(FakeExecutor::completed("ok\n"), source);
        let path = rendered.result.saved_path.clone().unwrap();
        assert!(path.starts_with(dir.path().join("data_analysis")));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("code_") && name.ends_with(".py"));
        assert_eq!(fs::read_to_string(&path).unwrap(), source);
        assert_eq!(rendered.category, Some(CodeCategory::DataAnalysis));
        assert!(rendered.text.contains("Output:\nok"));
    }

    #[test]
    fn low_confidence_goes_to_general() {
        let dir = tempfile::tempdir().unwrap();
        let rendered =
            handler(dir.path(), true).handle(FakeExecutor::completed("5\n"), "print(2 + 3)");
        let path = rendered.result.saved_path.unwrap();
        assert!(path.starts_with(dir.path().join("general")));
    }

    #[test]
    fn back_to_back_saves_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path(), true);
        let first = handler.handle(FakeExecutor::completed(""), "print(1)");
        let second = handler.handle(FakeExecutor::completed(""), "print(1)");
        assert_ne!(first.result.saved_path, second.result.saved_path);
    }

    #[test]
    fn persistence_failure_keeps_success() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let rendered = handler(&blocker, true).handle(FakeExecutor::completed("5\n"), "print(5)");
        assert!(rendered.success());
        assert_eq!(rendered.result.saved_path, None);
        assert!(rendered.summary.starts_with("Execution completed"));
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("code_partial.py");
        fs::write(&path, "print(").unwrap();
        let err = write_or_remove(FullDisk, &path, b"print(1)").unwrap_err();
        assert_eq!(err.to_string(), "no space left on device");
        assert!(!path.exists());

        let kept = dir.path().join("code_whole.py");
        write_or_remove(create_new(&kept).unwrap(), &kept, b"print(1)").unwrap();
        assert_eq!(fs::read_to_string(&kept).unwrap(), "print(1)");
    }

    #[test]
    fn failures_and_disabled_saving_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let failed = ExecutionResult {
            success: false,
            exit_reason: ExitReason::RuntimeError,
            exit_code: Some(1),
            stderr: "ZeroDivisionError: division by zero\n".to_owned(),
            ..FakeExecutor::completed("")
        };
        let rendered = handler(dir.path(), true).handle(failed, "1/0");
        assert_eq!(rendered.summary, "Execution failed with exit code 1.");
        assert!(rendered.text.contains("Errors:\nZeroDivisionError"));
        assert_eq!(rendered.result.saved_path, None);

        let rendered = handler(dir.path(), false).handle(FakeExecutor::completed("1\n"), "print(1)");
        assert_eq!(rendered.result.saved_path, None);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn rejection_is_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let reason = DenyReason::DynamicCode("eval".to_owned());
        let rendered =
            handler(dir.path(), true).handle(ExecutionResult::rejected(&reason), "eval('1')");
        assert_eq!(
            rendered.summary,
            "Not executed: call to `eval` is not allowed (dynamic code execution)"
        );
        assert_eq!(rendered.text, rendered.summary);
    }

    #[test]
    fn timeout_and_memory_have_distinct_messages() {
        let timeout = ExecutionResult {
            success: false,
            exit_reason: ExitReason::Timeout,
            exit_code: None,
            ..FakeExecutor::completed("")
        };
        let memory = ExecutionResult {
            exit_reason: ExitReason::MemoryExceeded,
            ..timeout.clone()
        };
        assert_eq!(summarize(&timeout), "Execution timed out and was terminated.");
        assert!(summarize(&memory).contains("memory limit"));
    }
}
