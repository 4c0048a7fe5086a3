//! On-disk layout shared by the extractor and the requester.
//!
//! The folder convention is the only coupling between the two pipelines:
//! the extractor writes `output/case-<n>/…`, the requester reads it and
//! writes `<prefix>_result/<prefix>_result_temp_<t>_try<i>/case-<n>.txt`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Extracted history text, one blob per page that mentions "History".
pub const HISTORY_FILE: &str = "history_texts.txt";
/// Figure legends, one `"<legend> (Page N)"` line per match.
pub const LEGENDS_FILE: &str = "figure_legends.txt";

/// File extensions the requester treats as case images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "gif"];

/// Sequential case number; renders as `case-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaseId(pub u32);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "case-{}", self.0)
    }
}

/// Paths of the extractor's inputs and outputs.
#[derive(Debug, Clone)]
pub struct CaseLayout {
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl CaseLayout {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn pdf_path(&self, case: CaseId) -> PathBuf {
        self.input_dir.join(format!("{case}.pdf"))
    }

    pub fn case_dir(&self, case: CaseId) -> PathBuf {
        self.output_dir.join(case.to_string())
    }

    /// Page render for 1-based page `page`.
    pub fn page_image(&self, case: CaseId, page: usize) -> PathBuf {
        self.case_dir(case).join(format!("page_{page}.jpeg"))
    }

    pub fn embedded_image(&self, case: CaseId, page: usize, id: usize, ext: &str) -> PathBuf {
        self.case_dir(case)
            .join(format!("page_{page}_image_{id}.{ext}"))
    }

    pub fn history_file(&self, case: CaseId) -> PathBuf {
        self.case_dir(case).join(HISTORY_FILE)
    }

    pub fn legends_file(&self, case: CaseId) -> PathBuf {
        self.case_dir(case).join(LEGENDS_FILE)
    }
}

/// Paths of the requester's result artifacts.
#[derive(Debug, Clone)]
pub struct ResultLayout {
    root: PathBuf,
    prefix: String,
}

impl ResultLayout {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// `<root>/<prefix>_result`, parent of every run folder.
    pub fn provider_dir(&self) -> PathBuf {
        self.root.join(format!("{}_result", self.prefix))
    }

    /// Folder holding one (temperature, try) sample set.
    pub fn run_dir(&self, temperature: f32, try_number: u32) -> PathBuf {
        self.provider_dir().join(format!(
            "{}_result_temp_{}_try{}",
            self.prefix,
            temperature_label(temperature),
            try_number
        ))
    }

    pub fn result_file(&self, temperature: f32, try_number: u32, case: CaseId) -> PathBuf {
        self.run_dir(temperature, try_number)
            .join(format!("{case}.txt"))
    }

    /// Append-only log of cases that ended without an accepted answer.
    pub fn failure_log(&self) -> PathBuf {
        self.root.join("process_log.txt")
    }
}

/// Shortest decimal rendering of `t` with `.` replaced by `_` (`0.5` → `0_5`, `1.0` → `1`).
pub fn temperature_label(t: f32) -> String {
    t.to_string().replace('.', "_")
}

/// Image files directly inside `dir`, sorted by file name.
pub fn list_case_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                IMAGE_EXTENSIONS.contains(&e.as_str())
            })
            .unwrap_or(false);
        if is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
