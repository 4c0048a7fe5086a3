//! Result types returned by the two pipelines.
//!
//! Both summaries serialise to JSON (`casedx diagnose --json`) so a batch
//! run can be audited or diffed without walking the result folders.

use crate::error::CaseError;
use crate::layout::CaseId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Artifacts written for one extracted case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedCase {
    pub case: u32,
    pub pages: usize,
    pub page_images: Vec<PathBuf>,
    pub embedded_images: Vec<PathBuf>,
    /// Number of pages that contributed a history section.
    pub history_sections: usize,
    pub figure_legends: usize,
}

/// Outcome of an extractor batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub extracted: Vec<ExtractedCase>,
    /// Case numbers with no PDF in the input folder.
    pub missing: Vec<u32>,
    pub failed: Vec<CaseError>,
    pub total_duration_ms: u64,
}

/// How a single (case, temperature, try) slot ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// An accepted answer was written.
    Saved,
    /// A result file from an earlier run was already there.
    SkippedExisting,
    /// History or legend text was not extracted for this case.
    SkippedMissing,
    /// No answer written; see `error`.
    Failed,
}

/// Per-slot record of a diagnosis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub case: u32,
    pub temperature: f32,
    pub try_number: u32,
    pub status: CaseStatus,

    /// Provider calls made (0 when skipped).
    pub attempts: u32,

    #[serde(default)]
    pub input_tokens: usize,

    #[serde(default)]
    pub output_tokens: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_file: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CaseError>,
}

impl CaseReport {
    pub(crate) fn new(case: CaseId, temperature: f32, try_number: u32, status: CaseStatus) -> Self {
        Self {
            case: case.0,
            temperature,
            try_number,
            status,
            attempts: 0,
            input_tokens: 0,
            output_tokens: 0,
            result_file: None,
            error: None,
        }
    }
}

/// Outcome of a diagnosis run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosisSummary {
    pub provider: String,
    pub model: String,
    pub saved: usize,
    pub skipped_existing: usize,
    pub skipped_missing: usize,
    pub failed: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
    pub reports: Vec<CaseReport>,
}

impl DiagnosisSummary {
    /// Fold one report into the counters and keep it.
    pub fn record(&mut self, report: CaseReport) {
        match report.status {
            CaseStatus::Saved => self.saved += 1,
            CaseStatus::SkippedExisting => self.skipped_existing += 1,
            CaseStatus::SkippedMissing => self.skipped_missing += 1,
            CaseStatus::Failed => self.failed += 1,
        }
        self.total_input_tokens += report.input_tokens as u64;
        self.total_output_tokens += report.output_tokens as u64;
        self.reports.push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_updates_counters() {
        let mut summary = DiagnosisSummary::default();
        let mut saved = CaseReport::new(CaseId(1), 0.5, 1, CaseStatus::Saved);
        saved.input_tokens = 900;
        saved.output_tokens = 300;
        summary.record(saved);
        summary.record(CaseReport::new(CaseId(2), 0.5, 1, CaseStatus::SkippedExisting));
        summary.record(CaseReport::new(CaseId(3), 0.5, 1, CaseStatus::SkippedMissing));
        summary.record(CaseReport::new(CaseId(4), 0.5, 1, CaseStatus::Failed));

        assert_eq!(summary.saved, 1);
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(summary.skipped_missing, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_input_tokens, 900);
        assert_eq!(summary.reports.len(), 4);
    }

    #[test]
    fn report_serialises_status_in_snake_case() {
        let mut report = CaseReport::new(CaseId(7), 1.0, 3, CaseStatus::Failed);
        report.error = Some(CaseError::ProviderExhausted {
            case: 7,
            attempts: 10,
            detail: "refused".into(),
        });
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\":\"failed\""), "got: {json}");
        assert!(json.contains("ProviderExhausted"), "got: {json}");
        assert!(!json.contains("result_file"), "got: {json}");
    }
}
