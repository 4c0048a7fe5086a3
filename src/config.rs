//! Configuration types for the extractor and the requester.
//!
//! Every knob the two pipelines read lives in [`ExtractConfig`] or
//! [`DiagnosisConfig`], passed explicitly to each entry point. Both are built
//! through a validating builder so the CLI and library callers share the same
//! defaults and range checks.

use crate::error::CaseDxError;
use crate::pipeline::classify::Provider;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Inclusive range of case numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRange {
    pub start: u32,
    pub end: u32,
}

impl CaseRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn iter(&self) -> impl Iterator<Item = crate::layout::CaseId> {
        (self.start..=self.end).map(crate::layout::CaseId)
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> Result<(), CaseDxError> {
        if self.start < 1 {
            return Err(CaseDxError::InvalidConfig(
                "Case numbers start at 1".into(),
            ));
        }
        if self.start > self.end {
            return Err(CaseDxError::InvalidConfig(format!(
                "Invalid case range {}-{}: start must be <= end",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

impl Default for CaseRange {
    fn default() -> Self {
        Self { start: 1, end: 318 }
    }
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Configuration for PDF extraction.
#[derive(Clone)]
pub struct ExtractConfig {
    /// Folder holding `case-<n>.pdf`. Default: `pdfs`.
    pub input_dir: PathBuf,

    /// Folder receiving `case-<n>/`. Default: `output`.
    pub output_dir: PathBuf,

    pub cases: CaseRange,

    /// Scale applied to every page render. Default: 0.9.
    ///
    /// Pages are rendered at their natural PDF size times this factor,
    /// trading a little sharpness for smaller uploads later on.
    pub render_scale: f32,

    /// JPEG quality of page renders. Default: 85.
    pub jpeg_quality: u8,

    /// Embedded images must exceed this on both sides to be saved. Default: 120.
    pub min_embedded_side: u32,

    /// Optional per-case progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("pdfs"),
            output_dir: PathBuf::from("output"),
            cases: CaseRange::default(),
            render_scale: 0.9,
            jpeg_quality: 85,
            min_embedded_side: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractConfig")
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .field("cases", &self.cases)
            .field("render_scale", &self.render_scale)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("min_embedded_side", &self.min_embedded_side)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractConfig {
    pub fn builder() -> ExtractConfigBuilder {
        ExtractConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractConfig`].
#[derive(Debug)]
pub struct ExtractConfigBuilder {
    config: ExtractConfig,
}

impl ExtractConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn cases(mut self, start: u32, end: u32) -> Self {
        self.config.cases = CaseRange::new(start, end);
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn min_embedded_side(mut self, px: u32) -> Self {
        self.config.min_embedded_side = px;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn build(self) -> Result<ExtractConfig, CaseDxError> {
        let c = &self.config;
        c.cases.validate()?;
        if !(c.render_scale > 0.0 && c.render_scale <= 4.0) {
            return Err(CaseDxError::InvalidConfig(format!(
                "Render scale must be in (0, 4], got {}",
                c.render_scale
            )));
        }
        Ok(self.config)
    }
}

// ── Requester ────────────────────────────────────────────────────────────────

/// Configuration for the diagnosis requester.
#[derive(Clone)]
pub struct DiagnosisConfig {
    pub provider: Provider,

    /// Model identifier. If None, uses [`Provider::default_model`].
    pub model: Option<String>,

    /// Folder holding the extractor's `case-<n>/` folders. Default: `output`.
    pub cases_dir: PathBuf,

    /// Folder under which `<prefix>_result/` is created. Default: `.`.
    pub results_root: PathBuf,

    /// Result folder prefix. If None, uses [`Provider::result_prefix`].
    pub result_prefix: Option<String>,

    pub cases: CaseRange,

    /// Sampling temperatures; each gets its own set of result folders.
    /// Default: `[0.0, 0.5, 1.0]`.
    pub temperatures: Vec<f32>,

    /// Independent samples per temperature. Default: 5.
    ///
    /// Each try writes to its own folder so answers can later be compared
    /// for agreement or majority vote.
    pub tries: u32,

    /// Provider calls per case before giving up. Default: 10.
    pub max_attempts: u32,

    /// Delay before the second attempt, doubled after each further one. Default: 0.
    pub retry_backoff_ms: u64,

    /// Completion token cap. Default: provider-specific.
    pub max_tokens: Option<usize>,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Case images must exceed this on both sides to be uploaded. Default: 150.
    pub min_image_side: u32,

    /// Optional per-case progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl DiagnosisConfig {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            model: None,
            cases_dir: PathBuf::from("output"),
            results_root: PathBuf::from("."),
            result_prefix: None,
            cases: CaseRange::default(),
            temperatures: vec![0.0, 0.5, 1.0],
            tries: 5,
            max_attempts: 10,
            retry_backoff_ms: 0,
            max_tokens: provider.default_max_tokens(),
            api_timeout_secs: 120,
            min_image_side: 150,
            progress_callback: None,
        }
    }

    pub fn builder(provider: Provider) -> DiagnosisConfigBuilder {
        DiagnosisConfigBuilder {
            config: Self::new(provider),
        }
    }

    /// Effective result folder prefix.
    pub fn prefix(&self) -> &str {
        self.result_prefix
            .as_deref()
            .unwrap_or(self.provider.result_prefix())
    }
}

impl fmt::Debug for DiagnosisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosisConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("cases_dir", &self.cases_dir)
            .field("results_root", &self.results_root)
            .field("result_prefix", &self.result_prefix)
            .field("cases", &self.cases)
            .field("temperatures", &self.temperatures)
            .field("tries", &self.tries)
            .field("max_attempts", &self.max_attempts)
            .field("max_tokens", &self.max_tokens)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

/// Builder for [`DiagnosisConfig`].
#[derive(Debug)]
pub struct DiagnosisConfigBuilder {
    config: DiagnosisConfig,
}

impl DiagnosisConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn cases_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cases_dir = dir.into();
        self
    }

    pub fn results_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.results_root = dir.into();
        self
    }

    pub fn result_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.result_prefix = Some(prefix.into());
        self
    }

    pub fn cases(mut self, start: u32, end: u32) -> Self {
        self.config.cases = CaseRange::new(start, end);
        self
    }

    pub fn temperatures(mut self, temps: Vec<f32>) -> Self {
        self.config.temperatures = temps;
        self
    }

    pub fn tries(mut self, n: u32) -> Self {
        self.config.tries = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_tokens(mut self, n: Option<usize>) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn min_image_side(mut self, px: u32) -> Self {
        self.config.min_image_side = px;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DiagnosisConfig, CaseDxError> {
        let c = &self.config;
        c.cases.validate()?;
        if c.temperatures.is_empty() {
            return Err(CaseDxError::InvalidConfig(
                "At least one temperature is required".into(),
            ));
        }
        if let Some(t) = c.temperatures.iter().find(|t| !(0.0..=2.0).contains(*t)) {
            return Err(CaseDxError::InvalidConfig(format!(
                "Temperature must be 0.0–2.0, got {t}"
            )));
        }
        if c.tries == 0 {
            return Err(CaseDxError::InvalidConfig("Tries must be ≥ 1".into()));
        }
        if c.max_attempts == 0 {
            return Err(CaseDxError::InvalidConfig(
                "Max attempts must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
