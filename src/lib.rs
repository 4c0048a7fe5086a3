//! # casedx
//!
//! Batch differential diagnosis of published medical cases with
//! vision-language models.
//!
//! ## Why this crate?
//!
//! Case-report PDFs mix narrative text, figure legends and clinical images.
//! Benchmarking a vision model on them needs the same inputs sent the same way
//! many times over: several temperatures, several independent samples each,
//! hundreds of cases, against APIs that refuse, time out and run out of quota.
//! This crate splits that into two resumable pipelines sharing one folder
//! convention.
//!
//! ## Pipeline Overview
//!
//! ```text
//! pdfs/case-<n>.pdf
//!  │
//!  ├─ extract   render pages, save embedded images, pull "History" and
//!  │            "Figure" text  ──▶ output/case-<n>/
//!  │
//!  └─ diagnose  prompt + images ──▶ VLM (retry, shrink on refusal)
//!               ──▶ <prefix>_result/<prefix>_result_temp_<t>_try<i>/case-<n>.txt
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use casedx::{run_diagnosis, DiagnosisConfig, LlmVisionClient, Provider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Needs OPENAI_API_KEY in the environment.
//!     let config = DiagnosisConfig::builder(Provider::OpenAi)
//!         .cases(1, 10)
//!         .temperatures(vec![0.0])
//!         .tries(1)
//!         .build()?;
//!     let client = LlmVisionClient::from_config(&config)?;
//!     let summary = run_diagnosis(&client, &config).await?;
//!     eprintln!("{} saved, {} failed", summary.saved, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `casedx` binary (clap + anyhow + tracing-subscriber + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! casedx = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod diagnose;
pub mod error;
pub mod extract;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CaseRange, DiagnosisConfig, DiagnosisConfigBuilder, ExtractConfig, ExtractConfigBuilder};
pub use diagnose::run_diagnosis;
pub use error::{CaseDxError, CaseError};
pub use extract::{extract_case, extract_cases, extract_cases_with};
pub use layout::{CaseId, CaseLayout, ResultLayout};
pub use output::{CaseReport, CaseStatus, DiagnosisSummary, ExtractedCase, ExtractionSummary};
pub use pipeline::classify::Provider;
pub use pipeline::llm::{LlmVisionClient, VisionClient};
pub use pipeline::render::{PdfReader, PdfiumReader};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
