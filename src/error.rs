//! Error types for the casedx library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CaseDxError`]: **Fatal**: the run cannot proceed at all (bad
//!   configuration, pdfium unavailable, provider quota exhausted). Returned as
//!   `Err(CaseDxError)` from the top-level pipeline functions.
//!
//! * [`CaseError`]: **Non-fatal**: a single case failed (unreadable PDF,
//!   image that will not shrink under the upload ceiling, provider that kept
//!   refusing) but the batch carries on. Stored inside
//!   [`crate::output::CaseReport`] so callers can see which cases need a rerun.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::encode::EncodeError;

/// All fatal errors returned by the casedx library.
#[derive(Debug, Error)]
pub enum CaseDxError {
    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The provider reported an exhausted quota; the whole run stops.
    #[error("Quota exceeded for provider '{provider}': {detail}")]
    QuotaExceeded { provider: String, detail: String },

    // ── Image errors ──────────────────────────────────────────────────────
    /// An image could not be encoded for upload.
    #[error("Failed to encode '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: EncodeError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read an input artifact.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDF extraction needs the pdfium shared library. You can:\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium (file or directory).\n\
  • Place libpdfium next to the working directory.\n\
  • Install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single case.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum CaseError {
    /// A required input (PDF or extracted text file) is absent.
    #[error("Case {case}: missing input '{path}'")]
    MissingInput { case: u32, path: PathBuf },

    /// The PDF could not be read or its artifacts could not be written.
    #[error("Case {case}: extraction failed: {detail}")]
    ExtractionFailed { case: u32, detail: String },

    /// An extracted text file exists but could not be read.
    #[error("Case {case}: cannot read '{path}': {detail}")]
    ReadFailed {
        case: u32,
        path: PathBuf,
        detail: String,
    },

    /// A case image could not be encoded under the upload ceiling.
    #[error("Case {case}: image encoding failed: {detail}")]
    EncodeFailed { case: u32, detail: String },

    /// The provider never produced an accepted answer.
    #[error("Case {case}: no accepted answer after {attempts} attempts: {detail}")]
    ProviderExhausted {
        case: u32,
        attempts: u32,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_display_names_provider() {
        let e = CaseDxError::QuotaExceeded {
            provider: "openai".into(),
            detail: "You exceeded your current quota".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("openai"), "got: {msg}");
        assert!(msg.contains("exceeded"), "got: {msg}");
    }

    #[test]
    fn encode_error_display_includes_path() {
        let e = CaseDxError::Encode {
            path: PathBuf::from("output/case-3/page_1.jpeg"),
            source: EncodeError::TooLarge {
                attempts: 5,
                last_size: 30_000_000,
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("case-3/page_1.jpeg"), "got: {msg}");
    }

    #[test]
    fn provider_exhausted_display() {
        let e = CaseError::ProviderExhausted {
            case: 12,
            attempts: 10,
            detail: "I'm sorry, but I can't help".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Case 12"));
        assert!(msg.contains("10 attempts"));
    }

    #[test]
    fn missing_input_serialises() {
        let e = CaseError::MissingInput {
            case: 2,
            path: PathBuf::from("pdfs/case-2.pdf"),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("MissingInput"));
        assert!(json.contains("case-2.pdf"));
    }
}
