//! Progress-callback trait for per-case pipeline events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::ExtractConfigBuilder::progress_callback`] or
//! [`crate::config::DiagnosisConfigBuilder::progress_callback`] to receive
//! events as each case is processed. Both pipelines fire the same events;
//! the `label` passed to [`RunProgressCallback::on_case_start`] tells the
//! receiver which (temperature, try) sample set a requester case belongs to.
//!
//! # Example
//!
//! ```rust
//! use casedx::{DiagnosisConfig, Provider, RunProgressCallback};
//! use casedx::layout::CaseId;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     saved: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_case_complete(&self, case: CaseId, bytes: usize) {
//!         let done = self.saved.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{case} saved ({bytes} bytes), {done} so far");
//!     }
//! }
//!
//! let config = DiagnosisConfig::builder(Provider::OpenAi)
//!     .progress_callback(Arc::new(CountingCallback { saved: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::layout::CaseId;
use std::sync::Arc;

/// Called by the pipelines as they work through a case range.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait RunProgressCallback: Send + Sync {
    /// Called once before the first case.
    ///
    /// # Arguments
    /// * `total_cases`: number of case slots the run will visit
    ///   (cases × temperatures × tries for the requester)
    fn on_run_start(&self, total_cases: usize) {
        let _ = total_cases;
    }

    /// Called when work on a case begins.
    fn on_case_start(&self, case: CaseId, label: &str) {
        let _ = (case, label);
    }

    /// Called when a case is skipped (result present, input missing).
    fn on_case_skipped(&self, case: CaseId, reason: &str) {
        let _ = (case, reason);
    }

    /// Called when a case's artifacts were written.
    ///
    /// # Arguments
    /// * `bytes`: size of the main artifact written (result text, or
    ///   history text for the extractor)
    fn on_case_complete(&self, case: CaseId, bytes: usize) {
        let _ = (case, bytes);
    }

    /// Called when a case failed without stopping the run.
    fn on_case_error(&self, case: CaseId, error: &str) {
        let _ = (case, error);
    }

    /// Called once after the last case.
    fn on_run_complete(&self, total_cases: usize, succeeded: usize) {
        let _ = (total_cases, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in the configs.
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
