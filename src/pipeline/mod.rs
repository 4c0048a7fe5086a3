//! Pipeline stages shared by the extractor and the requester.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! extractor:  pdfium ──▶ render ──▶ text
//!             (bind)     (pages)    (history, legends)
//!
//! requester:  encode ──▶ llm ◀──── classify
//!             (JPEG)     (retry)   (per provider)
//! ```
//!
//! 1. [`pdfium`]: locate and bind the pdfium shared library
//! 2. [`render`]: read page text, page rasters and embedded images; blocking,
//!    so callers run it in `spawn_blocking`
//! 3. [`text`]: pure scans for history sections and figure legends
//! 4. [`encode`]: JPEG + base64 under the upload ceiling, shrinking as needed
//! 5. [`classify`]: provider-specific reading of replies and errors
//! 6. [`llm`]: the vision-client seam and the bounded retry fold; the
//!    only stage with network I/O

pub mod classify;
pub mod encode;
pub mod llm;
pub mod pdfium;
pub mod render;
pub mod text;
