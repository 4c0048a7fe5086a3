//! Binding to the pdfium shared library.
//!
//! Resolution order (first match wins):
//!
//! 1. `PDFIUM_LIB_PATH`: a library file, or a directory containing one
//! 2. `libpdfium` in the current working directory
//! 3. the system library search path

use crate::error::CaseDxError;
use pdfium_render::prelude::Pdfium;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable pointing at an existing pdfium library.
pub const PDFIUM_LIB_PATH_VAR: &str = "PDFIUM_LIB_PATH";

/// Bind to pdfium following the resolution order above.
pub fn bind_pdfium() -> Result<Pdfium, CaseDxError> {
    if let Ok(value) = std::env::var(PDFIUM_LIB_PATH_VAR) {
        if !value.is_empty() {
            let path = library_path(Path::new(&value));
            debug!("Binding pdfium from {}", path.display());
            return bind_from_path(&path);
        }
    }

    let local = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&local) {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(local_err) => Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|system_err| {
                CaseDxError::PdfiumBindingFailed(format!(
                    "{}: {local_err}; system library: {system_err}",
                    local.display()
                ))
            }),
    }
}

/// Bind to a pdfium library at an explicit `path`.
pub fn bind_from_path(path: &Path) -> Result<Pdfium, CaseDxError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| CaseDxError::PdfiumBindingFailed(format!("{}: {e}", path.display())))
}

/// A directory resolves to the platform library name inside it.
fn library_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}
