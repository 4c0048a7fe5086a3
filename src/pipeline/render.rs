//! PDF reading: page text, page rasters and embedded images via pdfium.
//!
//! ## Why a trait?
//!
//! The extractor only needs "give me every page of this document". Putting
//! that behind [`PdfReader`] keeps pdfium (a native library that may not be
//! installed on a CI box) out of the extractor's tests, which drive it with
//! an in-memory reader instead.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is CPU-bound and not async-aware. Callers run
//! [`PdfReader::read_document`] on the blocking pool, one document at a time.

use crate::error::CaseDxError;
use crate::pipeline::pdfium::bind_pdfium;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// One embedded raster image pulled out of a page.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    /// Index of the image object on its page; unique per page.
    pub id: usize,
    pub image: DynamicImage,
}

impl EmbeddedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Everything the extractor needs from one page.
#[derive(Debug, Clone)]
pub struct PageContent {
    /// 1-based page number.
    pub number: usize,
    pub text: String,
    pub raster: DynamicImage,
    /// Embedded images already filtered by size, in page order.
    pub embedded: Vec<EmbeddedImage>,
}

/// Source of page contents for a PDF file.
pub trait PdfReader: Send + Sync {
    /// Read every page of the document at `path`, in order.
    fn read_document(&self, path: &Path) -> Result<Vec<PageContent>, CaseDxError>;
}

/// Reader backed by the pdfium shared library.
#[derive(Debug, Clone)]
pub struct PdfiumReader {
    render_scale: f32,
    min_embedded_side: u32,
}

impl PdfiumReader {
    /// Create a reader, verifying up front that pdfium can be bound.
    pub fn new(render_scale: f32, min_embedded_side: u32) -> Result<Self, CaseDxError> {
        let pdfium = bind_pdfium()?;
        drop(pdfium);
        Ok(Self {
            render_scale,
            min_embedded_side,
        })
    }
}

impl PdfReader for PdfiumReader {
    fn read_document(&self, path: &Path) -> Result<Vec<PageContent>, CaseDxError> {
        let pdfium = bind_pdfium()?;

        let document =
            pdfium
                .load_pdf_from_file(path, None)
                .map_err(|e| CaseDxError::CorruptPdf {
                    path: path.to_path_buf(),
                    detail: format!("{:?}", e),
                })?;

        let pages = document.pages();
        info!("{}: {} pages", path.display(), pages.len());

        let render_config = PdfRenderConfig::new().scale_page_by_factor(self.render_scale);
        let mut contents = Vec::with_capacity(pages.len() as usize);

        for (idx, page) in pages.iter().enumerate() {
            let number = idx + 1;

            let text = match page.text() {
                Ok(text) => text.all(),
                Err(e) => {
                    warn!("Page {}: no text layer ({:?})", number, e);
                    String::new()
                }
            };

            let raster = page
                .render_with_config(&render_config)
                .map_err(|e| CaseDxError::RasterisationFailed {
                    page: number,
                    detail: format!("{:?}", e),
                })?
                .as_image();

            let mut embedded = Vec::new();
            for (object_idx, object) in page.objects().iter().enumerate() {
                let Some(image_object) = object.as_image_object() else {
                    continue;
                };
                match image_object.get_raw_image() {
                    Ok(image) => {
                        if keep_embedded(image.width(), image.height(), self.min_embedded_side) {
                            embedded.push(EmbeddedImage {
                                id: object_idx,
                                image,
                            });
                        }
                    }
                    Err(e) => warn!(
                        "Page {}: image object {} unreadable ({:?})",
                        number, object_idx, e
                    ),
                }
            }

            debug!(
                "Page {} → {}x{} px, {} chars, {} embedded images",
                number,
                raster.width(),
                raster.height(),
                text.len(),
                embedded.len()
            );

            contents.push(PageContent {
                number,
                text,
                raster,
                embedded,
            });
        }

        Ok(contents)
    }
}

/// Embedded images are kept only when both sides exceed `min_side`.
pub fn keep_embedded(width: u32, height: u32, min_side: u32) -> bool {
    width > min_side && height > min_side
}
