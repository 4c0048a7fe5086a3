//! Extractor entry points: turn `case-<n>.pdf` files into case folders.
//!
//! For every case in range the extractor writes, under `output/case-<n>/`:
//!
//! ```text
//! page_<k>.jpeg              full-page render, one per page
//! page_<k>_image_<id>.png    embedded images larger than 120×120
//! history_texts.txt          "History" sections, blank-line separated
//! figure_legends.txt         one "<legend> (Page <k>)" line per legend
//! ```
//!
//! Cases are processed one at a time. A missing PDF is a skip, an unreadable
//! PDF is a per-case failure; neither stops the batch.

use crate::config::ExtractConfig;
use crate::error::{CaseDxError, CaseError};
use crate::layout::{CaseId, CaseLayout};
use crate::output::{ExtractedCase, ExtractionSummary};
use crate::pipeline::encode::{encode_jpeg, EncodeError};
use crate::pipeline::render::{PdfReader, PdfiumReader};
use crate::pipeline::text::{
    extract_history, find_figure_legends, render_history_file, render_legends_file,
};
use image::ImageFormat;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract one case whose PDF is known to exist.
///
/// Blocking: call from `spawn_blocking` when inside a runtime.
pub fn extract_case<R: PdfReader + ?Sized>(
    reader: &R,
    layout: &CaseLayout,
    case: CaseId,
    config: &ExtractConfig,
) -> Result<ExtractedCase, CaseDxError> {
    let pdf_path = layout.pdf_path(case);
    let pages = reader.read_document(&pdf_path)?;

    let case_dir = layout.case_dir(case);
    fs::create_dir_all(&case_dir).map_err(|source| CaseDxError::OutputWriteFailed {
        path: case_dir.clone(),
        source,
    })?;

    let mut page_images = Vec::with_capacity(pages.len());
    let mut embedded_images = Vec::new();

    for page in &pages {
        let path = layout.page_image(case, page.number);
        let jpeg = encode_jpeg(&page.raster, config.jpeg_quality).map_err(|e| {
            CaseDxError::Encode {
                path: path.clone(),
                source: EncodeError::Image(e),
            }
        })?;
        write_file(&path, &jpeg)?;
        page_images.push(path);

        for embedded in &page.embedded {
            let path = layout.embedded_image(case, page.number, embedded.id, "png");
            embedded
                .image
                .save_with_format(&path, ImageFormat::Png)
                .map_err(|e| CaseDxError::Encode {
                    path: path.clone(),
                    source: EncodeError::Image(e),
                })?;
            debug!(
                "{}: saved {}x{} image from page {}",
                case,
                embedded.width(),
                embedded.height(),
                page.number
            );
            embedded_images.push(path);
        }
    }

    let texts: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
    let history = extract_history(&texts);
    let legends = find_figure_legends(&texts);

    write_file(&layout.history_file(case), render_history_file(&history).as_bytes())?;
    write_file(&layout.legends_file(case), render_legends_file(&legends).as_bytes())?;

    info!(
        "{}: {} pages, {} embedded images, {} history sections, {} legends",
        case,
        pages.len(),
        embedded_images.len(),
        history.len(),
        legends.len()
    );

    Ok(ExtractedCase {
        case: case.0,
        pages: pages.len(),
        page_images,
        embedded_images,
        history_sections: history.len(),
        figure_legends: legends.len(),
    })
}

/// Extract every case in `config.cases` using pdfium.
///
/// # Errors
/// Only when pdfium cannot be bound or the configuration is unusable;
/// per-case problems are reported in the summary.
pub async fn extract_cases(config: &ExtractConfig) -> Result<ExtractionSummary, CaseDxError> {
    let scale = config.render_scale;
    let min_side = config.min_embedded_side;
    let reader = tokio::task::spawn_blocking(move || PdfiumReader::new(scale, min_side))
        .await
        .map_err(|e| CaseDxError::Internal(format!("pdfium bind task panicked: {}", e)))??;
    extract_cases_with(Arc::new(reader), config).await
}

/// Extract every case in `config.cases` with the given reader.
pub async fn extract_cases_with<R>(
    reader: Arc<R>,
    config: &ExtractConfig,
) -> Result<ExtractionSummary, CaseDxError>
where
    R: PdfReader + 'static,
{
    let start = Instant::now();
    let layout = CaseLayout::new(&config.input_dir, &config.output_dir);
    let shared = Arc::new(config.clone());
    let cb = config.progress_callback.as_ref();

    info!(
        "Extracting cases {}-{} from {}",
        config.cases.start,
        config.cases.end,
        config.input_dir.display()
    );
    if let Some(cb) = cb {
        cb.on_run_start(config.cases.len());
    }

    let mut summary = ExtractionSummary::default();

    for case in config.cases.iter() {
        let pdf_path = layout.pdf_path(case);
        if !pdf_path.is_file() {
            info!("{}: {} not found, skipping", case, pdf_path.display());
            if let Some(cb) = cb {
                cb.on_case_skipped(case, "PDF not found");
            }
            summary.missing.push(case.0);
            continue;
        }

        if let Some(cb) = cb {
            cb.on_case_start(case, "extract");
        }

        let reader = Arc::clone(&reader);
        let task_layout = layout.clone();
        let task_config = Arc::clone(&shared);
        let result = tokio::task::spawn_blocking(move || {
            extract_case(&*reader, &task_layout, case, &task_config)
        })
        .await
        .map_err(|e| CaseDxError::Internal(format!("extract task panicked: {}", e)))?;

        match result {
            Ok(extracted) => {
                if let Some(cb) = cb {
                    cb.on_case_complete(case, history_size(&layout.history_file(case)));
                }
                summary.extracted.push(extracted);
            }
            Err(e @ CaseDxError::PdfiumBindingFailed(_)) => return Err(e),
            Err(e) => {
                warn!("{}: extraction failed: {}", case, e);
                if let Some(cb) = cb {
                    cb.on_case_error(case, &e.to_string());
                }
                summary.failed.push(CaseError::ExtractionFailed {
                    case: case.0,
                    detail: e.to_string(),
                });
            }
        }
    }

    summary.total_duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Extraction complete: {} extracted, {} missing, {} failed, {}ms",
        summary.extracted.len(),
        summary.missing.len(),
        summary.failed.len(),
        summary.total_duration_ms
    );
    if let Some(cb) = cb {
        cb.on_run_complete(config.cases.len(), summary.extracted.len());
    }

    Ok(summary)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), CaseDxError> {
    fs::write(path, bytes).map_err(|source| CaseDxError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn history_size(path: &Path) -> usize {
    fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::render::{EmbeddedImage, PageContent};
    use image::DynamicImage;

    struct OnePage;

    impl PdfReader for OnePage {
        fn read_document(&self, _path: &Path) -> Result<Vec<PageContent>, CaseDxError> {
            Ok(vec![PageContent {
                number: 1,
                text: "Case report. History of fever.\nFigure 1 Chest film".into(),
                raster: DynamicImage::new_rgb8(60, 80),
                embedded: vec![EmbeddedImage {
                    id: 2,
                    image: DynamicImage::new_rgb8(130, 140),
                }],
            }])
        }
    }

    #[test]
    fn writes_all_artifacts_for_a_case() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CaseLayout::new(dir.path().join("pdfs"), dir.path().join("output"));
        let config = ExtractConfig::default();

        let out = extract_case(&OnePage, &layout, CaseId(4), &config).unwrap();

        assert_eq!(out.pages, 1);
        assert!(layout.page_image(CaseId(4), 1).is_file());
        assert!(layout.embedded_image(CaseId(4), 1, 2, "png").is_file());
        let history = fs::read_to_string(layout.history_file(CaseId(4))).unwrap();
        assert_eq!(history, "History of fever.\nFigure 1 Chest film\n\n");
        let legends = fs::read_to_string(layout.legends_file(CaseId(4))).unwrap();
        assert_eq!(legends, "Figure 1 Chest film (Page 1)\n");
    }

    #[test]
    fn page_render_is_a_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CaseLayout::new(dir.path(), dir.path());
        extract_case(&OnePage, &layout, CaseId(1), &ExtractConfig::default()).unwrap();

        let img = image::open(layout.page_image(CaseId(1), 1)).unwrap();
        assert_eq!((img.width(), img.height()), (60, 80));
        let fmt = image::ImageFormat::from_path(layout.page_image(CaseId(1), 1)).unwrap();
        assert_eq!(fmt, ImageFormat::Jpeg);
    }
}
