//! PDF rasterisation: render selected pages to `DynamicImage` via pdfium.
//!
//! pdfium keeps thread-local state and blocks for the whole render, so all
//! calls go through `tokio::task::spawn_blocking` and a fresh binding is
//! made per call.
//!
//! The requested DPI sets the scale (`dpi / 72` pixels per PDF point);
//! `max_rendered_pixels` then caps the longest edge so an oversized page
//! cannot allocate an unbounded bitmap.

use crate::config::{validate_dpi, ConversionConfig};
use crate::error::OcrError;
use crate::pipeline::input::validate_pdf_path;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One rasterised page.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page_num: u32,
    /// Requested resolution. The pixel cap may shrink very large pages
    /// below it.
    pub dpi: u32,
    pub image: DynamicImage,
}

impl PageImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Rendering parameters, split from [`ConversionConfig`] so a request can
/// override the DPI without rebuilding the whole configuration.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub password: Option<String>,
    pub pdfium_lib_path: Option<PathBuf>,
}

impl RenderSettings {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            pdfium_lib_path: config.pdfium_lib_path.clone(),
        }
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }
}

/// Bind pdfium: an explicit library path first, then a library next to the
/// working directory, then the system search path.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, OcrError> {
    let bindings = match lib_path {
        Some(p) => Pdfium::bind_to_library(p),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| OcrError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Number of pages in `pdf_path`.
///
/// Reads only the cross-reference data through pdfium. When pdfium cannot
/// be bound the whole document is parsed with lopdf instead, which costs
/// time proportional to file size; a warning says so.
pub async fn page_count(pdf_path: &Path, settings: &RenderSettings) -> Result<usize, OcrError> {
    validate_pdf_path(pdf_path)?;

    let path = pdf_path.to_path_buf();
    let settings = settings.clone();
    tokio::task::spawn_blocking(move || page_count_blocking(&path, &settings))
        .await
        .map_err(|e| OcrError::Internal(format!("Page-count task panicked: {}", e)))?
}

fn page_count_blocking(pdf_path: &Path, settings: &RenderSettings) -> Result<usize, OcrError> {
    match bind_pdfium(settings.pdfium_lib_path.as_deref()) {
        Ok(pdfium) => {
            let document = pdfium
                .load_pdf_from_file(pdf_path, settings.password.as_deref())
                .map_err(|e| map_load_error(pdf_path, settings.password.is_some(), e))?;
            Ok(document.pages().len() as usize)
        }
        Err(e) => {
            warn!(
                "pdfium unavailable ({}); counting pages of '{}' with a full lopdf parse, this is slow for large files",
                e,
                pdf_path.display()
            );
            page_count_full_parse(pdf_path)
        }
    }
}

/// Slow path: decode the whole object graph and count the page tree leaves.
pub fn page_count_full_parse(pdf_path: &Path) -> Result<usize, OcrError> {
    let doc = lopdf::Document::load(pdf_path).map_err(|e| OcrError::CorruptPdf {
        path: pdf_path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(doc.get_pages().len())
}

/// Render the contiguous span `first..=last` (1-based, inclusive).
///
/// `None` bounds default to the first and last page. `last` beyond the end
/// of the document is clamped; a span that selects no page is an error.
pub async fn rasterize(
    pdf_path: &Path,
    settings: &RenderSettings,
    first_page: Option<u32>,
    last_page: Option<u32>,
) -> Result<Vec<PageImage>, OcrError> {
    validate_dpi(settings.dpi)?;
    validate_pdf_path(pdf_path)?;

    let path = pdf_path.to_path_buf();
    let settings = settings.clone();
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium(settings.pdfium_lib_path.as_deref())?;
        let document = pdfium
            .load_pdf_from_file(&path, settings.password.as_deref())
            .map_err(|e| map_load_error(&path, settings.password.is_some(), e))?;

        let total = document.pages().len() as u32;
        let first = first_page.unwrap_or(1).max(1);
        let last = last_page.unwrap_or(total).min(total);
        if total == 0 || first > last {
            return Err(OcrError::NoPagesInRange {
                first,
                last: last_page.unwrap_or(total),
                total,
            });
        }

        let pages: Vec<u32> = (first..=last).collect();
        render_document_pages(&document, &pages, &settings)
    })
    .await
    .map_err(|e| OcrError::Internal(format!("Render task panicked: {}", e)))?
}

/// Render exactly the listed pages (1-based), in the order given.
///
/// Pages past the end of the document are skipped with a warning; if none
/// remain the call fails.
pub async fn rasterize_pages(
    pdf_path: &Path,
    settings: &RenderSettings,
    pages: &[u32],
) -> Result<Vec<PageImage>, OcrError> {
    validate_dpi(settings.dpi)?;
    validate_pdf_path(pdf_path)?;

    let path = pdf_path.to_path_buf();
    let settings = settings.clone();
    let pages = pages.to_vec();
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium(settings.pdfium_lib_path.as_deref())?;
        let document = pdfium
            .load_pdf_from_file(&path, settings.password.as_deref())
            .map_err(|e| map_load_error(&path, settings.password.is_some(), e))?;

        let total = document.pages().len() as u32;
        let in_range: Vec<u32> = pages
            .iter()
            .copied()
            .filter(|&p| {
                let ok = (1..=total).contains(&p);
                if !ok {
                    warn!("Skipping page {} (out of range, total={})", p, total);
                }
                ok
            })
            .collect();

        if in_range.is_empty() {
            return Err(OcrError::NoPagesInRange {
                first: pages.iter().copied().min().unwrap_or(0),
                last: pages.iter().copied().max().unwrap_or(0),
                total,
            });
        }

        render_document_pages(&document, &in_range, &settings)
    })
    .await
    .map_err(|e| OcrError::Internal(format!("Render task panicked: {}", e)))?
}

fn render_document_pages(
    document: &PdfDocument<'_>,
    pages: &[u32],
    settings: &RenderSettings,
) -> Result<Vec<PageImage>, OcrError> {
    info!(
        "Rendering {} page(s) at {} DPI",
        pages.len(),
        settings.dpi
    );

    let doc_pages = document.pages();
    let scale = settings.dpi as f32 / 72.0;
    let cap = settings.max_rendered_pixels.max(1) as f32;
    let mut out = Vec::with_capacity(pages.len());

    for &page_num in pages {
        let failed = |detail: String| OcrError::RasterisationFailed {
            page: page_num,
            detail,
        };

        let index = PdfPageIndex::try_from(page_num - 1)
            .map_err(|_| failed("page index exceeds pdfium range".into()))?;
        let page = doc_pages
            .get(index)
            .map_err(|e| failed(format!("{:?}", e)))?;

        let (width, height) = target_size(page.width().value, page.height().value, scale, cap);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width)
            .set_target_height(height)
            .render_form_data(true)
            .render_annotations(true);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{:?}", e)))?;

        let image = DynamicImage::ImageRgb8(bitmap.as_image().into_rgb8());
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );

        out.push(PageImage {
            page_num,
            dpi: settings.dpi,
            image,
        });
    }

    Ok(out)
}

/// Pixel size for a page of `w × h` points at `scale`, longest edge ≤ `cap`.
fn target_size(w_pt: f32, h_pt: f32, scale: f32, cap: f32) -> (i32, i32) {
    let (mut w, mut h) = (w_pt * scale, h_pt * scale);
    let longest = w.max(h);
    if longest > cap {
        let shrink = cap / longest;
        w *= shrink;
        h *= shrink;
    }
    (w.round().max(1.0) as i32, h.round().max(1.0) as i32)
}

fn map_load_error(path: &Path, had_password: bool, e: PdfiumError) -> OcrError {
    let detail = format!("{:?}", e);
    if detail.contains("Password") || detail.contains("password") {
        if had_password {
            OcrError::CorruptPdf {
                path: path.to_path_buf(),
                detail: "the supplied password was rejected".into(),
            }
        } else {
            OcrError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        OcrError::CorruptPdf {
            path: path.to_path_buf(),
            detail,
        }
    }
}
