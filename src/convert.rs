//! Programmatic entry points.
//!
//! [`convert`] takes a [`ConvertRequest`] and always returns a
//! [`ConversionReport`], whatever went wrong; front ends (the `pdfocr`
//! binary, a service handler, an embedding application) only ever see that
//! one shape. [`convert_pdf`] is the same run returning `Result`, for Rust
//! callers that want to match on [`OcrError`].
//!
//! One run, in order:
//!
//! 1. validate the path and count pages
//! 2. expand the page range against the real page count
//! 3. copy embedded images out of the selected pages
//! 4. rasterise and enhance the selected pages, stage them as PNG
//! 5. OCR the staged pages one after another
//! 6. close the client, assemble and write the Markdown
//!
//! A failed page becomes a marker and the run continues; every other error
//! ends the run before the Markdown file is touched.

use crate::config::{
    parse_page_range, validate_dpi, ConversionConfig, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS,
};
use crate::error::{ErrorKind, OcrError};
use crate::output::{ConversionReport, ConvertRequest, DocumentMetadata, OcrPageResult};
use crate::pipeline::assemble::DocumentAssembler;
use crate::pipeline::embedded::{self, EmbeddedImages};
use crate::pipeline::encode::png_bytes;
use crate::pipeline::enhance::{enhance, EnhancementProfile};
use crate::pipeline::images::ImageStore;
use crate::pipeline::ocr::{VisionClient, VisionTransport};
use crate::pipeline::render::{self, PageImage, RenderSettings};
use crate::pipeline::input;
use crate::prompts::build_prompt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub output_path: PathBuf,
    /// Pages in the source document.
    pub total_pages: usize,
    /// Per-page results, in ascending page order.
    pub pages: Vec<OcrPageResult>,
    pub embedded_images: usize,
    pub inline_images: usize,
}

impl ConversionOutcome {
    pub fn failed_pages(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|p| !p.is_ok())
            .map(|p| p.page_num)
            .collect()
    }

    pub fn images_extracted(&self) -> usize {
        self.embedded_images + self.inline_images
    }

    pub fn into_report(self, processing_time_ms: u64) -> ConversionReport {
        ConversionReport {
            success: true,
            failed_pages: self.failed_pages(),
            images_extracted: Some(self.images_extracted()),
            page_count: Some(self.pages.len()),
            output_path: Some(self.output_path),
            processing_time_ms,
            ..Default::default()
        }
    }
}

/// Convert one PDF and report the outcome. Never panics on bad input.
pub async fn convert(request: ConvertRequest, config: &ConversionConfig) -> ConversionReport {
    let start = Instant::now();
    match convert_pdf(&request, config).await {
        Ok(outcome) => outcome.into_report(start.elapsed().as_millis() as u64),
        Err(e) => {
            warn!("Conversion of '{}' failed: {}", request.pdf_path.display(), e);
            ConversionReport::failed(&e, start.elapsed().as_millis() as u64)
        }
    }
}

/// Convert one PDF over HTTP.
pub async fn convert_pdf(
    request: &ConvertRequest,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, OcrError> {
    let client = VisionClient::from_config(&effective_config(request, config)?)?;
    convert_with_client(request, config, client).await
}

/// Convert one PDF with a caller-supplied client (custom transport).
///
/// The client is closed before the Markdown is written, on success and on
/// failure alike.
pub async fn convert_with_client<T: VisionTransport>(
    request: &ConvertRequest,
    config: &ConversionConfig,
    mut client: VisionClient<T>,
) -> Result<ConversionOutcome, OcrError> {
    let config = effective_config(request, config)?;
    client = client.with_timeout(config.timeout());
    let result = run(request, &config, &client).await;
    client.close();
    let (pages, ctx) = result?;
    finish(request, pages, ctx)
}

/// Blocking wrapper around [`convert`] for non-async callers.
pub fn convert_sync(request: ConvertRequest, config: &ConversionConfig) -> ConversionReport {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(convert(request, config)),
        Err(e) => ConversionReport::failed(
            &OcrError::Internal(format!("Failed to create tokio runtime: {}", e)),
            0,
        ),
    }
}

/// Page count of a PDF without converting it. Needs no API credential.
pub async fn page_count(
    pdf_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<usize, OcrError> {
    render::page_count(pdf_path.as_ref(), &RenderSettings::from_config(config)).await
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// State carried from the OCR loop to assembly.
struct RunContext {
    total_pages: usize,
    output_dir: PathBuf,
    store: Option<Arc<ImageStore>>,
    embedded: EmbeddedImages,
}

/// Apply the per-request overrides and re-check their bounds.
fn effective_config(
    request: &ConvertRequest,
    config: &ConversionConfig,
) -> Result<ConversionConfig, OcrError> {
    let mut cfg = config.clone();
    if let Some(dpi) = request.dpi {
        cfg.dpi = dpi;
    }
    if let Some(extract) = request.extract_images {
        cfg.extract_images = extract;
    }
    if let Some(secs) = request.timeout_secs {
        cfg.timeout_secs = secs;
    }

    validate_dpi(cfg.dpi)?;
    if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&cfg.timeout_secs) {
        return Err(OcrError::InvalidConfig(format!(
            "timeout must be {MIN_TIMEOUT_SECS}–{MAX_TIMEOUT_SECS}s, got {}",
            cfg.timeout_secs
        )));
    }
    Ok(cfg)
}

/// Directory that receives the Markdown file and `images/`.
fn output_dir_for(request: &ConvertRequest, config: &ConversionConfig) -> PathBuf {
    let parent_of = |p: &Path| {
        p.parent()
            .filter(|d| !d.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    };
    match (&request.output_path, &config.output_dir) {
        (Some(out), _) => parent_of(out),
        (None, Some(dir)) => dir.clone(),
        (None, None) => parent_of(&request.pdf_path),
    }
}

async fn run<T: VisionTransport>(
    request: &ConvertRequest,
    config: &ConversionConfig,
    client: &VisionClient<T>,
) -> Result<(Vec<OcrPageResult>, RunContext), OcrError> {
    let pdf_path = request.pdf_path.as_path();
    info!("Starting conversion: {}", pdf_path.display());

    // ── Step 1: Validate and count ───────────────────────────────────────
    input::validate_pdf_path(pdf_path)?;
    let settings = RenderSettings::from_config(config);
    let total_pages = render::page_count(pdf_path, &settings).await?;
    info!("PDF has {} pages", total_pages);

    // ── Step 2: Page selection ───────────────────────────────────────────
    let selected = parse_page_range(request.page_range.as_deref(), total_pages as u32)?;
    if selected.is_empty() {
        return Err(OcrError::InvalidPageRange {
            expr: request.page_range.clone().unwrap_or_default(),
            reason: format!("selects no page of a {}-page document", total_pages),
        });
    }
    debug!("Selected pages: {:?}", selected);

    // ── Step 3: Embedded images ──────────────────────────────────────────
    let output_dir = output_dir_for(request, config);
    let store = config
        .extract_images
        .then(|| Arc::new(ImageStore::new(&output_dir, &config.image_subdir)));
    let embedded = match &store {
        Some(store) => extract_embedded(pdf_path, Arc::clone(store), &selected).await?,
        None => EmbeddedImages::new(),
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(selected.len());
    }

    // ── Step 4: Render, enhance, stage ───────────────────────────────────
    let render_start = Instant::now();
    let rendered = render::rasterize_pages(pdf_path, &settings, &selected).await?;
    info!(
        "Rendered {} pages in {}ms",
        rendered.len(),
        render_start.elapsed().as_millis()
    );

    let staging = TempDir::new().map_err(|e| OcrError::Internal(format!("tempdir: {}", e)))?;
    let staged = stage_pages(rendered, request.enhancement, staging.path().to_path_buf()).await?;

    // ── Step 5: OCR, one page at a time ──────────────────────────────────
    let prompt = build_prompt(&request.mode, request.custom_instruction.as_deref());
    let total = staged.len();
    let mut pages = Vec::with_capacity(total);
    for (page_num, path) in &staged {
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(*page_num, total);
        }
        let result = client.ocr_page(*page_num, path, &prompt).await;
        if let Some(ref cb) = config.progress_callback {
            match &result.error {
                None => cb.on_page_complete(*page_num, total, result.markdown.len()),
                Some(e) => cb.on_page_error(*page_num, total, e),
            }
        }
        pages.push(result);
    }

    let succeeded = pages.iter().filter(|p| p.is_ok()).count();
    info!("OCR finished: {}/{} pages succeeded", succeeded, total);
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(total, succeeded);
    }

    Ok((
        pages,
        RunContext {
            total_pages,
            output_dir,
            store,
            embedded,
        },
    ))
}

/// Embedded extraction must not stop OCR: a document lopdf cannot parse is
/// still rendered by pdfium. Write failures remain fatal.
async fn extract_embedded(
    pdf_path: &Path,
    store: Arc<ImageStore>,
    pages: &[u32],
) -> Result<EmbeddedImages, OcrError> {
    match embedded::extract_all(pdf_path, store, Some(pages)).await {
        Ok(map) => Ok(map),
        Err(e) if e.kind() == ErrorKind::Generation => Err(e),
        Err(e) => {
            warn!("Embedded image extraction skipped: {}", e);
            Ok(EmbeddedImages::new())
        }
    }
}

/// Enhance each page and write it as `page_<n>.png` under `dir`.
async fn stage_pages(
    rendered: Vec<PageImage>,
    profile: EnhancementProfile,
    dir: PathBuf,
) -> Result<Vec<(u32, PathBuf)>, OcrError> {
    tokio::task::spawn_blocking(move || {
        rendered
            .into_iter()
            .map(|page| {
                let enhanced = enhance(&page.image, &profile);
                let path = dir.join(format!("page_{}.png", page.page_num));
                let write_err = |detail: String| OcrError::ImageFile {
                    path: path.clone(),
                    detail,
                };
                let bytes = png_bytes(&enhanced).map_err(|e| write_err(e.to_string()))?;
                std::fs::write(&path, bytes).map_err(|e| write_err(e.to_string()))?;
                debug!(
                    "Staged page {} ({}x{} @ {} DPI) → {}",
                    page.page_num,
                    page.width(),
                    page.height(),
                    page.dpi,
                    path.display()
                );
                Ok((page.page_num, path))
            })
            .collect()
    })
    .await
    .map_err(|e| OcrError::Internal(format!("Enhancement task panicked: {}", e)))?
}

fn finish(
    request: &ConvertRequest,
    pages: Vec<OcrPageResult>,
    ctx: RunContext,
) -> Result<ConversionOutcome, OcrError> {
    let embedded_images: usize = ctx.embedded.values().map(Vec::len).sum();

    let mut metadata = DocumentMetadata::new(&request.pdf_path, pages.len());
    metadata.embedded_images = embedded_images;

    let assembler = DocumentAssembler::with_store(&ctx.output_dir, ctx.store);
    let default_path = assembler.default_output_path(Some(&metadata));
    let output_path = request.output_path.as_deref().unwrap_or(&default_path);
    let doc = assembler.assemble(&pages, Some(&metadata), &ctx.embedded, Some(output_path))?;

    info!(
        "Conversion complete: {} pages, {} image(s) → {}",
        pages.len(),
        embedded_images + doc.inline_images.len(),
        doc.path.display()
    );

    Ok(ConversionOutcome {
        output_path: doc.path,
        total_pages: ctx.total_pages,
        pages,
        embedded_images,
        inline_images: doc.inline_images.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fixtures::write_blank_pdf;

    fn config() -> ConversionConfig {
        ConversionConfig::builder().api_key("sk-test").build().unwrap()
    }

    #[test]
    fn request_overrides_are_validated() {
        let mut req = ConvertRequest::new("a.pdf");
        req.dpi = Some(50);
        assert_eq!(
            effective_config(&req, &config()).unwrap_err().kind(),
            ErrorKind::Configuration
        );

        let mut req = ConvertRequest::new("a.pdf");
        req.timeout_secs = Some(0);
        assert!(effective_config(&req, &config()).is_err());

        let mut req = ConvertRequest::new("a.pdf");
        req.dpi = Some(300);
        req.extract_images = Some(false);
        let cfg = effective_config(&req, &config()).unwrap();
        assert_eq!(cfg.dpi, 300);
        assert!(!cfg.extract_images);
    }

    #[test]
    fn output_dir_resolution() {
        let cfg = config();
        let mut req = ConvertRequest::new("/data/in/doc.pdf");
        assert_eq!(output_dir_for(&req, &cfg), PathBuf::from("/data/in"));

        req.output_path = Some("/out/x/doc.md".into());
        assert_eq!(output_dir_for(&req, &cfg), PathBuf::from("/out/x"));

        let cfg = ConversionConfig::builder()
            .api_key("sk-test")
            .output_dir("/results")
            .build()
            .unwrap();
        let req = ConvertRequest::new("doc.pdf");
        assert_eq!(output_dir_for(&req, &cfg), PathBuf::from("/results"));
    }

    #[tokio::test]
    async fn missing_file_reports_processing_error() {
        let report = convert(ConvertRequest::new("/no/such/file.pdf"), &config()).await;
        assert!(!report.success);
        assert_eq!(report.error_kind, Some(ErrorKind::Processing));
        assert!(report.output_path.is_none());
    }

    #[tokio::test]
    async fn empty_page_selection_is_rejected_before_ocr() {
        let dir = tempfile::TempDir::new().unwrap();
        let pdf = dir.path().join("two.pdf");
        write_blank_pdf(&pdf, 2);

        let mut req = ConvertRequest::new(&pdf);
        req.page_range = Some("11-15".into());
        let report = convert(req, &config()).await;

        assert!(!report.success);
        assert_eq!(report.error_kind, Some(ErrorKind::Configuration));
        assert!(!dir.path().join("two.md").exists());
    }
}
