//! # pdf-ocr-md
//!
//! Convert PDF documents to Markdown by OCR-ing each page with a vision
//! language model.
//!
//! Text extraction tools read the PDF content stream and lose reading order,
//! formulae and table structure on anything but simple layouts. This crate
//! renders every page to an image instead and asks a vision model
//! (Qwen-VL through an OpenAI-compatible endpoint by default) to transcribe
//! it, then stitches the pages into one Markdown file with the document's
//! images saved next to it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     check path, extension and %PDF signature
//!  ├─ 2. Embedded  copy image XObjects out of the PDF (lopdf)
//!  ├─ 3. Render    rasterise selected pages via pdfium (spawn_blocking)
//!  ├─ 4. Enhance   contrast / sharpness / brightness / median denoise
//!  ├─ 5. OCR       one request per page, sequential, retry with backoff
//!  ├─ 6. Inline    save data-URL images the model emitted
//!  └─ 7. Assemble  headings, metadata, atomic write
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_ocr_md::{convert, ConversionConfig, ConvertRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads PDFOCR_API_KEY (or DASHSCOPE_API_KEY) and friends.
//!     let config = ConversionConfig::from_env()?;
//!
//!     let mut request = ConvertRequest::new("paper.pdf");
//!     request.page_range = Some("1-3".into());
//!     request.mode = "formula".into();
//!
//!     let report = convert(request, &config).await;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfocr` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//! | `mcp`   | on      | Enables the [`mcp`] module and the `pdfocr-mcp` stdio server |
//!
//! Disable both when using only the library:
//! ```toml
//! pdf-ocr-md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{parse_page_range, ConversionConfig, ConversionConfigBuilder};
pub use convert::{
    convert, convert_pdf, convert_sync, convert_with_client, page_count, ConversionOutcome,
};
pub use error::{ErrorKind, OcrError};
pub use output::{
    ConversionReport, ConvertRequest, DocumentMetadata, ExtractedImage, ImageSource,
    OcrPageResult,
};
pub use pipeline::enhance::EnhancementProfile;
pub use pipeline::ocr::{HttpTransport, VisionClient, VisionTransport};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::{build_prompt, OcrMode};
pub use retry::{retry, RetryPolicy, Retryable};
