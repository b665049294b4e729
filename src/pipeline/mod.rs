//! Pipeline stages for PDF-to-Markdown OCR.
//!
//! Each submodule implements one step and can be tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌──▶ embedded ─────────────────────────────────┐
//! input ─────┤                                               ▼
//!            └──▶ render ──▶ enhance ──▶ encode ──▶ ocr ──▶ inline ──▶ assemble
//!                (pdfium)   (imageproc)  (base64)   (HTTP)  (data URLs)  (Markdown)
//! ```
//!
//! 1. [`input`]    check the path names a real PDF
//! 2. [`render`]   rasterise the selected pages in `spawn_blocking`
//! 3. [`enhance`]  contrast, sharpness, brightness, median denoise
//! 4. [`embedded`] copy image XObjects out of the PDF (lopdf)
//! 5. [`encode`]   staged image file → base64 data URL
//! 6. [`ocr`]      vision endpoint call with retry; the only network stage
//! 7. [`inline`]   save data-URL images the model emitted, rewrite links
//! 8. [`assemble`] headings, metadata, atomic write
//!
//! [`images`] hands out collision-free file names shared by stages 4 and 7.

pub mod assemble;
pub mod embedded;
pub mod encode;
pub mod enhance;
pub mod images;
pub mod inline;
pub mod input;
pub mod ocr;
pub mod render;

#[cfg(test)]
pub(crate) mod fixtures;
