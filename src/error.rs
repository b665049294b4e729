//! Error types for the pdf-ocr-md library.
//!
//! A single [`OcrError`] enum covers every failure, grouped into the five
//! kinds reported by [`OcrError::kind`]:
//!
//! * **Configuration**: a setting is missing or out of bounds. Always fatal,
//!   never retried.
//! * **Processing**: the PDF could not be opened, counted, rendered or
//!   scanned for images. Fatal to the run, except inside per-item loops
//!   (one embedded image object, one inline data URL) where the item is
//!   logged and skipped.
//! * **Api**: the vision endpoint failed. Retried under the
//!   [`crate::retry::RetryPolicy`]; after exhaustion a batch run turns it
//!   into an inline error marker for that page, a single call propagates it.
//! * **Generation**: the final Markdown (or an image file) could not be
//!   written. Fatal, and always names the path that was attempted.
//! * **Internal** / **Cancelled**: task panics and user interrupts.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of an [`OcrError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Processing,
    Api,
    Generation,
    Internal,
    Cancelled,
}

/// All errors returned by the pdf-ocr-md library.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// The API credential is absent or still the placeholder value.
    #[error("API key is not set.\nSet {var} in the environment or in a .env file.")]
    MissingCredential { var: String },

    /// A setting is outside its allowed bounds.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The page-range expression could not be parsed.
    #[error("Invalid page range '{expr}': {reason}")]
    InvalidPageRange { expr: String, reason: String },

    // ── Processing errors ─────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The path exists but is a directory or other non-regular file.
    #[error("Not a regular file: '{path}'")]
    NotAFile { path: PathBuf },

    /// The file is missing the `.pdf` extension or the `%PDF` signature.
    #[error("File is not a PDF: '{path}' ({detail})")]
    NotAPdf { path: PathBuf, detail: String },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none (or the wrong one) was provided.
    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    /// The requested span selects no page of the document.
    #[error("No pages selected: requested {first}-{last}, document has {total} pages")]
    NoPagesInRange { first: u32, last: u32, total: u32 },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: u32, detail: String },

    /// Could not read or decode a staged image file.
    #[error("Failed to process image '{path}': {detail}")]
    ImageFile { path: PathBuf, detail: String },

    /// One embedded image object could not be extracted.
    #[error("Embedded image {index} on page {page} could not be extracted: {detail}")]
    EmbeddedImage { page: u32, index: u32, detail: String },

    /// One inline data-URL image could not be decoded.
    #[error("Inline image on page {page} could not be decoded: {detail}")]
    InlineImage { page: u32, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Place libpdfium next to the executable, install it system-wide,\n\
or set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    // ── API errors ────────────────────────────────────────────────────────
    /// The vision endpoint returned an error or could not be reached.
    #[error("API call failed: {message}")]
    Api {
        status: Option<u16>,
        message: String,
    },

    /// HTTP 429 or a rate-limit message; wait `retry_after` before retrying.
    #[error("API rate limit hit (retry in {}s): {message}", retry_after.as_secs_f32())]
    RateLimited {
        retry_after: Duration,
        message: String,
    },

    /// HTTP 401 or an authentication message.
    #[error("API authentication failed, check the API key: {message}")]
    AuthFailed { message: String },

    /// The endpoint answered but the completion had no content.
    #[error("API returned an empty response")]
    EmptyResponse,

    // ── Generation errors ─────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create the images directory or write an image into it.
    #[error("Failed to write image '{path}': {source}")]
    ImageWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// The run was interrupted by the user.
    #[error("Conversion cancelled")]
    Cancelled,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcrError::MissingCredential { .. }
            | OcrError::InvalidConfig(_)
            | OcrError::InvalidPageRange { .. } => ErrorKind::Configuration,

            OcrError::FileNotFound { .. }
            | OcrError::NotAFile { .. }
            | OcrError::NotAPdf { .. }
            | OcrError::CorruptPdf { .. }
            | OcrError::PasswordRequired { .. }
            | OcrError::NoPagesInRange { .. }
            | OcrError::RasterisationFailed { .. }
            | OcrError::ImageFile { .. }
            | OcrError::EmbeddedImage { .. }
            | OcrError::InlineImage { .. }
            | OcrError::PdfiumBindingFailed(_) => ErrorKind::Processing,

            OcrError::Api { .. }
            | OcrError::RateLimited { .. }
            | OcrError::AuthFailed { .. }
            | OcrError::EmptyResponse => ErrorKind::Api,

            OcrError::OutputWriteFailed { .. } | OcrError::ImageWriteFailed { .. } => {
                ErrorKind::Generation
            }

            OcrError::Cancelled => ErrorKind::Cancelled,
            OcrError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-style status associated with an API error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            OcrError::Api { status, .. } => *status,
            OcrError::RateLimited { .. } => Some(429),
            OcrError::AuthFailed { .. } => Some(401),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_sections() {
        assert_eq!(
            OcrError::InvalidConfig("dpi".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            OcrError::FileNotFound {
                path: "x.pdf".into()
            }
            .kind(),
            ErrorKind::Processing
        );
        assert_eq!(OcrError::EmptyResponse.kind(), ErrorKind::Api);
        assert_eq!(
            OcrError::OutputWriteFailed {
                path: "out.md".into(),
                source: std::io::Error::other("disk full"),
            }
            .kind(),
            ErrorKind::Generation
        );
    }

    #[test]
    fn status_codes() {
        let rl = OcrError::RateLimited {
            retry_after: Duration::from_secs(5),
            message: "slow down".into(),
        };
        assert_eq!(rl.status_code(), Some(429));
        assert!(rl.to_string().contains("5s"), "got: {rl}");

        let auth = OcrError::AuthFailed {
            message: "bad key".into(),
        };
        assert_eq!(auth.status_code(), Some(401));
        assert!(auth.to_string().contains("bad key"));

        assert_eq!(OcrError::EmptyResponse.status_code(), None);
    }

    #[test]
    fn output_write_failed_names_path() {
        let e = OcrError::OutputWriteFailed {
            path: "/tmp/report.md".into(),
            source: std::io::Error::other("read-only"),
        };
        assert!(e.to_string().contains("/tmp/report.md"));
    }
}
