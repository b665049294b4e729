//! Values that flow out of the pipeline: per-page OCR results, saved images,
//! document metadata, and the request/report pair of the programmatic entry
//! point.

use crate::error::{ErrorKind, OcrError};
use crate::pipeline::enhance::EnhancementProfile;
use crate::prompts::OcrMode;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Tool name written into the document header.
pub const GENERATOR: &str = "pdf-ocr-md";

/// Result of OCR-ing one page.
///
/// A failed page still yields a value: [`Self::markdown`] then holds an
/// HTML-comment marker so the document assembles with the gap visible.
#[derive(Debug, Clone, Serialize)]
pub struct OcrPageResult {
    /// 1-indexed page number.
    pub page_num: u32,

    /// Markdown returned by the model, or the error marker.
    pub markdown: String,

    /// Attempts spent, including the successful one.
    pub attempts: u32,

    /// Wall-clock time including retries.
    pub duration_ms: u64,

    /// Final error after retries, if the page failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OcrPageResult {
    pub fn success(page_num: u32, markdown: String, attempts: u32, duration_ms: u64) -> Self {
        Self {
            page_num,
            markdown,
            attempts,
            duration_ms,
            error: None,
        }
    }

    /// A failed page, carrying [`failure_marker`] as its text.
    pub fn failure(page_num: u32, error: &OcrError, attempts: u32, duration_ms: u64) -> Self {
        Self {
            page_num,
            markdown: failure_marker(error),
            attempts,
            duration_ms,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// HTML comment inserted in place of a page whose OCR failed.
pub fn failure_marker(error: &dyn std::fmt::Display) -> String {
    let mut msg = error.to_string().replace(['\r', '\n'], " ");
    // Split every dash run; one pass leaves "--" behind in runs of three.
    while msg.contains("--") {
        msg = msg.replace("--", "- -");
    }
    format!("<!-- OCR 失败: {} -->", msg)
}

/// Where an extracted image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    /// An image XObject inside the PDF.
    Embedded,
    /// A base64 data URL emitted by the model.
    Inline,
}

/// An image written under the images directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedImage {
    /// Absolute (or caller-relative) location on disk.
    pub path: PathBuf,
    /// Path relative to the Markdown file, e.g. `images/page_2_img_1.png`.
    pub relative_path: String,
    pub page_number: u32,
    /// 1-based sequence number within the page.
    pub index: u32,
    pub source: ImageSource,
}

/// Header information for the assembled document.
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    /// Tool name shown in the attribution line.
    pub generator: String,
    /// The source PDF; only its file name is printed.
    pub source: Option<PathBuf>,
    /// Pages processed.
    pub page_count: Option<usize>,
    /// Embedded images saved from the PDF.
    pub embedded_images: usize,
    pub generated_at: DateTime<Local>,
}

impl DocumentMetadata {
    pub fn new(source: impl Into<PathBuf>, page_count: usize) -> Self {
        Self {
            generator: GENERATOR.to_string(),
            source: Some(source.into()),
            page_count: Some(page_count),
            embedded_images: 0,
            generated_at: Local::now(),
        }
    }

    pub fn source_name(&self) -> Option<String> {
        self.source
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    }
}

/// Input of [`crate::convert::convert`].
///
/// Fields left as `None` fall back to the [`crate::ConversionConfig`] value.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub pdf_path: PathBuf,
    /// Markdown destination. Default: `<output_dir>/<stem>.md`.
    pub output_path: Option<PathBuf>,
    /// Page-range expression such as `"1-5"` or `"1,3,5-7"`.
    pub page_range: Option<String>,
    pub dpi: Option<u32>,
    pub extract_images: Option<bool>,
    pub timeout_secs: Option<u64>,
    /// Mode tag; unknown tags become free-form instructions.
    pub mode: String,
    pub custom_instruction: Option<String>,
    pub enhancement: EnhancementProfile,
}

impl ConvertRequest {
    pub fn new(pdf_path: impl Into<PathBuf>) -> Self {
        Self {
            pdf_path: pdf_path.into(),
            output_path: None,
            page_range: None,
            dpi: None,
            extract_images: None,
            timeout_secs: None,
            mode: OcrMode::default().to_string(),
            custom_instruction: None,
            enhancement: EnhancementProfile::default(),
        }
    }
}

/// Structured outcome of [`crate::convert::convert`].
///
/// The shape stays the same whichever front end drives the conversion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_extracted: Option<usize>,
    /// Pages whose OCR failed and were replaced by a marker.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_pages: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub processing_time_ms: u64,
}

impl ConversionReport {
    pub fn failed(error: &OcrError, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            processing_time_ms,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_marker_is_a_single_comment() {
        let err = OcrError::Api {
            status: Some(500),
            message: "upstream --> broken\nretry later".into(),
        };
        let marker = failure_marker(&err);
        assert!(marker.starts_with("<!-- OCR 失败: "));
        assert!(marker.ends_with(" -->"));
        assert_eq!(marker.matches("-->").count(), 1);
        assert!(!marker.contains('\n'));

        for message in ["<!-- upstream ---> bad gateway", "a ----> b", "x --!> y <!--", "trailing -"] {
            let marker = failure_marker(&OcrError::Api {
                status: Some(502),
                message: message.into(),
            });
            let body = &marker["<!--".len()..marker.len() - "-->".len()];
            assert!(!body.contains("--"), "{marker}");
            assert_eq!(marker.matches("-->").count(), 1, "{marker}");
            assert_eq!(marker.matches("<!--").count(), 1, "{marker}");
        }
    }

    #[test]
    fn failed_page_keeps_marker_and_error() {
        let r = OcrPageResult::failure(4, &OcrError::EmptyResponse, 3, 1200);
        assert!(!r.is_ok());
        assert_eq!(r.page_num, 4);
        assert!(r.markdown.contains("empty response"));
        assert_eq!(r.error.as_deref(), Some("API returned an empty response"));
    }

    #[test]
    fn report_serialises_without_empty_fields() {
        let report = ConversionReport {
            success: true,
            output_path: Some("out/doc.md".into()),
            page_count: Some(3),
            images_extracted: Some(0),
            processing_time_ms: 10,
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["page_count"], 3);
        assert!(json.get("error").is_none());
        assert!(json.get("failed_pages").is_none());
    }

    #[test]
    fn failed_report_carries_kind() {
        let report = ConversionReport::failed(&OcrError::InvalidConfig("dpi".into()), 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "configuration");
    }

    #[test]
    fn metadata_prints_file_name_only() {
        let m = DocumentMetadata::new("/data/in/report.pdf", 2);
        assert_eq!(m.source_name().as_deref(), Some("report.pdf"));
    }
}
