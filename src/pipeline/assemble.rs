//! Document assembly: per-page Markdown → one `.md` file.
//!
//! ```text
//! # 文档
//!
//! > 由 pdf-ocr-md 生成
//! > 来源: report.pdf
//! > 页数: 3
//! > 生成时间: 2025-01-31 12:00:00
//!
//! ---
//!
//! ## 第 1 页
//!
//! ---
//!
//! <page body>
//!
//! ---
//!
//! <!-- 文档结束 -->
//! ```
//!
//! The file is written to a temporary sibling and renamed into place, so a
//! reader never sees a half-written document.

use crate::error::OcrError;
use crate::output::{DocumentMetadata, ExtractedImage, OcrPageResult};
use crate::pipeline::embedded::EmbeddedImages;
use crate::pipeline::images::ImageStore;
use crate::pipeline::inline;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DOCUMENT_TITLE: &str = "# 文档";
const END_MARKER: &str = "<!-- 文档结束 -->";
const SIMPLE_SEPARATOR: &str = "\n\n---\n\n";
const FALLBACK_FILE_NAME: &str = "output.md";

/// What [`DocumentAssembler::assemble`] produced.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub path: PathBuf,
    /// Inline images saved while rewriting the pages.
    pub inline_images: Vec<ExtractedImage>,
}

/// Writes the final Markdown for one run.
pub struct DocumentAssembler {
    output_dir: PathBuf,
    /// `None` when image extraction is disabled: pages pass through as is.
    store: Option<Arc<ImageStore>>,
}

impl DocumentAssembler {
    /// Assembler with its own image store under `output_dir/image_subdir`.
    pub fn new(output_dir: impl Into<PathBuf>, image_subdir: &str, extract_images: bool) -> Self {
        let output_dir = output_dir.into();
        let store = extract_images.then(|| Arc::new(ImageStore::new(&output_dir, image_subdir)));
        Self { output_dir, store }
    }

    /// Assembler sharing `store` with the embedded-image extractor.
    pub fn with_store(output_dir: impl Into<PathBuf>, store: Option<Arc<ImageStore>>) -> Self {
        Self {
            output_dir: output_dir.into(),
            store,
        }
    }

    /// `<output_dir>/<source stem>.md`, or `output.md` without a source.
    pub fn default_output_path(&self, metadata: Option<&DocumentMetadata>) -> PathBuf {
        let stem = metadata
            .and_then(|m| m.source.as_deref())
            .and_then(Path::file_stem)
            .map(|s| format!("{}.md", s.to_string_lossy()));
        self.output_dir
            .join(stem.as_deref().unwrap_or(FALLBACK_FILE_NAME))
    }

    /// Extract inline images, build the document, and write it.
    pub fn assemble(
        &self,
        results: &[OcrPageResult],
        metadata: Option<&DocumentMetadata>,
        embedded: &EmbeddedImages,
        output_path: Option<&Path>,
    ) -> Result<AssembledDocument, OcrError> {
        let (pages, inline_images) = match &self.store {
            Some(store) => {
                let (texts, images) = inline::extract_numbered(
                    results.iter().map(|r| (r.page_num, r.markdown.as_str())),
                    store,
                );
                let pages: Vec<OcrPageResult> = results
                    .iter()
                    .zip(texts)
                    .map(|(r, markdown)| OcrPageResult {
                        markdown,
                        ..r.clone()
                    })
                    .collect();
                info!("Saved {} inline image(s)", images.len());
                (pages, images)
            }
            None => (results.to_vec(), Vec::new()),
        };

        let markdown = build_markdown(&pages, metadata, embedded);
        let path = output_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_output_path(metadata));

        write_atomic(&path, &markdown)?;
        info!("Markdown written: {} ({} bytes)", path.display(), markdown.len());

        Ok(AssembledDocument {
            path,
            inline_images,
        })
    }
}

/// Build the document text. Pages appear in the order given.
pub fn build_markdown(
    pages: &[OcrPageResult],
    metadata: Option<&DocumentMetadata>,
    embedded: &EmbeddedImages,
) -> String {
    let mut lines: Vec<String> = vec![DOCUMENT_TITLE.to_string(), String::new()];

    if let Some(meta) = metadata {
        lines.push(format!("> 由 {} 生成", meta.generator));
        if let Some(name) = meta.source_name() {
            lines.push(format!("> 来源: {}", name));
        }
        if let Some(count) = meta.page_count {
            lines.push(format!("> 页数: {}", count));
        }
        if meta.embedded_images > 0 {
            lines.push(format!("> 嵌入图片: {}", meta.embedded_images));
        }
        lines.push(format!(
            "> 生成时间: {}",
            meta.generated_at.format("%Y-%m-%d %H:%M:%S")
        ));
        lines.push(String::new());
        lines.push("---".into());
        lines.push(String::new());
    }

    for page in pages {
        lines.push(format!("## 第 {} 页", page.page_num));
        lines.push(String::new());
        lines.push("---".into());
        lines.push(String::new());
        lines.push(page.markdown.clone());
        lines.push(String::new());

        if let Some(images) = embedded.get(&page.page_num).filter(|v| !v.is_empty()) {
            for img in images {
                lines.push(format!(
                    "![第 {} 页 图 {}]({})",
                    img.page_number, img.index, img.relative_path
                ));
            }
            lines.push(String::new());
        }

        lines.push("---".into());
        lines.push(String::new());
    }

    lines.push(END_MARKER.to_string());
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Join page texts with a rule and write them, no headers.
pub fn assemble_simple(pages: &[String], output_path: &Path) -> Result<PathBuf, OcrError> {
    write_atomic(output_path, &pages.join(SIMPLE_SEPARATOR))?;
    debug!("Simple Markdown written: {}", output_path.display());
    Ok(output_path.to_path_buf())
}

/// Write `content` to `path` through a temp file in the same directory.
fn write_atomic(path: &Path, content: &str) -> Result<(), OcrError> {
    let failed = |source: std::io::Error| OcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(failed)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(failed)?;
    tmp.write_all(content.as_bytes()).map_err(failed)?;
    tmp.flush().map_err(failed)?;
    tmp.persist(path).map_err(|e| failed(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::output::ImageSource;
    use crate::pipeline::encode::png_bytes;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::{DynamicImage, RgbImage};
    use tempfile::TempDir;

    fn page(n: u32, md: &str) -> OcrPageResult {
        OcrPageResult::success(n, md.to_string(), 1, 10)
    }

    #[test]
    fn layout_with_metadata() {
        let meta = DocumentMetadata::new("/docs/report.pdf", 2);
        let md = build_markdown(
            &[page(1, "# Page 1"), page(2, "# Page 2")],
            Some(&meta),
            &EmbeddedImages::new(),
        );

        assert!(md.starts_with("# 文档\n\n> 由 pdf-ocr-md 生成\n> 来源: report.pdf\n> 页数: 2\n> 生成时间: "));
        assert!(!md.contains("嵌入图片"));
        assert!(md.contains("## 第 1 页\n\n---\n\n# Page 1\n\n---\n\n## 第 2 页"));
        assert!(md.ends_with("# Page 2\n\n---\n\n<!-- 文档结束 -->\n"));
    }

    #[test]
    fn no_metadata_means_no_blockquote() {
        let md = build_markdown(&[page(1, "x")], None, &EmbeddedImages::new());
        assert!(md.starts_with("# 文档\n\n## 第 1 页"));
        assert!(!md.contains("> "));
    }

    #[test]
    fn headings_follow_real_page_numbers() {
        let md = build_markdown(&[page(3, "c"), page(7, "g")], None, &EmbeddedImages::new());
        let third = md.find("## 第 3 页").unwrap();
        let seventh = md.find("## 第 7 页").unwrap();
        assert!(third < seventh);
        assert!(!md.contains("## 第 1 页"));
    }

    #[test]
    fn embedded_images_are_referenced_under_their_page() {
        let mut embedded = EmbeddedImages::new();
        embedded.insert(
            2,
            vec![ExtractedImage {
                path: PathBuf::from("/out/images/page_2_img_1.jpg"),
                relative_path: "images/page_2_img_1.jpg".into(),
                page_number: 2,
                index: 1,
                source: ImageSource::Embedded,
            }],
        );
        let mut meta = DocumentMetadata::new("a.pdf", 2);
        meta.embedded_images = 1;

        let md = build_markdown(&[page(1, "one"), page(2, "two")], Some(&meta), &embedded);
        assert!(md.contains("> 嵌入图片: 1"));
        let body = md.find("two").unwrap();
        let reference = md.find("![第 2 页 图 1](images/page_2_img_1.jpg)").unwrap();
        assert!(body < reference);
    }

    #[test]
    fn assemble_writes_default_path_and_extracts_inline_images() {
        let dir = TempDir::new().unwrap();
        let png = png_bytes(&DynamicImage::ImageRgb8(RgbImage::new(2, 2))).unwrap();
        let body = format!("![fig](data:image/png;base64,{})", STANDARD.encode(&png));
        let meta = DocumentMetadata::new("/in/paper.pdf", 1);

        let asm = DocumentAssembler::new(dir.path(), "images", true);
        let doc = asm
            .assemble(&[page(5, &body)], Some(&meta), &EmbeddedImages::new(), None)
            .unwrap();

        assert_eq!(doc.path, dir.path().join("paper.md"));
        assert_eq!(doc.inline_images.len(), 1);
        let written = std::fs::read_to_string(&doc.path).unwrap();
        assert!(written.contains("![fig](images/page_5_img_1.png)"));
        assert!(!written.contains("base64"));
        assert_eq!(std::fs::read(dir.path().join("images/page_5_img_1.png")).unwrap(), png);
    }

    #[test]
    fn disabled_extraction_passes_pages_through() {
        let dir = TempDir::new().unwrap();
        let body = "![fig](data:image/png;base64,iVBORw0KGgo=)";
        let asm = DocumentAssembler::new(dir.path(), "images", false);
        let doc = asm
            .assemble(&[page(1, body)], None, &EmbeddedImages::new(), None)
            .unwrap();

        assert_eq!(doc.path, dir.path().join("output.md"));
        assert!(std::fs::read_to_string(&doc.path).unwrap().contains(body));
        assert!(!dir.path().join("images").exists());
    }

    #[test]
    fn write_failure_names_the_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blocker"), b"").unwrap();
        let target = dir.path().join("blocker/out.md");

        let asm = DocumentAssembler::new(dir.path(), "images", false);
        let err = asm
            .assemble(&[page(1, "x")], None, &EmbeddedImages::new(), Some(&target))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Generation);
        assert!(err.to_string().contains("blocker/out.md"));
    }

    #[test]
    fn simple_variant_joins_with_rules() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested/simple.md");
        assemble_simple(&["a".into(), "b".into()], &out).unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "a\n\n---\n\nb");
    }
}
