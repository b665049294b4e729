//! Inline-image extraction: persist the data-URL images a model emits.
//!
//! Vision models sometimes answer a figure with
//! `![caption](data:image/png;base64,iVBOR...)`. Left in place, a single
//! figure can add megabytes of base64 to the document. Each such link is
//! decoded, written through the shared [`ImageStore`], and rewritten to
//! `![caption](images/page_<p>_img_<n>.<fmt>)` with the alt text kept as is.
//!
//! A link that fails to decode or save is logged and left untouched; the
//! remaining links of the page are still processed.

use crate::error::OcrError;
use crate::output::{ExtractedImage, ImageSource};
use crate::pipeline::images::ImageStore;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

static RE_DATA_URL_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[(.*?)\]\(data:image/(\w+);base64,([A-Za-z0-9+/=]+)\)").unwrap()
});

/// Rewrite every data-URL image of one page, left to right.
///
/// Returns the rewritten text and the images saved, in order of appearance.
/// Text outside the matched links is copied through unchanged.
pub fn extract(markdown: &str, page_num: u32, store: &ImageStore) -> (String, Vec<ExtractedImage>) {
    let mut out = String::with_capacity(markdown.len());
    let mut saved = Vec::new();
    let mut last_end = 0;

    for caps in RE_DATA_URL_IMAGE.captures_iter(markdown) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&markdown[last_end..whole.start()]);
        last_end = whole.end();

        match save_match(&caps, page_num, store) {
            Ok(image) => {
                let alt = caps.get(1).map_or("", |m| m.as_str());
                out.push_str(&format!("![{}]({})", alt, image.relative_path));
                saved.push(image);
            }
            Err(e) => {
                warn!("Page {}: {}", page_num, e);
                out.push_str(whole.as_str());
            }
        }
    }
    out.push_str(&markdown[last_end..]);

    if !saved.is_empty() {
        info!("Page {}: saved {} inline image(s)", page_num, saved.len());
    }
    (out, saved)
}

/// [`extract`] over a document, numbering pages 1.. by position.
pub fn extract_batch(pages: &[String], store: &ImageStore) -> (Vec<String>, Vec<ExtractedImage>) {
    extract_numbered(
        pages
            .iter()
            .enumerate()
            .map(|(i, md)| (i as u32 + 1, md.as_str())),
        store,
    )
}

/// [`extract`] over `(page_num, markdown)` pairs, keeping the given numbers.
///
/// Used when only a subset of the document was processed, so image names
/// match the real page numbers.
pub fn extract_numbered<'a, I>(pages: I, store: &ImageStore) -> (Vec<String>, Vec<ExtractedImage>)
where
    I: IntoIterator<Item = (u32, &'a str)>,
{
    let mut rewritten = Vec::new();
    let mut all = Vec::new();
    for (page_num, markdown) in pages {
        let (text, images) = extract(markdown, page_num, store);
        rewritten.push(text);
        all.extend(images);
    }
    (rewritten, all)
}

/// Split a `data:image/<fmt>;base64,<payload>` URL into bytes and format.
pub fn decode_data_url(url: &str) -> Result<(Vec<u8>, String), String> {
    let rest = url
        .strip_prefix("data:image/")
        .ok_or_else(|| "not an image data URL".to_string())?;
    let (format, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| "data URL is not base64 encoded".to_string())?;
    let bytes = STANDARD.decode(payload.trim()).map_err(|e| e.to_string())?;
    Ok((bytes, format.to_ascii_lowercase()))
}

fn save_match(caps: &Captures<'_>, page_num: u32, store: &ImageStore) -> Result<ExtractedImage, OcrError> {
    let format = caps.get(2).map_or("png", |m| m.as_str()).to_ascii_lowercase();
    let payload = caps.get(3).map_or("", |m| m.as_str());

    let bytes = STANDARD.decode(payload).map_err(|e| OcrError::InlineImage {
        page: page_num,
        detail: format!("invalid base64 payload: {}", e),
    })?;
    if bytes.is_empty() {
        return Err(OcrError::InlineImage {
            page: page_num,
            detail: "empty payload".into(),
        });
    }

    let image = store.save(page_num, &format, &bytes, ImageSource::Inline)?;
    debug!("Page {}: inline image → {}", page_num, image.relative_path);
    Ok(image)
}
