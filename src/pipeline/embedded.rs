//! Embedded-image extraction: copy image XObjects out of the PDF itself.
//!
//! This works on the document's object graph, not on rendered bitmaps, so
//! images keep their native resolution. For every page the `/XObject`
//! resources are walked in declaration order (inherited `/Resources` are
//! followed up the page tree) and each `/Subtype /Image` stream is saved:
//!
//! * `DCTDecode` streams are JPEG files already and are written as `.jpg`.
//! * `JPXDecode` streams are written verbatim as `.jp2`.
//! * Everything else is decoded to raw samples and re-encoded as PNG using
//!   `/Width`, `/Height`, `/BitsPerComponent` and `/ColorSpace`.
//!
//! An image that cannot be decoded is logged and skipped; the rest of the
//! page and the rest of the document are still processed.

use crate::error::OcrError;
use crate::output::{ExtractedImage, ImageSource};
use crate::pipeline::images::ImageStore;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Saved images keyed by 1-based page number, in declaration order.
pub type EmbeddedImages = BTreeMap<u32, Vec<ExtractedImage>>;

/// Page-tree depth beyond which `/Parent` links are assumed to loop.
const MAX_TREE_DEPTH: usize = 64;

/// Extract images from every page, or from `pages` only when given.
///
/// Fails only when the document itself cannot be parsed or an image file
/// cannot be written. A PDF without images yields an empty map.
pub async fn extract_all(
    pdf_path: &Path,
    store: Arc<ImageStore>,
    pages: Option<&[u32]>,
) -> Result<EmbeddedImages, OcrError> {
    let path = pdf_path.to_path_buf();
    let pages = pages.map(<[u32]>::to_vec);
    tokio::task::spawn_blocking(move || extract_all_blocking(&path, &store, pages.as_deref()))
        .await
        .map_err(|e| OcrError::Internal(format!("Image extraction task panicked: {}", e)))?
}

/// Blocking implementation of [`extract_all`].
pub fn extract_all_blocking(
    pdf_path: &Path,
    store: &ImageStore,
    pages: Option<&[u32]>,
) -> Result<EmbeddedImages, OcrError> {
    let doc = Document::load(pdf_path).map_err(|e| OcrError::CorruptPdf {
        path: pdf_path.to_path_buf(),
        detail: e.to_string(),
    })?;

    if doc.is_encrypted() {
        warn!(
            "'{}' is encrypted; skipping embedded image extraction",
            pdf_path.display()
        );
        return Ok(EmbeddedImages::new());
    }

    let mut result = EmbeddedImages::new();
    for (page_num, page_id) in doc.get_pages() {
        if let Some(wanted) = pages {
            if !wanted.contains(&page_num) {
                continue;
            }
        }

        let streams = page_image_streams(&doc, page_id);
        for (i, stream) in streams.iter().enumerate() {
            let ordinal = i as u32 + 1;
            match image_file_bytes(&doc, stream) {
                Ok((ext, bytes)) => {
                    let saved = store.save(page_num, ext, &bytes, ImageSource::Embedded)?;
                    result.entry(page_num).or_default().push(saved);
                }
                Err(detail) => {
                    let e = OcrError::EmbeddedImage {
                        page: page_num,
                        index: ordinal,
                        detail,
                    };
                    warn!("{}; skipping", e);
                }
            }
        }
    }

    let total: usize = result.values().map(Vec::len).sum();
    info!(
        "Extracted {} embedded image(s) from {} page(s)",
        total,
        result.len()
    );
    Ok(result)
}

/// Image streams referenced from the page's `/XObject` resources.
fn page_image_streams<'a>(doc: &'a Document, page_id: ObjectId) -> Vec<&'a Stream> {
    let Some(resources) = page_resources(doc, page_id) else {
        return Vec::new();
    };
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve(doc, o).as_dict().ok())
    else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(name, obj)| {
            let stream = resolve(doc, obj).as_stream().ok()?;
            if is_image(&stream.dict) {
                Some(stream)
            } else {
                debug!("XObject /{} is not an image", String::from_utf8_lossy(name));
                None
            }
        })
        .collect()
}

/// The page's own `/Resources`, or the nearest inherited one.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(res) = node.get(b"Resources") {
            return resolve(doc, res).as_dict().ok();
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image")
}

fn filter_names(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![n.clone()],
        Ok(Object::Array(arr)) => arr
            .iter()
            .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

/// File extension and bytes for one image stream.
fn image_file_bytes(doc: &Document, stream: &Stream) -> Result<(&'static str, Vec<u8>), String> {
    let filters = filter_names(&stream.dict);

    match filters.last().map(Vec::as_slice) {
        Some(b"DCTDecode") if filters.len() == 1 => return Ok(("jpg", stream.content.clone())),
        Some(b"JPXDecode") if filters.len() == 1 => return Ok(("jp2", stream.content.clone())),
        Some(b"DCTDecode") | Some(b"JPXDecode") => {
            return Err("chained filters before an image codec are not supported".into())
        }
        Some(b"JBIG2Decode") | Some(b"CCITTFaxDecode") => {
            return Err(format!(
                "unsupported filter /{}",
                String::from_utf8_lossy(filters.last().map(Vec::as_slice).unwrap_or_default())
            ))
        }
        _ => {}
    }

    let samples = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream
            .decompressed_content()
            .map_err(|e| format!("stream could not be decoded: {}", e))?
    };

    let img = reconstruct(doc, &stream.dict, &samples)?;
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {}", e))?;
    Ok(("png", buf.into_inner()))
}

/// Colour model of an image, as far as it matters for reconstruction.
enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    /// Palette of packed RGB triples.
    Indexed(Vec<u8>),
}

fn color_model(doc: &Document, cs: &Object) -> Result<ColorModel, String> {
    match resolve(doc, cs) {
        Object::Name(n) => match n.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Ok(ColorModel::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(ColorModel::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorModel::Cmyk),
            other => Err(format!(
                "unsupported colour space /{}",
                String::from_utf8_lossy(other)
            )),
        },
        Object::Array(arr) if !arr.is_empty() => match arr[0].as_name().unwrap_or_default() {
            b"ICCBased" => {
                let n = arr
                    .get(1)
                    .and_then(|o| resolve(doc, o).as_stream().ok())
                    .and_then(|s| s.dict.get(b"N").ok())
                    .and_then(|o| o.as_i64().ok())
                    .unwrap_or(3);
                match n {
                    1 => Ok(ColorModel::Gray),
                    4 => Ok(ColorModel::Cmyk),
                    _ => Ok(ColorModel::Rgb),
                }
            }
            b"Indexed" | b"I" if arr.len() >= 4 => {
                if !matches!(color_model(doc, &arr[1])?, ColorModel::Rgb) {
                    return Err("indexed images are only supported over RGB".into());
                }
                let lookup = match resolve(doc, &arr[3]) {
                    Object::String(bytes, _) => bytes.clone(),
                    Object::Stream(s) => s
                        .decompressed_content()
                        .unwrap_or_else(|_| s.content.clone()),
                    _ => return Err("indexed colour space has no lookup table".into()),
                };
                Ok(ColorModel::Indexed(lookup))
            }
            other => Err(format!(
                "unsupported colour space /{}",
                String::from_utf8_lossy(other)
            )),
        },
        _ => Err("malformed /ColorSpace".into()),
    }
}

fn int_entry(dict: &Dictionary, key: &[u8]) -> Result<u32, String> {
    dict.get(key)
        .and_then(Object::as_i64)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|&v| v > 0)
        .ok_or_else(|| format!("missing or invalid /{}", String::from_utf8_lossy(key)))
}

/// Rebuild a bitmap from decoded samples.
fn reconstruct(doc: &Document, dict: &Dictionary, samples: &[u8]) -> Result<DynamicImage, String> {
    let width = int_entry(dict, b"Width")?;
    let height = int_entry(dict, b"Height")?;
    let bpc = int_entry(dict, b"BitsPerComponent").unwrap_or(8);
    let is_mask = matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true)));

    let model = if is_mask {
        ColorModel::Gray
    } else {
        match dict.get(b"ColorSpace") {
            Ok(cs) => color_model(doc, cs)?,
            Err(_) => return Err("missing /ColorSpace".into()),
        }
    };
    let bpc = if is_mask { 1 } else { bpc };

    let (w, h) = (width as usize, height as usize);
    let too_short = |needed: usize| {
        format!(
            "sample buffer holds {} bytes, {}x{} needs {}",
            samples.len(),
            width,
            height,
            needed
        )
    };

    match (model, bpc) {
        (ColorModel::Gray, 8) => {
            let needed = w * h;
            let data = samples.get(..needed).ok_or_else(|| too_short(needed))?;
            GrayImage::from_raw(width, height, data.to_vec())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| "grayscale buffer mismatch".into())
        }
        (ColorModel::Gray, 1) => {
            let row = w.div_ceil(8);
            let needed = row * h;
            let data = samples.get(..needed).ok_or_else(|| too_short(needed))?;
            let img = GrayImage::from_fn(width, height, |x, y| {
                let byte = data[y as usize * row + x as usize / 8];
                let bit = (byte >> (7 - (x % 8))) & 1;
                image::Luma([if bit == 1 { 255 } else { 0 }])
            });
            Ok(DynamicImage::ImageLuma8(img))
        }
        (ColorModel::Rgb, 8) => {
            let needed = w * h * 3;
            let data = samples.get(..needed).ok_or_else(|| too_short(needed))?;
            RgbImage::from_raw(width, height, data.to_vec())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| "RGB buffer mismatch".into())
        }
        (ColorModel::Cmyk, 8) => {
            let needed = w * h * 4;
            let data = samples.get(..needed).ok_or_else(|| too_short(needed))?;
            let rgb: Vec<u8> = data
                .chunks_exact(4)
                .flat_map(|p| {
                    let k = 255 - p[3] as u32;
                    [0, 1, 2].map(|c| ((255 - p[c] as u32) * k / 255) as u8)
                })
                .collect();
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| "CMYK buffer mismatch".into())
        }
        (ColorModel::Indexed(palette), 8) => {
            let needed = w * h;
            let data = samples.get(..needed).ok_or_else(|| too_short(needed))?;
            let rgb: Vec<u8> = data
                .iter()
                .flat_map(|&i| {
                    let at = i as usize * 3;
                    match palette.get(at..at + 3) {
                        Some(p) => [p[0], p[1], p[2]],
                        None => [0, 0, 0],
                    }
                })
                .collect();
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| "indexed buffer mismatch".into())
        }
        (_, bpc) => Err(format!("{} bits per component is not supported", bpc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fixtures::{tiny_jpeg, write_blank_pdf, write_pdf, FixtureImage};
    use tempfile::TempDir;
    use lopdf::dictionary;

    fn red_square() -> FixtureImage {
        FixtureImage::RawRgb {
            width: 2,
            height: 2,
            pixels: [255u8, 0, 0].repeat(4),
        }
    }

    #[test]
    fn images_are_saved_per_page_in_declared_order() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("doc.pdf");
        let jpeg = tiny_jpeg(8, 8);
        write_pdf(
            &pdf,
            vec![
                vec![
                    red_square(),
                    FixtureImage::Jpeg {
                        width: 8,
                        height: 8,
                        bytes: jpeg.clone(),
                    },
                ],
                vec![FixtureImage::Corrupt, red_square()],
                vec![],
            ],
        );

        let store = ImageStore::new(dir.path(), "images");
        let found = extract_all_blocking(&pdf, &store, None).unwrap();

        assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![1, 2]);

        let p1 = &found[&1];
        assert_eq!(p1[0].relative_path, "images/page_1_img_1.png");
        assert_eq!(p1[1].relative_path, "images/page_1_img_2.jpg");
        assert_eq!(std::fs::read(&p1[1].path).unwrap(), jpeg);

        let png = image::open(&p1[0].path).unwrap().to_rgb8();
        assert_eq!(png.dimensions(), (2, 2));
        assert_eq!(png.get_pixel(1, 1).0, [255, 0, 0]);

        // The corrupt stream is skipped without consuming an index.
        let p2 = &found[&2];
        assert_eq!(p2.len(), 1);
        assert_eq!(p2[0].relative_path, "images/page_2_img_1.png");
        assert!(p2.iter().all(|i| i.source == ImageSource::Embedded));
    }

    #[test]
    fn page_filter_limits_extraction() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("doc.pdf");
        write_pdf(&pdf, vec![vec![red_square()], vec![red_square()]]);

        let store = ImageStore::new(dir.path(), "images");
        let found = extract_all_blocking(&pdf, &store, Some(&[2u32][..])).unwrap();
        assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert!(!dir.path().join("images/page_1_img_1.png").exists());
    }

    #[tokio::test]
    async fn no_images_yields_empty_map() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("blank.pdf");
        write_blank_pdf(&pdf, 2);

        let store = Arc::new(ImageStore::new(dir.path(), "images"));
        let found = extract_all(&pdf, store.clone(), None).await.unwrap();
        assert!(found.is_empty());
        assert_eq!(store.saved_count(), 0);
    }

    #[test]
    fn unparseable_document_is_fatal() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("junk.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 garbage").unwrap();
        let store = ImageStore::new(dir.path(), "images");
        assert!(matches!(
            extract_all_blocking(&pdf, &store, None).unwrap_err(),
            OcrError::CorruptPdf { .. }
        ));
    }

    #[test]
    fn cmyk_is_converted_to_rgb() {
        let doc = Document::with_version("1.5");
        let dict = lopdf::dictionary! {
            "Width" => 1,
            "Height" => 1,
            "BitsPerComponent" => 8,
            "ColorSpace" => "DeviceCMYK",
        };
        let img = reconstruct(&doc, &dict, &[0, 255, 255, 0]).unwrap().to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0]);
    }

    #[test]
    fn short_buffer_is_reported() {
        let doc = Document::with_version("1.5");
        let dict = lopdf::dictionary! {
            "Width" => 4,
            "Height" => 4,
            "BitsPerComponent" => 8,
            "ColorSpace" => "DeviceRGB",
        };
        let err = reconstruct(&doc, &dict, &[0; 10]).unwrap_err();
        assert!(err.contains("needs 48"), "got: {err}");
    }
}
