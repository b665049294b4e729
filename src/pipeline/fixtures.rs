//! Small PDFs built in-process for unit tests.

use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

/// An image XObject to place on a fixture page.
pub(crate) enum FixtureImage {
    /// Raw 8-bit RGB samples, stored uncompressed.
    RawRgb { width: i64, height: i64, pixels: Vec<u8> },
    /// A JPEG file stored with `/DCTDecode`.
    Jpeg { width: i64, height: i64, bytes: Vec<u8> },
    /// A stream that claims `/FlateDecode` but holds garbage.
    Corrupt,
}

/// Write an A4 document with `pages` empty pages.
pub(crate) fn write_blank_pdf(path: &Path, pages: usize) {
    write_pdf(path, (0..pages).map(|_| Vec::new()).collect());
}

/// Write one A4 page per entry, each drawing the listed images.
pub(crate) fn write_pdf(path: &Path, pages: Vec<Vec<FixtureImage>>) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::new();
    for images in pages {
        let mut xobjects = lopdf::Dictionary::new();
        let mut ops = String::new();
        for (i, img) in images.into_iter().enumerate() {
            let name = format!("Im{}", i + 1);
            let id = add_image(&mut doc, img);
            xobjects.set(name.as_bytes().to_vec(), Object::Reference(id));
            ops.push_str(&format!("q 100 0 0 100 50 {} cm /{} Do Q\n", 50 + i * 120, name));
        }

        let content_id = doc.add_object(Stream::new(dictionary! {}, ops.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => xobjects },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("write fixture PDF");
}

fn add_image(doc: &mut Document, img: FixtureImage) -> ObjectId {
    match img {
        FixtureImage::RawRgb {
            width,
            height,
            pixels,
        } => doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            pixels,
        )),
        FixtureImage::Jpeg {
            width,
            height,
            bytes,
        } => doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            bytes,
        )),
        FixtureImage::Corrupt => doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 4,
                "Height" => 4,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            b"definitely not zlib".to_vec(),
        )),
    }
}

/// A small JPEG encoded with the `image` crate.
pub(crate) fn tiny_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Jpeg)
        .expect("encode jpeg");
    buf.into_inner()
}
