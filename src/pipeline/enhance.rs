//! Page image enhancement ahead of recognition.
//!
//! Each adjustment blends the page with a "degenerate" version of itself:
//! a flat grey at the mean luminance for contrast, a 3×3 smoothed copy for
//! sharpness, and black for brightness. A factor of 1.0 leaves the image
//! untouched, below 1.0 moves toward the degenerate image and above 1.0
//! extrapolates away from it. A 3×3 median filter runs last so it removes
//! speckle the earlier passes amplified.

use crate::error::OcrError;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::filter::median_filter;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Enhancement settings, applied identically to every page of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnhancementProfile {
    pub enabled: bool,
    pub contrast: f32,
    pub sharpness: f32,
    pub brightness: f32,
    pub denoise: bool,
}

impl Default for EnhancementProfile {
    fn default() -> Self {
        Self {
            enabled: true,
            contrast: 1.2,
            sharpness: 1.5,
            brightness: 1.0,
            denoise: true,
        }
    }
}

impl EnhancementProfile {
    /// A profile that returns every image unchanged.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Smoothing kernel used as the sharpness reference.
const SMOOTH_KERNEL: [f32; 9] = [1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0];

/// Apply `profile` to `image`. The input is never modified.
pub fn enhance(image: &DynamicImage, profile: &EnhancementProfile) -> DynamicImage {
    if !profile.enabled {
        return image.clone();
    }

    let mut img = image.to_rgb8();

    if profile.contrast != 1.0 {
        let mean = mean_luma(&img);
        img = blend_with(&img, |_, _| Rgb([mean, mean, mean]), profile.contrast);
        debug!("contrast {} (mean luma {})", profile.contrast, mean);
    }

    if profile.sharpness != 1.0 {
        let smooth = DynamicImage::ImageRgb8(img.clone())
            .filter3x3(&SMOOTH_KERNEL)
            .to_rgb8();
        img = blend_with(&img, |x, y| *smooth.get_pixel(x, y), profile.sharpness);
        debug!("sharpness {}", profile.sharpness);
    }

    if profile.brightness != 1.0 {
        img = blend_with(&img, |_, _| Rgb([0, 0, 0]), profile.brightness);
        debug!("brightness {}", profile.brightness);
    }

    if profile.denoise {
        img = median_filter(&img, 1, 1);
        debug!("median denoise 3x3");
    }

    DynamicImage::ImageRgb8(img)
}

/// Open, enhance and collect each image file, in input order.
///
/// The first unreadable file aborts the batch with an error naming it.
pub fn enhance_files(
    paths: &[PathBuf],
    profile: &EnhancementProfile,
) -> Result<Vec<DynamicImage>, OcrError> {
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            debug!("enhancing image {}/{}: {}", i + 1, paths.len(), path.display());
            let img = open_image(path)?;
            Ok(enhance(&img, profile))
        })
        .collect()
}

fn open_image(path: &Path) -> Result<DynamicImage, OcrError> {
    image::open(path).map_err(|e| OcrError::ImageFile {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// `out = degenerate + factor × (src − degenerate)`, clamped to 0..=255.
fn blend_with<F>(src: &RgbImage, degenerate: F, factor: f32) -> RgbImage
where
    F: Fn(u32, u32) -> Rgb<u8>,
{
    RgbImage::from_fn(src.width(), src.height(), |x, y| {
        let s = src.get_pixel(x, y).0;
        let d = degenerate(x, y).0;
        let mut out = [0u8; 3];
        for c in 0..3 {
            let v = d[c] as f32 + factor * (s[c] as f32 - d[c] as f32);
            out[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

/// Mean ITU-R 601-2 luma, rounded to the nearest level.
fn mean_luma(img: &RgbImage) -> u8 {
    let n = img.width() as u64 * img.height() as u64;
    if n == 0 {
        return 0;
    }
    let sum: u64 = img
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            (r as u64 * 299 + g as u64 * 587 + b as u64 * 114) / 1000
        })
        .sum();
    ((sum as f64 / n as f64) + 0.5) as u8
}
