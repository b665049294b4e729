//! The `images/` directory next to the Markdown file.
//!
//! Embedded and inline images share one directory and one naming scheme,
//! `page_<p>_img_<n>.<ext>`. [`ImageStore`] keeps a counter per page so the
//! two extractors never hand out the same name: embedded images of page 3
//! take `img_1`, `img_2`, and inline images of page 3 continue at `img_3`.
//! A counter advances only after the file was written.

use crate::error::OcrError;
use crate::output::{ExtractedImage, ImageSource};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct ImageStore {
    dir: PathBuf,
    subdir: String,
    counters: Mutex<BTreeMap<u32, u32>>,
}

impl ImageStore {
    /// Store rooted at `<output_dir>/<subdir>`. The directory is created on
    /// the first save.
    pub fn new(output_dir: &Path, subdir: &str) -> Self {
        Self {
            dir: output_dir.join(subdir),
            subdir: subdir.to_string(),
            counters: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Images saved so far, across all pages.
    pub fn saved_count(&self) -> usize {
        self.lock().values().map(|&n| n as usize).sum()
    }

    /// Write `bytes` as the next image of `page`.
    pub fn save(
        &self,
        page: u32,
        ext: &str,
        bytes: &[u8],
        source: ImageSource,
    ) -> Result<ExtractedImage, OcrError> {
        let mut counters = self.lock();
        let index = counters.get(&page).copied().unwrap_or(0) + 1;

        let file_name = format!("page_{}_img_{}.{}", page, index, ext);
        let path = self.dir.join(&file_name);

        std::fs::create_dir_all(&self.dir).map_err(|source| OcrError::ImageWriteFailed {
            path: self.dir.clone(),
            source,
        })?;
        std::fs::write(&path, bytes).map_err(|source| OcrError::ImageWriteFailed {
            path: path.clone(),
            source,
        })?;

        counters.insert(page, index);
        debug!("Saved {:?} image {}", source, path.display());

        Ok(ExtractedImage {
            relative_path: format!("{}/{}", self.subdir, file_name),
            path,
            page_number: page,
            index,
            source,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u32, u32>> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn counters_are_per_page_and_shared_across_sources() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path(), "images");

        let a = store.save(3, "jpg", b"a", ImageSource::Embedded).unwrap();
        let b = store.save(3, "png", b"b", ImageSource::Inline).unwrap();
        let c = store.save(1, "png", b"c", ImageSource::Inline).unwrap();

        assert_eq!(a.relative_path, "images/page_3_img_1.jpg");
        assert_eq!(b.relative_path, "images/page_3_img_2.png");
        assert_eq!(c.relative_path, "images/page_1_img_1.png");
        assert_eq!(std::fs::read(&b.path).unwrap(), b"b");
        assert_eq!(store.saved_count(), 3);
    }

    #[test]
    fn directory_is_created_lazily() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path(), "figs");
        assert!(!store.dir().exists());
        store.save(1, "png", b"x", ImageSource::Inline).unwrap();
        assert!(dir.path().join("figs/page_1_img_1.png").is_file());
    }

    #[test]
    fn failed_write_does_not_consume_an_index() {
        let dir = TempDir::new().unwrap();
        // A regular file where the directory should be makes every write fail.
        std::fs::write(dir.path().join("images"), b"").unwrap();
        let store = ImageStore::new(dir.path(), "images");

        let err = store.save(1, "png", b"x", ImageSource::Inline).unwrap_err();
        assert!(matches!(err, OcrError::ImageWriteFailed { .. }));
        assert_eq!(store.saved_count(), 0);
    }
}
