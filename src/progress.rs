//! Per-page progress events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] through
//! [`crate::config::ConversionConfigBuilder::progress_callback`]. The
//! pipeline processes pages one after another, so events for a run arrive
//! strictly in page order on a single task.
//!
//! ```rust
//! use pdf_ocr_md::{ConversionConfig, ConversionProgressCallback};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ConversionProgressCallback for Printer {
//!     fn on_page_complete(&self, page_num: u32, total_pages: usize, markdown_len: usize) {
//!         eprintln!("page {page_num}/{total_pages}: {markdown_len} bytes");
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .api_key("sk-example")
//!     .progress_callback(Arc::new(Printer))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Receives conversion events. Every method defaults to a no-op.
pub trait ConversionProgressCallback: Send + Sync {
    /// Before the first page is rendered.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Before the OCR request for `page_num` (1-indexed) is sent.
    fn on_page_start(&self, page_num: u32, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// After `page_num` was recognised; `markdown_len` is in bytes.
    fn on_page_complete(&self, page_num: u32, total_pages: usize, markdown_len: usize) {
        let _ = (page_num, total_pages, markdown_len);
    }

    /// After `page_num` failed with every retry spent. Processing continues.
    fn on_page_error(&self, page_num: u32, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// After every selected page has been attempted.
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// Used when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ConversionProgressCallback for Recorder {
        fn on_conversion_start(&self, total_pages: usize) {
            self.events.lock().unwrap().push(format!("start {total_pages}"));
        }

        fn on_page_complete(&self, page_num: u32, _total: usize, _len: usize) {
            self.events.lock().unwrap().push(format!("ok {page_num}"));
        }

        fn on_page_error(&self, page_num: u32, _total: usize, _error: &str) {
            self.events.lock().unwrap().push(format!("err {page_num}"));
        }
    }

    #[test]
    fn noop_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_conversion_start(2);
        cb.on_page_start(1, 2);
        cb.on_page_complete(1, 2, 42);
        cb.on_page_error(2, 2, "timeout");
        cb.on_conversion_complete(2, 1);
    }

    #[test]
    fn overridden_methods_see_events_in_order() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        cb.on_conversion_start(3);
        cb.on_page_start(1, 3);
        cb.on_page_complete(1, 3, 10);
        cb.on_page_error(2, 3, "boom");
        cb.on_page_complete(3, 3, 5);

        assert_eq!(
            *rec.events.lock().unwrap(),
            vec!["start 3", "ok 1", "err 2", "ok 3"]
        );
    }
}
