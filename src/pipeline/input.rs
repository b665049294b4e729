//! Input validation: make sure a path names a readable PDF before any stage
//! touches it.
//!
//! pdfium reports most broken inputs as a generic load failure, so the
//! cheap checks (existence, file type, extension, `%PDF` signature) run
//! first and produce an error that names the actual problem.

use crate::error::OcrError;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Check that `path` is an existing regular file with a `.pdf` extension
/// and the `%PDF` signature.
pub fn validate_pdf_path(path: &Path) -> Result<(), OcrError> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(OcrError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(OcrError::CorruptPdf {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    };

    if !meta.is_file() {
        return Err(OcrError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    let has_pdf_ext = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !has_pdf_ext {
        return Err(OcrError::NotAPdf {
            path: path.to_path_buf(),
            detail: "missing .pdf extension".into(),
        });
    }

    let mut magic = [0u8; 4];
    let read = File::open(path).and_then(|mut f| f.read_exact(&mut magic));
    match read {
        Ok(()) if &magic == PDF_MAGIC => {}
        Ok(()) => {
            return Err(OcrError::NotAPdf {
                path: path.to_path_buf(),
                detail: format!("signature {:?} is not %PDF", String::from_utf8_lossy(&magic)),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(OcrError::NotAPdf {
                path: path.to_path_buf(),
                detail: "file is shorter than the PDF header".into(),
            })
        }
        Err(e) => {
            return Err(OcrError::CorruptPdf {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    }

    debug!("Validated PDF input: {}", path.display());
    Ok(())
}
