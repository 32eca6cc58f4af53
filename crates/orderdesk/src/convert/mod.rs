//! Boundary to the document conversion service.
//!
//! The service rasterizes a document into page images. This crate only
//! calls it; rendering happens elsewhere.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ConversionError;

pub mod http;

pub use http::HttpConverter;

/// One conversion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionRequest {
    pub file_path: PathBuf,
    pub output_dir: PathBuf,
    pub dpi: u32,
}

pub trait DocumentConverter: Send + Sync {
    /// Where the service lives, for error messages.
    fn endpoint(&self) -> &str;

    /// Checks the service health. Never errors; an unreachable service is `false`.
    fn is_available(&self) -> bool;

    /// Converts `request.file_path` and returns the produced files.
    fn convert(&self, request: &ConversionRequest) -> Result<Vec<PathBuf>, ConversionError>;
}

/// Resolves paths reported by the service. Relative entries are taken
/// relative to the request's output directory.
pub(crate) fn resolve_outputs(output_dir: &Path, files: Vec<String>) -> Vec<PathBuf> {
    files
        .into_iter()
        .filter(|f| !f.trim().is_empty())
        .map(|f| {
            let path = PathBuf::from(f);
            if path.is_absolute() {
                path
            } else {
                output_dir.join(path)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_outputs() {
        let out = Path::new("/srv/staging/job");
        let resolved = resolve_outputs(
            out,
            vec![
                "/abs/page_1.png".to_string(),
                "page_2.png".to_string(),
                " ".to_string(),
            ],
        );
        assert_eq!(
            resolved,
            vec![
                PathBuf::from("/abs/page_1.png"),
                PathBuf::from("/srv/staging/job/page_2.png")
            ]
        );
    }

    #[test]
    fn test_request_serializes_as_service_payload() {
        let request = ConversionRequest {
            file_path: PathBuf::from("/a/b.pdf"),
            output_dir: PathBuf::from("/out"),
            dpi: 300,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"file_path": "/a/b.pdf", "output_dir": "/out", "dpi": 300})
        );
    }
}
