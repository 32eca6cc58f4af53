#![allow(dead_code)]

use std::path::PathBuf;

use orderdesk::{ConversionError, ConversionRequest, DocumentConverter};

/// Writes `pages` PNG placeholders per request into the request's output
/// directory.
pub struct StubConverter {
    pub available: bool,
    pub pages: usize,
}

impl StubConverter {
    pub fn new(pages: usize) -> Self {
        Self {
            available: true,
            pages,
        }
    }

    pub fn offline() -> Self {
        Self {
            available: false,
            pages: 0,
        }
    }
}

impl DocumentConverter for StubConverter {
    fn endpoint(&self) -> &str {
        "stub://converter"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn convert(&self, request: &ConversionRequest) -> Result<Vec<PathBuf>, ConversionError> {
        let stem = request
            .file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string());
        let mut outputs = Vec::with_capacity(self.pages);
        for page in 1..=self.pages {
            let path = request.output_dir.join(format!("{}_page{}.png", stem, page));
            std::fs::write(&path, format!("{} page {} at {} dpi", stem, page, request.dpi))
                .map_err(|e| ConversionError::Rejected(e.to_string()))?;
            outputs.push(path);
        }
        Ok(outputs)
    }
}
