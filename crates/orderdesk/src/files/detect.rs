use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Coarse file type stored on upload rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Pdf,
    Doc,
    Docx,
    Ppt,
    Pptx,
    Image,
    Zip,
    Rar,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Doc => "doc",
            Self::Docx => "docx",
            Self::Ppt => "ppt",
            Self::Pptx => "pptx",
            Self::Image => "image",
            Self::Zip => "zip",
            Self::Rar => "rar",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "doc" => Some(Self::Doc),
            "docx" => Some(Self::Docx),
            "ppt" => Some(Self::Ppt),
            "pptx" => Some(Self::Pptx),
            "jpg" | "jpeg" | "png" | "bmp" | "tiff" | "tif" | "gif" => Some(Self::Image),
            "zip" => Some(Self::Zip),
            "rar" => Some(Self::Rar),
            _ => None,
        }
    }

    /// Whether the conversion service accepts this type.
    pub fn is_convertible(&self) -> bool {
        matches!(
            self,
            Self::Pdf | Self::Doc | Self::Docx | Self::Ppt | Self::Pptx | Self::Zip
        )
    }

    fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(b"%PDF") {
            Some(Self::Pdf)
        } else if header.starts_with(b"PK\x03\x04") {
            // Office Open XML documents are zip containers too.
            Some(Self::Zip)
        } else if header.starts_with(b"Rar!\x1A\x07") {
            Some(Self::Rar)
        } else if header.starts_with(b"\xFF\xD8\xFF") || header.starts_with(b"\x89PNG\r\n\x1A\n") {
            Some(Self::Image)
        } else {
            None
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detects the type of the file at `path`: known extensions first, then any
/// `image/*` MIME guess, then the first bytes of the file.
pub fn detect_file_type(path: &Path) -> FileType {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if let Some(file_type) = FileType::from_extension(extension) {
        return file_type;
    }

    if mime_guess::from_path(path)
        .first()
        .is_some_and(|m| m.type_() == mime_guess::mime::IMAGE)
    {
        return FileType::Image;
    }

    let mut header = [0u8; 8];
    let read = File::open(path).and_then(|mut f| f.read(&mut header));
    match read {
        Ok(n) => FileType::from_magic(&header[..n]).unwrap_or(FileType::Unknown),
        Err(e) => {
            log::debug!("Cannot read header of {}: {}", path.display(), e);
            FileType::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extension_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Slides.PPTX");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        assert_eq!(detect_file_type(&path), FileType::Pptx);
    }

    #[test]
    fn test_mime_guess_for_other_images() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.webp");
        std::fs::write(&path, b"RIFF").unwrap();
        assert_eq!(detect_file_type(&path), FileType::Image);
    }

    #[test]
    fn test_magic_bytes() {
        let dir = TempDir::new().unwrap();
        let cases: [(&str, &[u8], FileType); 5] = [
            ("a.bin", b"%PDF-1.4\n", FileType::Pdf),
            ("b.bin", b"PK\x03\x04rest", FileType::Zip),
            ("c.bin", b"Rar!\x1A\x07\x00", FileType::Rar),
            ("d.bin", b"\x89PNG\r\n\x1A\n", FileType::Image),
            ("e.bin", b"hello", FileType::Unknown),
        ];
        for (name, content, expected) in cases {
            let path = dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            assert_eq!(detect_file_type(&path), expected, "{}", name);
        }
    }

    #[test]
    fn test_missing_file_is_unknown() {
        assert_eq!(
            detect_file_type(Path::new("/nonexistent/orderdesk/file")),
            FileType::Unknown
        );
    }

    #[test]
    fn test_convertible() {
        assert!(FileType::Docx.is_convertible());
        assert!(!FileType::Image.is_convertible());
        assert!(!FileType::Unknown.is_convertible());
    }
}
