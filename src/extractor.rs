//! Reads a single file into normalized UTF-8 text (C4).

use crate::error::{PipelineError, Result};
use std::path::Path;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "rtf", "csv", "json", "yaml", "yml", "xml", "py", "js", "jsx", "ts", "tsx",
    "java", "kt", "dart", "go", "rs", "cpp", "c", "h", "cs", "html", "css",
];

/// Extract plain text from `path`. PDF pages are concatenated with `\n`;
/// text files are read as UTF-8 with lossy decoding of invalid bytes.
/// Unsupported extensions and empty results both fail with a typed error.
pub fn extract(path: &Path, content: &[u8]) -> Result<String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let text = if extension == "pdf" {
        extract_pdf(content)?
    } else if TEXT_EXTENSIONS.contains(&extension.as_str()) {
        String::from_utf8_lossy(content).into_owned()
    } else {
        return Err(PipelineError::validation(
            "extracting",
            format!("unsupported file type: .{extension}"),
        ));
    };

    if text.trim().is_empty() {
        return Err(PipelineError::validation(
            "extracting",
            format!("no readable text could be extracted from {}", path.display()),
        ));
    }

    Ok(text)
}

#[cfg(feature = "pdf")]
fn extract_pdf(content: &[u8]) -> Result<String> {
    // Page-extraction errors degrade to an empty page rather than failing
    // the whole document, mirroring the tolerant per-page behavior of the
    // system this was ported from.
    match pdf_extract::extract_text_from_mem(content) {
        Ok(text) => Ok(text),
        Err(e) => Err(PipelineError::validation("extracting", format!("PDF extraction failed: {e}"))),
    }
}

#[cfg(not(feature = "pdf"))]
fn extract_pdf(_content: &[u8]) -> Result<String> {
    Err(PipelineError::validation(
        "extracting",
        "PDF extraction is not enabled in this build (enable the `pdf` feature)",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extracts_plain_text_files() {
        let path = PathBuf::from("README.md");
        let text = extract(&path, b"# Title\n\nBody text.").unwrap();
        assert!(text.contains("Title"));
    }

    #[test]
    fn lossily_decodes_invalid_utf8() {
        let path = PathBuf::from("notes.txt");
        let invalid = vec![0x68, 0x69, 0xff, 0xfe];
        let text = extract(&path, &invalid).unwrap();
        assert!(text.starts_with("hi"));
    }

    #[test]
    fn rejects_unsupported_extensions() {
        let path = PathBuf::from("archive.bin");
        let err = extract(&path, b"binary-ish").unwrap_err();
        assert_eq!(err.category(), "validation_failure");
    }

    #[test]
    fn rejects_empty_content() {
        let path = PathBuf::from("empty.txt");
        let err = extract(&path, b"   \n  ").unwrap_err();
        assert_eq!(err.category(), "validation_failure");
    }
}
