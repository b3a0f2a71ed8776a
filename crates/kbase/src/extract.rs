//! Plain-text extraction for importable files.
//!
//! | Extension | Reader |
//! |-----------|--------|
//! | `.txt`, `.md` | UTF-8 (BOM stripped, lossy fallback for other encodings) |
//! | `.docx` | `word/document.xml` text runs, one line per paragraph |

use std::io::Read;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Extract text from `path` based on its extension.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" | "markdown" => {
            let bytes = std::fs::read(path)?;
            Ok(decode_text(&bytes, path))
        }
        "docx" => {
            let bytes = std::fs::read(path)?;
            extract_docx(&bytes)
        }
        other => Err(ExtractError::UnsupportedType(if other.is_empty() {
            path.display().to_string()
        } else {
            format!(".{}", other)
        })),
    }
}

/// Decode text bytes as UTF-8, replacing invalid sequences with a warning.
pub fn decode_text(bytes: &[u8], origin: &Path) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            warn!(file = %origin.display(), "file is not valid UTF-8, invalid bytes replaced");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    paragraphs_from_document_xml(&doc_xml)
}

/// Concatenate `w:t` runs; closed `w:p` elements are separated by a blank line.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_docx_paragraphs_are_blank_line_separated() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>向量检索</w:t></w:r><w:r><w:t xml:space="preserve"> uses FAISS.</w:t></w:r></w:p>
<w:p><w:r><w:t>Second &amp; last.</w:t></w:r></w:p>
</w:body>
</w:document>"#;
        let text = extract_docx(&docx_bytes(xml)).unwrap();
        assert_eq!(text, "向量检索 uses FAISS.\n\nSecond & last.");
    }

    #[test]
    fn test_docx_paragraphs_segment_without_cross_paragraph_overlap() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>Installation guide</w:t></w:r></w:p>
<w:p><w:r><w:t>Run the installer. Accept the license. Reboot the machine.</w:t></w:r></w:p>
<w:p/>
<w:p><w:r><w:t>Troubleshooting</w:t></w:r></w:p>
<w:p><w:r><w:t>Check the logs. Contact support if needed.</w:t></w:r></w:p>
</w:body>
</w:document>"#;
        let text = extract_docx(&docx_bytes(xml)).unwrap();
        let chunks = kbase_core::segment::segment(&text, 60, 15).unwrap();
        assert_eq!(
            chunks,
            vec![
                "Installation guide",
                "Run the installer. Accept the license. Reboot the machine.",
                "Troubleshooting\nCheck the logs. Contact support if needed.",
            ]
        );
    }

    #[test]
    fn test_docx_without_document_xml() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        assert!(matches!(
            extract_docx(&cursor.into_inner()),
            Err(ExtractError::Docx(_))
        ));
    }

    #[test]
    fn test_not_a_zip() {
        assert!(extract_docx(b"plain text").is_err());
    }

    #[test]
    fn test_decode_strips_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("hello".as_bytes());
        assert_eq!(decode_text(&bytes, Path::new("a.txt")), "hello");
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let text = decode_text(&[b'a', 0xff, b'b'], Path::new("a.txt"));
        assert_eq!(text, "a\u{fffd}b");
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("image.png");
        std::fs::write(&path, b"png").unwrap();
        assert!(matches!(
            extract_file(&path),
            Err(ExtractError::UnsupportedType(t)) if t == ".png"
        ));
    }
}
