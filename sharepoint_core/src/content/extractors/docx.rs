//! DOCX document extractor
//!
//! Walks `word/document.xml` and emits one line per paragraph in document order.
//! Only `w:t` runs contribute text, so field codes and deleted revisions stay out.
//! Embedded objects, pictures and macros are counted and reported as warnings.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use zip::ZipArchive;

use super::{corrupt, Extraction, Extractor};
use crate::error::ConnectorError;

pub struct DocxExtractor;

#[derive(Debug, Default)]
struct SkippedElements {
    objects: usize,
    drawings: usize,
}

/// Largest decompressed size accepted for a single package part.
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;

pub(crate) fn read_archive_file(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<String>, ConnectorError> {
    read_archive_file_capped(archive, name, MAX_PART_BYTES)
}

fn read_archive_file_capped(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
    limit: u64,
) -> Result<Option<String>, ConnectorError> {
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(corrupt(format!("cannot open {}: {}", name, e))),
    };
    // The declared size can lie, so the cap is enforced on what is actually inflated.
    let mut content = String::new();
    file.take(limit + 1)
        .read_to_string(&mut content)
        .map_err(|e| corrupt(format!("cannot read {}: {}", name, e)))?;
    if content.len() as u64 > limit {
        return Err(corrupt(format!(
            "{} expands past {} bytes and was not read",
            name, limit
        )));
    }
    Ok(Some(content))
}

pub(crate) fn has_entry_with_prefix(archive: &ZipArchive<Cursor<&[u8]>>, prefix: &str) -> bool {
    archive.file_names().any(|name| name.starts_with(prefix))
}

fn parse_document(xml: &str) -> Result<(Vec<String>, SkippedElements), ConnectorError> {
    let mut reader = Reader::from_str(xml);

    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut skipped = SkippedElements::default();
    let mut current = String::new();
    let mut paragraph_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"p" => {
                    if paragraph_depth == 0 {
                        current.clear();
                    }
                    paragraph_depth += 1;
                }
                b"t" => in_text = true,
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                b"object" | b"oleObject" | b"control" => skipped.objects += 1,
                b"drawing" | b"pict" => skipped.drawings += 1,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                b"object" | b"oleObject" | b"control" => skipped.objects += 1,
                b"drawing" | b"pict" => skipped.drawings += 1,
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                if in_text && paragraph_depth > 0 {
                    let text = e
                        .unescape()
                        .map_err(|err| corrupt(format!("bad text run: {}", err)))?;
                    current.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    paragraph_depth = paragraph_depth.saturating_sub(1);
                    if paragraph_depth == 0 {
                        let text = current.trim_end();
                        if !text.trim().is_empty() {
                            paragraphs.push(text.to_string());
                        }
                        current.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(corrupt(format!(
                    "XML parse error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok((paragraphs, skipped))
}

impl Extractor for DocxExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ConnectorError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| corrupt(format!("not a valid DOCX package: {}", e)))?;
        let document = read_archive_file(&mut archive, "word/document.xml")?
            .ok_or_else(|| corrupt("package has no word/document.xml"))?;
        let (paragraphs, skipped) = parse_document(&document)?;

        let mut warnings = Vec::new();
        if skipped.objects > 0 {
            warnings.push(format!("skipped {} embedded object(s)", skipped.objects));
        }
        if skipped.drawings > 0 {
            warnings.push(format!("skipped {} image(s) or drawing(s)", skipped.drawings));
        }
        if has_entry_with_prefix(&archive, "word/vbaProject") {
            warnings.push("document contains macros, which were not extracted".to_string());
        }
        if has_entry_with_prefix(&archive, "word/embeddings/") && skipped.objects == 0 {
            warnings.push("document has embedded files, which were not extracted".to_string());
        }

        Ok(Extraction {
            text: paragraphs.join("\n"),
            tables: Vec::new(),
            warnings,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    pub(crate) fn build_package(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Quarterly</w:t></w:r><w:r><w:t xml:space="preserve"> review</w:t></w:r></w:p>
    <w:p><w:r><w:t>Revenue</w:t><w:tab/><w:t>up &amp; right</w:t></w:r></w:p>
    <w:p><w:r><w:instrText>PAGE</w:instrText></w:r></w:p>
    <w:p><w:r><w:drawing><wp:inline/></w:drawing></w:r><w:r><w:object/></w:r><w:r><w:t>After picture</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    #[test]
    fn paragraphs_in_order_with_tabs_and_spacing() {
        let bytes = build_package(&[("word/document.xml", DOCUMENT)]);
        let out = DocxExtractor.extract(&bytes).unwrap();
        assert_eq!(
            out.text,
            "Quarterly review\nRevenue\tup & right\nAfter picture"
        );
        assert_eq!(
            out.warnings,
            vec![
                "skipped 1 embedded object(s)".to_string(),
                "skipped 1 image(s) or drawing(s)".to_string()
            ]
        );
    }

    #[test]
    fn macros_are_reported() {
        let bytes = build_package(&[
            ("word/document.xml", DOCUMENT),
            ("word/vbaProject.bin", "binary"),
        ]);
        let out = DocxExtractor.extract(&bytes).unwrap();
        assert!(out.warnings.iter().any(|w| w.contains("macros")));
    }

    #[test]
    fn missing_body_is_an_error() {
        let bytes = build_package(&[("docProps/core.xml", "<x/>")]);
        assert!(DocxExtractor.extract(&bytes).is_err());
    }

    #[test]
    fn oversized_parts_are_refused() {
        let body = "a".repeat(4096);
        let bytes = build_package(&[("word/document.xml", body.as_str())]);
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();

        let err = read_archive_file_capped(&mut archive, "word/document.xml", 1024).unwrap_err();
        assert!(super::super::failure_detail(&err).contains("expands past 1024 bytes"));

        let whole = read_archive_file_capped(&mut archive, "word/document.xml", 4096).unwrap();
        assert_eq!(whole.map(|s| s.len()), Some(4096));
        assert!(read_archive_file_capped(&mut archive, "missing.xml", 10).unwrap().is_none());
    }
}
