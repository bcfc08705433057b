//! PDF document extractor
//!
//! Text is pulled page by page so one broken content stream costs a page, not the file.

use lopdf::Document;

use super::{corrupt, Extraction, Extractor};
use crate::error::ConnectorError;

pub struct PdfExtractor;

impl PdfExtractor {
    fn load_document(&self, bytes: &[u8]) -> Result<Document, ConnectorError> {
        Document::load_mem(bytes).map_err(|e| corrupt(format!("failed to load PDF: {}", e)))
    }
}

impl Extractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ConnectorError> {
        let doc = self.load_document(bytes)?;
        let mut warnings = Vec::new();

        if doc.trailer.get(b"Encrypt").is_ok() {
            warnings.push("document is encrypted; text may be incomplete".to_string());
        }

        let pages = doc.get_pages();
        if pages.is_empty() {
            warnings.push("document has no pages".to_string());
        }

        let mut texts = Vec::with_capacity(pages.len());
        let mut failed_pages = Vec::new();
        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        texts.push(text.to_string());
                    }
                }
                Err(e) => {
                    tracing::debug!(page = page_num, "pdf page extraction failed: {}", e);
                    failed_pages.push(*page_num);
                }
            }
        }

        for page_num in &failed_pages {
            warnings.push(format!("text on page {} could not be extracted", page_num));
        }
        if texts.is_empty() && !pages.is_empty() && failed_pages.len() < pages.len() {
            warnings.push("no extractable text found; the PDF may be scanned images".to_string());
        }

        Ok(Extraction {
            text: texts.join("\n\n"),
            tables: Vec::new(),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_rejected() {
        let err = PdfExtractor.extract(b"%PDF-1.7 but not really").unwrap_err();
        assert!(err.to_string().contains("failed to load PDF"));
    }

    #[test]
    fn non_pdf_bytes_are_rejected() {
        assert!(PdfExtractor.extract(b"PK\x03\x04 zip header").is_err());
    }
}
