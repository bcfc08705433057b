mod csv;
mod docx;
mod html;
mod pdf;
mod plaintext;
mod xlsx;

pub use self::csv::CsvExtractor;
pub use docx::DocxExtractor;
pub use html::HtmlExtractor;
pub use pdf::PdfExtractor;
pub use plaintext::{decode_text, PlainTextExtractor};
pub use xlsx::XlsxExtractor;

use tracing::warn;

use super::{DocumentFormat, ExtractedContent, Table};
use crate::error::ConnectorError;

/// Raw output of one extractor before it is wrapped into [`ExtractedContent`].
#[derive(Debug, Default)]
pub struct Extraction {
    pub text: String,
    pub tables: Vec<Table>,
    pub warnings: Vec<String>,
}

/// Trait for in-memory document extractors.
///
/// Implementations return `Err` only when the payload is unreadable as a whole;
/// elements they skip go into [`Extraction::warnings`].
pub trait Extractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ConnectorError>;
}

pub(crate) fn corrupt(message: impl Into<String>) -> ConnectorError {
    ConnectorError::InternalError(message.into())
}

/// Extractor failures carry their detail in `InternalError`; anything else keeps
/// its public message.
pub(crate) fn failure_detail(err: &ConnectorError) -> String {
    match err {
        ConnectorError::InternalError(msg) => msg.clone(),
        other => other.public_message(),
    }
}

pub fn extractor_for(format: DocumentFormat) -> Box<dyn Extractor> {
    match format {
        DocumentFormat::PlainText | DocumentFormat::Markdown => Box::new(PlainTextExtractor),
        DocumentFormat::Html => Box::new(HtmlExtractor),
        DocumentFormat::Csv => Box::new(CsvExtractor::new(',')),
        DocumentFormat::Tsv => Box::new(CsvExtractor::new('\t')),
        DocumentFormat::Word => Box::new(DocxExtractor),
        DocumentFormat::Pdf => Box::new(PdfExtractor),
        DocumentFormat::Excel => Box::new(XlsxExtractor),
    }
}

/// Runs the extractor for `format`. Never fails: a corrupt payload yields empty
/// text and a warning.
pub fn extract(format: DocumentFormat, bytes: &[u8]) -> ExtractedContent {
    if bytes.is_empty() {
        return ExtractedContent::unreadable(format, "document is empty".to_string());
    }
    match extractor_for(format).extract(bytes) {
        Ok(extraction) => ExtractedContent::new(
            format,
            extraction.text,
            extraction.tables,
            extraction.warnings,
        ),
        Err(err) => {
            warn!(format = format.as_str(), "extraction failed: {}", err);
            let detail = failure_detail(&err);
            ExtractedContent::unreadable(
                format,
                format!("content could not be read as {}: {}", format.as_str(), detail),
            )
        }
    }
}
