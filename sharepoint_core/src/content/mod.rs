//! Document content pipeline: resolve the item, decide the format, download the
//! bytes and turn them into text on the extraction pool.

pub mod extractors;
pub mod format;

pub use format::{detect_format, DocumentFormat, FormatTag};

use serde::Serialize;
use tracing::{debug, info};

use crate::cpu_pool::spawn_cpu;
use crate::error::ConnectorError;
use crate::graph::types::{content_path, DocumentMetadata, DriveItem};
use crate::graph::{GraphClient, Location};

/// A named grid of cell values in row order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Table {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
}

impl Table {
    pub fn new(name: Option<String>, rows: Vec<Vec<String>>) -> Self {
        let total_rows = rows.len();
        Self {
            name,
            rows,
            total_rows,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedContent {
    pub format: DocumentFormat,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<Table>,
    pub warnings: Vec<String>,
    pub word_count: usize,
    pub char_count: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_char_count: Option<usize>,
}

impl ExtractedContent {
    pub fn new(format: DocumentFormat, text: String, tables: Vec<Table>, warnings: Vec<String>) -> Self {
        let word_count = text.split_whitespace().count();
        let char_count = text.chars().count();
        Self {
            format,
            text,
            tables,
            warnings,
            word_count,
            char_count,
            truncated: false,
            original_char_count: None,
        }
    }

    /// Empty result for a payload that could not be parsed at all.
    pub fn unreadable(format: DocumentFormat, warning: String) -> Self {
        Self::new(format, String::new(), Vec::new(), vec![warning])
    }

    /// Caps text at `max_chars` characters and every table at `max_rows` rows.
    pub fn truncate(&mut self, max_chars: usize, max_rows: usize) {
        let (text, cut) = truncate_to_chars(&self.text, max_chars);
        if cut {
            self.original_char_count = Some(self.char_count);
            self.text = text;
            self.char_count = self.text.chars().count();
            self.word_count = self.text.split_whitespace().count();
            self.truncated = true;
        }
        for table in &mut self.tables {
            if table.rows.len() > max_rows {
                table.rows.truncate(max_rows);
                self.truncated = true;
            }
        }
    }
}

pub(crate) fn truncate_to_chars(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => (s[..end].to_string(), true),
        None => (s.to_string(), false),
    }
}

/// Metadata and content of one document, fetched together.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDocument {
    pub metadata: DocumentMetadata,
    pub content: ExtractedContent,
}

#[derive(Clone)]
pub struct ContentPipeline {
    graph: GraphClient,
}

impl ContentPipeline {
    pub fn new(graph: GraphClient) -> Self {
        Self { graph }
    }

    pub async fn get_content(&self, location: &Location) -> Result<ExtractedContent, ConnectorError> {
        Ok(self.get_document(location).await?.content)
    }

    /// Looks the item up before downloading anything, so missing items and
    /// unsupported formats fail without transferring content.
    pub async fn get_document(&self, location: &Location) -> Result<RetrievedDocument, ConnectorError> {
        let item: DriveItem = self
            .graph
            .get_json(&location.item_endpoint(), &[])
            .await
            .map_err(|err| match err {
                ConnectorError::NotFound(_) => ConnectorError::NotFound(format!(
                    "document '{}' does not exist",
                    location.display_path()
                )),
                other => other,
            })?;
        if item.is_folder() {
            return Err(ConnectorError::InvalidParams(format!(
                "'{}' is a folder, not a document",
                location.display_path()
            )));
        }

        let metadata = DocumentMetadata::from_item(&item, location.display_path(), &location.drive_id);
        let known_format = match (format::extension_of(&item.name), item.mime_type()) {
            (None, None) => None,
            _ => Some(detect_format(&item.name, item.mime_type())?),
        };

        let (bytes, served_type) = self
            .graph
            .get_bytes(&content_path(&location.drive_id, &item.id))
            .await?;
        let format = match known_format {
            Some(format) => format,
            None => detect_format(&item.name, served_type.as_deref())?,
        };
        debug!(
            size = bytes.len(),
            format = format.as_str(),
            queued = crate::cpu_pool::queue_depth(),
            "extracting {}",
            metadata.path
        );

        let content = spawn_cpu(move || Ok(extractors::extract(format, &bytes))).await?;
        info!(
            format = format.as_str(),
            chars = content.char_count,
            warnings = content.warnings.len(),
            "extracted {}",
            metadata.path
        );
        Ok(RetrievedDocument { metadata, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_chars("héllo", 2), ("hé".to_string(), true));
        assert_eq!(truncate_to_chars("abc", 3), ("abc".to_string(), false));
        assert_eq!(truncate_to_chars("abc", 0), (String::new(), true));
        assert_eq!(truncate_to_chars("", 0), (String::new(), false));
    }

    #[test]
    fn truncate_caps_text_and_rows() {
        let mut content = ExtractedContent::new(
            DocumentFormat::Csv,
            "one two three".to_string(),
            vec![Table::new(None, vec![vec!["a".into()]; 10])],
            vec![],
        );
        content.truncate(7, 3);
        assert!(content.truncated);
        assert_eq!(content.text, "one two");
        assert_eq!(content.original_char_count, Some(13));
        assert_eq!(content.word_count, 2);
        assert_eq!(content.tables[0].rows.len(), 3);
        assert_eq!(content.tables[0].total_rows, 10);
    }

    #[test]
    fn short_content_is_untouched() {
        let mut content =
            ExtractedContent::new(DocumentFormat::PlainText, "hi".into(), vec![], vec![]);
        content.truncate(100, 100);
        assert!(!content.truncated);
        assert_eq!(content.original_char_count, None);
    }
}
