//! Format detection by extension, then by content type.

use serde::Serialize;

use crate::error::ConnectorError;

/// Formats with a working extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Html,
    Csv,
    Tsv,
    Word,
    Pdf,
    Excel,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::PlainText => "plaintext",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Html => "html",
            DocumentFormat::Csv => "csv",
            DocumentFormat::Tsv => "tsv",
            DocumentFormat::Word => "word",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Excel => "excel",
        }
    }
}

/// Result of looking a name or content type up in the tables below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    Supported(DocumentFormat),
    /// Known file type without an extractor (legacy Office binaries, slides, ...).
    Unsupported(&'static str),
}

use DocumentFormat::*;
use FormatTag::{Supported as S, Unsupported as U};

const EXTENSIONS: &[(&str, FormatTag)] = &[
    ("txt", S(PlainText)),
    ("text", S(PlainText)),
    ("log", S(PlainText)),
    ("json", S(PlainText)),
    ("xml", S(PlainText)),
    ("yaml", S(PlainText)),
    ("yml", S(PlainText)),
    ("md", S(Markdown)),
    ("markdown", S(Markdown)),
    ("html", S(Html)),
    ("htm", S(Html)),
    ("csv", S(Csv)),
    ("tsv", S(Tsv)),
    ("docx", S(Word)),
    ("docm", S(Word)),
    ("pdf", S(Pdf)),
    ("xlsx", S(Excel)),
    ("xlsm", S(Excel)),
    ("doc", U("legacy Word (.doc)")),
    ("xls", U("legacy Excel (.xls)")),
    ("xlsb", U("binary Excel workbook (.xlsb)")),
    ("ppt", U("PowerPoint (.ppt)")),
    ("pptx", U("PowerPoint (.pptx)")),
    ("one", U("OneNote (.one)")),
    ("msg", U("Outlook message (.msg)")),
    ("zip", U("zip archive")),
    ("png", U("image (.png)")),
    ("jpg", U("image (.jpg)")),
    ("jpeg", U("image (.jpeg)")),
    ("gif", U("image (.gif)")),
    ("mp4", U("video (.mp4)")),
];

const CONTENT_TYPES: &[(&str, FormatTag)] = &[
    ("text/plain", S(PlainText)),
    ("text/markdown", S(Markdown)),
    ("text/html", S(Html)),
    ("text/csv", S(Csv)),
    ("text/tab-separated-values", S(Tsv)),
    ("application/json", S(PlainText)),
    ("application/xml", S(PlainText)),
    ("text/xml", S(PlainText)),
    ("application/pdf", S(Pdf)),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        S(Word),
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        S(Excel),
    ),
    ("application/msword", U("legacy Word (.doc)")),
    ("application/vnd.ms-excel", U("legacy Excel (.xls)")),
    ("application/vnd.ms-powerpoint", U("PowerPoint (.ppt)")),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        U("PowerPoint (.pptx)"),
    ),
];

pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains(['/', '\\', ' ']) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn lookup_extension(ext: &str) -> Option<FormatTag> {
    EXTENSIONS
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(ext))
        .map(|(_, tag)| *tag)
}

pub fn lookup_content_type(content_type: &str) -> Option<FormatTag> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(candidate, _)| *candidate == essence)
        .map(|(_, tag)| *tag)
        .or_else(|| essence.starts_with("text/").then_some(S(PlainText)))
}

/// Picks the extractor format for a document.
///
/// The file extension decides whenever the name has one; the content type is only
/// consulted for extension-less names.
pub fn detect_format(
    name: &str,
    content_type: Option<&str>,
) -> Result<DocumentFormat, ConnectorError> {
    if let Some(ext) = extension_of(name) {
        return match lookup_extension(&ext) {
            Some(S(format)) => Ok(format),
            Some(U(label)) => Err(ConnectorError::UnsupportedFormat(format!(
                "'{}' is a {} file, which cannot be converted to text",
                name, label
            ))),
            None => Err(ConnectorError::UnsupportedFormat(format!(
                "'{}' has an unrecognised extension '.{}'",
                name, ext
            ))),
        };
    }

    match content_type.and_then(lookup_content_type) {
        Some(S(format)) => Ok(format),
        Some(U(label)) => Err(ConnectorError::UnsupportedFormat(format!(
            "'{}' is a {} file, which cannot be converted to text",
            name, label
        ))),
        None => Err(ConnectorError::UnsupportedFormat(format!(
            "cannot determine the format of '{}' (no extension, content type {})",
            name,
            content_type.unwrap_or("unknown")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_wins_over_content_type() {
        assert_eq!(
            detect_format("budget.xlsx", Some("application/pdf")).unwrap(),
            DocumentFormat::Excel
        );
        assert_eq!(detect_format("notes.TXT", Some("application/octet-stream")).unwrap(), DocumentFormat::PlainText);
    }

    #[test]
    fn content_type_used_without_extension() {
        assert_eq!(
            detect_format("README", Some("text/markdown; charset=utf-8")).unwrap(),
            DocumentFormat::Markdown
        );
        assert_eq!(detect_format("export", Some("text/x-unknown")).unwrap(), DocumentFormat::PlainText);
        assert!(matches!(
            detect_format("blob", None),
            Err(ConnectorError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn unknown_and_unhandled_extensions_are_unsupported() {
        assert!(matches!(
            detect_format("report.xyz", Some("application/pdf")),
            Err(ConnectorError::UnsupportedFormat(msg)) if msg.contains(".xyz")
        ));
        assert!(matches!(
            detect_format("deck.pptx", None),
            Err(ConnectorError::UnsupportedFormat(msg)) if msg.contains("PowerPoint")
        ));
    }

    #[test]
    fn dotfiles_have_no_extension() {
        assert_eq!(extension_of(".profile"), None);
        assert_eq!(extension_of("archive.tar.GZ").as_deref(), Some("gz"));
    }
}
