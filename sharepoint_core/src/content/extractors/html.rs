//! HTML pages stored in a library are converted to Markdown.

use htmd::HtmlToMarkdown;

use super::plaintext::decode_text;
use super::{corrupt, Extraction, Extractor};
use crate::error::ConnectorError;

pub struct HtmlExtractor;

impl Extractor for HtmlExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ConnectorError> {
        let (html, decode_warning) = decode_text(bytes);
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec!["script", "style", "nav", "head", "noscript"])
            .build();
        let markdown = converter
            .convert(&html)
            .map_err(|e| corrupt(format!("HTML conversion failed: {}", e)))?;

        Ok(Extraction {
            text: markdown.trim().to_string(),
            tables: Vec::new(),
            warnings: decode_warning.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_and_navigation_are_dropped() {
        let html = r#"<html><head><title>t</title><style>p{}</style></head>
<body><nav>Home | About</nav><h1>Policy</h1><p>Keep <b>records</b>.</p>
<script>alert(1)</script></body></html>"#;
        let out = HtmlExtractor.extract(html.as_bytes()).unwrap();
        assert!(out.text.contains("Policy"));
        assert!(out.text.contains("**records**"));
        assert!(!out.text.contains("alert"));
        assert!(!out.text.contains("Home | About"));
        assert!(out.warnings.is_empty());
    }
}
