//! Plain text decoder

use encoding_rs::{Encoding, WINDOWS_1252};

use super::{Extraction, Extractor};
use crate::error::ConnectorError;

pub struct PlainTextExtractor;

/// Best-effort decode: BOM-declared encoding, then strict UTF-8, then Windows-1252.
///
/// Returns the text plus a warning when the decode was lossy or guessed.
pub fn decode_text(bytes: &[u8]) -> (String, Option<String>) {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        let warning = had_errors.then(|| {
            format!(
                "some bytes were not valid {} and were replaced",
                encoding.name()
            )
        });
        return (text.into_owned(), warning);
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), None),
        Err(_) => {
            let (text, _, _) = WINDOWS_1252.decode(bytes);
            (
                text.into_owned(),
                Some("text is not valid UTF-8; decoded as Windows-1252".to_string()),
            )
        }
    }
}

impl Extractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ConnectorError> {
        let (text, warning) = decode_text(bytes);
        Ok(Extraction {
            text,
            tables: Vec::new(),
            warnings: warning.into_iter().collect(),
        })
    }
}
