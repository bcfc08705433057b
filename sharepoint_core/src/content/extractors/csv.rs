//! Delimited text (CSV/TSV) with RFC 4180 quoting.

use super::plaintext::decode_text;
use super::{Extraction, Extractor};
use crate::content::Table;
use crate::error::ConnectorError;

pub struct CsvExtractor {
    delimiter: char,
}

impl CsvExtractor {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }
}

#[derive(Debug, Default)]
struct ParsedRecords {
    rows: Vec<Vec<String>>,
    unterminated_quote: bool,
}

fn parse_records(text: &str, delimiter: char) -> ParsedRecords {
    let mut parsed = ParsedRecords::default();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' if !field_started => {
                in_quotes = true;
                field_started = true;
            }
            c if c == delimiter => {
                row.push(std::mem::take(&mut field));
                field_started = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                row.push(std::mem::take(&mut field));
                field_started = false;
                push_row(&mut parsed.rows, std::mem::take(&mut row));
            }
            other => {
                field.push(other);
                field_started = true;
            }
        }
    }

    if in_quotes {
        parsed.unterminated_quote = true;
    }
    if field_started || !field.is_empty() || !row.is_empty() {
        row.push(field);
        push_row(&mut parsed.rows, row);
    }
    parsed
}

// Blank lines carry no record.
fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    if row.len() == 1 && row[0].is_empty() {
        return;
    }
    rows.push(row);
}

impl Extractor for CsvExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ConnectorError> {
        let (text, decode_warning) = decode_text(bytes);
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
        let parsed = parse_records(text, self.delimiter);

        let mut warnings: Vec<String> = decode_warning.into_iter().collect();
        if parsed.unterminated_quote {
            warnings.push("a quoted field was not closed before the end of the file".to_string());
        }
        if let Some(first) = parsed.rows.first() {
            let width = first.len();
            let ragged = parsed.rows.iter().filter(|r| r.len() != width).count();
            if ragged > 0 {
                warnings.push(format!(
                    "{} row(s) have a different number of columns than the header",
                    ragged
                ));
            }
        }

        let normalized = parsed
            .rows
            .iter()
            .map(|row| row.join("\t"))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Extraction {
            text: normalized,
            tables: vec![Table::new(None, parsed.rows)],
            warnings,
        })
    }
}
