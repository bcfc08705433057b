//! XLSX workbook extractor
//!
//! Produces one table per worksheet in workbook order. Shared strings, inline strings
//! and booleans are resolved; numbers and formula results are kept as stored.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::Cursor;
use zip::ZipArchive;

use super::docx::{has_entry_with_prefix, read_archive_file};
use super::{corrupt, failure_detail, Extraction, Extractor};
use crate::content::Table;
use crate::error::ConnectorError;

pub struct XlsxExtractor;

struct SheetEntry {
    name: String,
    relationship_id: String,
}

fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes().filter_map(|a| a.ok()).find_map(|attr| {
        if attr.key.local_name().as_ref() == local {
            Some(
                attr.unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned()),
            )
        } else {
            None
        }
    })
}

fn xml_error(part: &str, reader: &Reader<&[u8]>, err: quick_xml::Error) -> ConnectorError {
    corrupt(format!(
        "{}: XML parse error at byte {}: {}",
        part,
        reader.buffer_position(),
        err
    ))
}

fn parse_workbook(xml: &str) -> Result<Vec<SheetEntry>, ConnectorError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"sheet" => {
                if let (Some(name), Some(relationship_id)) = (attr_value(e, b"name"), attr_value(e, b"id")) {
                    sheets.push(SheetEntry {
                        name,
                        relationship_id,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("workbook", &reader, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Maps relationship ids to archive paths.
fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, ConnectorError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut targets = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr_value(e, b"Id"), attr_value(e, b"Target")) {
                    let path = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    };
                    targets.insert(id, path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("workbook relationships", &reader, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, ConnectorError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic runs (<rPh>) repeat the text in another script.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(ref e)) if in_text && !in_phonetic => {
                let text = e.unescape().map_err(|err| xml_error("shared strings", &reader, err))?;
                current.push_str(&text);
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("shared strings", &reader, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based index of column XFD, the last one a worksheet can address.
const MAX_COLUMN: usize = 16_383;

/// `"BC12"` -> 54 (zero-based column index). `None` when the reference has no
/// column letters; an error when it names a column past XFD.
fn column_index(reference: &str) -> Result<Option<usize>, ConnectorError> {
    let letters = reference.bytes().take_while(|c| c.is_ascii_alphabetic());
    let mut index = 0usize;
    let mut seen = false;
    for c in letters {
        seen = true;
        let digit = usize::from(c.to_ascii_uppercase() - b'A' + 1);
        index = index
            .checked_mul(26)
            .and_then(|i| i.checked_add(digit))
            .filter(|i| *i <= MAX_COLUMN + 1)
            .ok_or_else(|| corrupt(format!("cell reference '{}' is outside the sheet", reference)))?;
    }
    Ok(seen.then(|| index - 1))
}

struct CellState {
    column: Option<usize>,
    kind: Option<String>,
    value: String,
}

fn parse_sheet(xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>, ConnectorError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<CellState> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    let column = match attr_value(e, b"r") {
                        Some(reference) => column_index(&reference)?,
                        None => None,
                    };
                    cell = Some(CellState {
                        column,
                        kind: attr_value(e, b"t"),
                        value: String::new(),
                    })
                }
                // Inline strings keep their text in <is><t>; formulas in <f> are skipped.
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_value => {
                let text = e.unescape().map_err(|err| xml_error("worksheet", &reader, err))?;
                if let Some(cell) = cell.as_mut() {
                    cell.value.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(done) = cell.take() {
                        let value = resolve_cell(&done, shared);
                        let column = done.column.unwrap_or(row.len());
                        if column > MAX_COLUMN {
                            return Err(corrupt("row has more cells than a worksheet allows"));
                        }
                        if column >= row.len() {
                            row.resize(column + 1, String::new());
                        }
                        row[column] = value;
                    }
                }
                b"row" => {
                    while row.last().is_some_and(|v| v.is_empty()) {
                        row.pop();
                    }
                    if !row.is_empty() {
                        rows.push(std::mem::take(&mut row));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("worksheet", &reader, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn resolve_cell(cell: &CellState, shared: &[String]) -> String {
    match cell.kind.as_deref() {
        Some("s") => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|idx| shared.get(idx).cloned())
            .unwrap_or_default(),
        Some("b") => match cell.value.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        _ => cell.value.clone(),
    }
}

impl Extractor for XlsxExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ConnectorError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| corrupt(format!("not a valid XLSX package: {}", e)))?;

        let workbook = read_archive_file(&mut archive, "xl/workbook.xml")?
            .ok_or_else(|| corrupt("package has no xl/workbook.xml"))?;
        let sheets = parse_workbook(&workbook)?;
        let relationships = match read_archive_file(&mut archive, "xl/_rels/workbook.xml.rels")? {
            Some(xml) => parse_relationships(&xml)?,
            None => HashMap::new(),
        };
        let shared = match read_archive_file(&mut archive, "xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(&xml)?,
            None => Vec::new(),
        };

        let mut warnings = Vec::new();
        let mut tables = Vec::new();
        let mut sections = Vec::new();
        for (position, sheet) in sheets.iter().enumerate() {
            let part = relationships
                .get(&sheet.relationship_id)
                .cloned()
                .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", position + 1));
            let xml = match read_archive_file(&mut archive, &part)? {
                Some(xml) => xml,
                None => {
                    warnings.push(format!("sheet '{}' has no worksheet part and was skipped", sheet.name));
                    continue;
                }
            };
            let rows = match parse_sheet(&xml, &shared) {
                Ok(rows) => rows,
                Err(err) => {
                    warnings.push(format!("sheet '{}' could not be read: {}", sheet.name, failure_detail(&err)));
                    continue;
                }
            };

            let mut section = format!("## {}", sheet.name);
            for row in &rows {
                section.push('\n');
                section.push_str(&row.join(" | "));
            }
            sections.push(section);
            tables.push(Table::new(Some(sheet.name.clone()), rows));
        }

        if sheets.is_empty() {
            warnings.push("workbook lists no sheets".to_string());
        }
        if has_entry_with_prefix(&archive, "xl/vbaProject") {
            warnings.push("workbook contains macros, which were not extracted".to_string());
        }
        if has_entry_with_prefix(&archive, "xl/charts/") || has_entry_with_prefix(&archive, "xl/drawings/") {
            warnings.push("charts and drawings were skipped".to_string());
        }

        Ok(Extraction {
            text: sections.join("\n\n"),
            tables,
            warnings,
        })
    }
}
