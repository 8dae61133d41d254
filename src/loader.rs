use std::fs;
use std::path::Path;

use crate::error::{EditorError, Result};

/// A delimited table as read from disk, before any schema is applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// True if the path names a table format the editor accepts (`.csv`, any case).
pub fn is_supported(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Read a CSV file into a [`RawTable`].
///
/// Unreadable files, invalid UTF-8 and malformed rows are all reported as
/// [`EditorError::Load`] so callers can tell a corrupt file apart from lock
/// contention.
///
/// # Examples
/// ```no_run
/// use vocab_editor::loader::read_table;
///
/// match read_table("words.csv") {
///     Ok(table) => println!("{} columns, {} rows", table.headers.len(), table.rows.len()),
///     Err(e) => eprintln!("Error loading CSV: {}", e),
/// }
/// ```
pub fn read_table(path: impl AsRef<Path>) -> Result<RawTable> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| EditorError::load(path, e.to_string()))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| EditorError::load(path, "file is not valid UTF-8 text"))?;
    parse_csv(&text).map_err(|reason| EditorError::load(path, reason))
}

/// Parse CSV text into a header row and data rows.
///
/// Quoted fields may contain commas, doubled quotes and line breaks. Blank
/// lines are skipped, short rows are padded to the header width.
///
/// # Returns
/// * `Ok(RawTable)` - The header row and data rows
/// * `Err(String)` - What is wrong and on which line, e.g. a row wider than
///   the header or an unterminated quote
pub fn parse_csv(text: &str) -> std::result::Result<RawTable, String> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = split_records(text)?.into_iter();

    let Some((_, headers)) = records.next() else {
        return Ok(RawTable::default());
    };
    let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    for (line, mut row) in records {
        if row.len() > headers.len() {
            return Err(format!(
                "line {} has {} fields, header has {}",
                line,
                row.len(),
                headers.len()
            ));
        }
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    Ok(RawTable { headers, rows })
}

// Split text into records, each tagged with the line it started on.
fn split_records(text: &str) -> std::result::Result<Vec<(usize, Vec<String>)>, String> {
    let mut records = Vec::new();
    let mut current_row: Vec<String> = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut was_quoted = false;
    let mut line = 1;
    let mut row_start = 1;
    let mut quote_start = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    // Doubled quote inside a quoted field
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current_field.is_empty() && !was_quoted => {
                in_quotes = true;
                was_quoted = true;
                quote_start = line;
            }
            ',' if !in_quotes => {
                current_row.push(std::mem::take(&mut current_field));
                was_quoted = false;
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                current_row.push(std::mem::take(&mut current_field));
                if !is_blank(&current_row, was_quoted) {
                    records.push((row_start, std::mem::take(&mut current_row)));
                }
                current_row.clear();
                was_quoted = false;
                line += 1;
                row_start = line;
            }
            _ => {
                if c == '\n' {
                    line += 1;
                }
                current_field.push(c);
            }
        }
    }

    if in_quotes {
        return Err(format!("unterminated quoted field starting on line {}", quote_start));
    }

    // Last record when the text does not end with a newline
    current_row.push(current_field);
    if !is_blank(&current_row, was_quoted) {
        records.push((row_start, current_row));
    }

    Ok(records)
}

fn is_blank(row: &[String], was_quoted: bool) -> bool {
    !was_quoted && row.len() == 1 && row[0].trim().is_empty()
}
