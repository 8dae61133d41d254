#![cfg(not(tarpaulin_include))]

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::Result;
use crate::guard;
use crate::schema::Field;
use crate::store::RecordStore;

/// Convert a store to CSV text
///
/// The header row lists the schema columns in order followed by any extra
/// columns the source table carried. Records follow in ascending sequence
/// order. Fields containing commas, quotes or line breaks are quoted.
///
/// # Examples
/// ```
/// use vocab_editor::downloader::to_csv;
/// use vocab_editor::store::RecordStore;
///
/// let csv = to_csv(&RecordStore::default());
/// assert!(csv.starts_with("word,number,"));
/// ```
pub fn to_csv(store: &RecordStore) -> String {
    let mut csv_content = String::new();

    let headers = Field::ALL
        .iter()
        .map(|field| field.name())
        .chain(store.extra_headers().iter().map(String::as_str));
    push_row(&mut csv_content, headers);

    for record in store.sorted_records() {
        let values = Field::ALL
            .iter()
            .map(|&field| record.get(field))
            .chain(record.extras().iter().map(String::as_str));
        push_row(&mut csv_content, values);
    }

    csv_content
}

fn push_row<'a>(csv_content: &mut String, values: impl Iterator<Item = &'a str>) {
    for (c, value) in values.enumerate() {
        if c > 0 {
            csv_content.push(',');
        }
        if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r')
        {
            let escaped = value.replace('"', "\"\"");
            csv_content.push_str(&format!("\"{}\"", escaped));
        } else {
            csv_content.push_str(value);
        }
    }
    csv_content.push('\n');
}

/// Convert a store to XLSX format
///
/// Writes the same table [`to_csv`] produces into a single worksheet using
/// the rust_xlsxwriter library. Numeric sequence values are written as
/// numbers so spreadsheet applications sort them correctly.
#[cfg(feature = "web")]
pub fn to_xlsx(store: &RecordStore) -> std::result::Result<Vec<u8>, rust_xlsxwriter::XlsxError> {
    use crate::store::SequenceKey;
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    let headers = Field::ALL
        .iter()
        .map(|field| field.name())
        .chain(store.extra_headers().iter().map(String::as_str));
    for (c, header) in headers.enumerate() {
        worksheet.write_string(0, c as u16, header)?;
    }

    for (r, record) in store.sorted_records().iter().enumerate() {
        let row = (r + 1) as u32;
        for (c, &field) in Field::ALL.iter().enumerate() {
            match (field, record.sequence()) {
                (Field::Number, SequenceKey::Number(n)) => {
                    worksheet.write_number(row, c as u16, n)?;
                }
                _ => {
                    worksheet.write_string(row, c as u16, record.get(field))?;
                }
            }
        }
        for (e, extra) in record.extras().iter().enumerate() {
            worksheet.write_string(row, (Field::ALL.len() + e) as u16, extra.as_str())?;
        }
    }

    workbook.push_worksheet(worksheet);

    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}

/// Path for a download snapshot of `live`, distinct from the live file.
///
/// `words.csv` becomes `words.download-20240131T120000123.csv` in the same
/// directory, so the retention sweeper eventually removes it too.
pub fn snapshot_path(live: impl AsRef<Path>) -> PathBuf {
    let live = live.as_ref();
    let stem = live
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("table");
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    live.with_file_name(format!("{}.download-{}.csv", stem, stamp))
}

/// Write a sorted snapshot of `store` next to `live` and return its path.
pub fn write_snapshot(live: impl AsRef<Path>, store: &RecordStore) -> Result<PathBuf> {
    let path = snapshot_path(live);
    guard::write_bytes(&path, to_csv(store).as_bytes())?;
    Ok(path)
}
