//! Plain-text and zip exports of recognised text.
//!
//! Output names replace a `.png` extension (any case) with `.txt`. Within one
//! archive, names that collide get ` (2)`, ` (3)`, ... before the extension.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use chrono::{DateTime, Utc};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::record::ResultRecord;

pub const TEXT_MIME: &str = "text/plain; charset=utf-8";
pub const ZIP_MIME: &str = "application/zip";

/// A named text file ready to hand out.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlob {
    pub file_name: String,
    pub content: String,
}

/// `scan.png` / `scan.PNG` become `scan.txt`; other names get `.txt` appended.
pub fn text_file_name(image_name: &str) -> String {
    let stem = match image_name.len().checked_sub(4) {
        Some(split)
            if image_name.is_char_boundary(split)
                && image_name[split..].eq_ignore_ascii_case(".png") =>
        {
            &image_name[..split]
        }
        _ => image_name,
    };
    format!("{stem}.txt")
}

/// Name of the archive produced at `now`.
pub fn archive_file_name(now: DateTime<Utc>) -> String {
    format!("ocr-results-{}.zip", now.timestamp_millis())
}

pub fn export_one(record: &ResultRecord) -> TextBlob {
    TextBlob {
        file_name: text_file_name(&record.filename),
        content: record.text.clone(),
    }
}

/// Every record as one text, each under a `=== name ===` header.
pub fn concatenate_all(records: &[ResultRecord]) -> String {
    records
        .iter()
        .map(|r| format!("=== {} ===\n{}\n", r.filename, r.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Zip archive with one text entry per record.
pub fn export_all(records: &[ResultRecord]) -> Result<Vec<u8>, ExportError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (entry_name, record) in unique_entry_names(records).into_iter().zip(records) {
        zip.start_file(entry_name, options)?;
        zip.write_all(record.text.as_bytes())?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

/// Archive entry names in record order, with collisions suffixed.
pub fn unique_entry_names(records: &[ResultRecord]) -> Vec<String> {
    let mut taken = HashSet::new();
    records
        .iter()
        .map(|record| {
            let base = text_file_name(&record.filename);
            let mut candidate = base.clone();
            let mut n = 2;
            while !taken.insert(candidate.to_lowercase()) {
                let stem = base.strip_suffix(".txt").unwrap_or(&base);
                candidate = format!("{stem} ({n}).txt");
                n += 1;
            }
            candidate
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Failed to build zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to write archive entry: {0}")]
    Io(#[from] std::io::Error),
}
