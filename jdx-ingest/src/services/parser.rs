//! Delimited artifact parser
//!
//! Turns uploaded bytes into header-keyed raw rows. Only whole-artifact
//! problems are reported here (as `FormatError`); per-row problems such as
//! ragged rows are carried on the row for the validator to reject.

use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::models::{BatchSource, RawRow};

/// Candidate delimiters, in tie-break order
const DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Artifact cannot be parsed at all
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("artifact is empty")]
    Empty,

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("unreadable delimited data at record {record}: {message}")]
    Unreadable { record: u64, message: String },
}

/// Successfully parsed artifact
#[derive(Debug, Clone)]
pub struct ParsedArtifact {
    pub delimiter: u8,
    /// Normalized header names, in column order
    pub headers: Vec<String>,
    /// Rows in source order; index i is source row i + 1
    pub rows: Vec<RawRow>,
}

/// Parse an uploaded artifact
pub fn parse_artifact(bytes: &[u8], source: BatchSource) -> Result<ParsedArtifact, FormatError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(FormatError::Empty);
    }

    let text = std::str::from_utf8(bytes).map_err(|e| {
        FormatError::UnsupportedEncoding(format!(
            "artifact is not valid UTF-8 (first invalid byte at offset {})",
            e.valid_up_to()
        ))
    })?;

    let delimiter = sniff_delimiter(text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let raw_headers = reader
        .headers()
        .map_err(|e| FormatError::MalformedHeader(e.to_string()))?
        .clone();
    let headers = normalize_headers(raw_headers.iter())?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| FormatError::Unreadable {
            record: i as u64 + 1,
            message: e.to_string(),
        })?;

        let mut fields = BTreeMap::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            fields.insert(header.clone(), value.to_string());
        }

        let mut row = RawRow::new(source, fields);
        if record.len() < headers.len() {
            row.missing_columns = headers[record.len()..].to_vec();
        } else if record.len() > headers.len() {
            row.overflow = record.iter().skip(headers.len()).map(str::to_string).collect();
        }
        rows.push(row);
    }

    tracing::debug!(
        delimiter = %(delimiter as char).escape_default(),
        columns = headers.len(),
        rows = rows.len(),
        "Parsed artifact"
    );

    Ok(ParsedArtifact {
        delimiter,
        headers,
        rows,
    })
}

/// Lowercase, trim, and snake_case a header name
pub fn normalize_header(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' || ch == '.' || ch == '/' {
            pending_sep = true;
        }
    }
    out
}

fn normalize_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Result<Vec<String>, FormatError> {
    let mut headers = Vec::new();
    let mut seen = HashSet::new();

    for (position, name) in raw.enumerate() {
        let normalized = normalize_header(name);
        if normalized.is_empty() {
            return Err(FormatError::MalformedHeader(format!(
                "column {} has a blank name",
                position + 1
            )));
        }
        if !seen.insert(normalized.clone()) {
            return Err(FormatError::MalformedHeader(format!(
                "duplicate column '{}'",
                normalized
            )));
        }
        headers.push(normalized);
    }

    if headers.is_empty() {
        return Err(FormatError::MalformedHeader("no columns".to_string()));
    }

    Ok(headers)
}

/// Pick the candidate that occurs most often in the header line
fn sniff_delimiter(text: &str) -> u8 {
    let header_line = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    let mut best = (b',', 0usize);
    for candidate in DELIMITERS {
        let count = header_line.bytes().filter(|b| *b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}
