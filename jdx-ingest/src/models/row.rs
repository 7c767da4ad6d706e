//! Row payloads: the opaque raw row and the validated judgment row

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::BatchSource;

/// Original row content, tagged by the source feed
///
/// Columns vary per feed, so cells are kept as a header → value map rather
/// than a fixed struct. Ragged rows keep their surplus cells in `overflow`
/// and name the header columns they lacked in `missing_columns`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawRow {
    pub source: BatchSource,
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overflow: Vec<String>,
}

impl RawRow {
    pub fn new(source: BatchSource, fields: BTreeMap<String, String>) -> Self {
        Self {
            source,
            fields,
            missing_columns: Vec::new(),
            overflow: Vec::new(),
        }
    }

    /// Trimmed, non-empty value of a column
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn is_ragged(&self) -> bool {
        !self.missing_columns.is_empty() || !self.overflow.is_empty()
    }
}

/// One violated rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub rule: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// Every rule a row violated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.violations.iter().map(|v| v.message.as_str()).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// A judgment row that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRow {
    pub case_number: String,
    pub plaintiff_name: Option<String>,
    pub defendant_name: Option<String>,
    pub judgment_amount: Option<Decimal>,
    pub judgment_date: Option<NaiveDate>,
    pub court: Option<String>,
    pub county: Option<String>,
    pub raw: RawRow,
}

impl ValidRow {
    /// SHA-256 over the normalized judgment fields
    ///
    /// Part of the stored row's natural key; identical content always
    /// hashes identically.
    pub fn content_hash(&self) -> String {
        let amount = self.judgment_amount.map(|a| a.normalize().to_string());
        let date = self.judgment_date.map(|d| d.format("%Y-%m-%d").to_string());
        let parts = [
            Some(self.case_number.as_str()),
            self.plaintiff_name.as_deref(),
            self.defendant_name.as_deref(),
            amount.as_deref(),
            date.as_deref(),
            self.court.as_deref(),
            self.county.as_deref(),
        ];

        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.unwrap_or("").as_bytes());
            hasher.update([0x1f]);
        }
        format!("{:x}", hasher.finalize())
    }
}
