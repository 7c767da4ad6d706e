//! Row validation
//!
//! Validation is a pure function of the raw row and the rules for its source.
//! Rules are looked up in a table keyed by source (required fields plus
//! header aliases), seeded with built-in defaults and overridable from the
//! `[sources.<tag>]` config tables.

use chrono::NaiveDate;
use jdx_common::config::SourceRuleConfig;
use jdx_common::{Error, Result};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use crate::models::{BatchSource, FieldViolation, RawRow, ValidRow, ValidationError};

pub const CASE_NUMBER: &str = "case_number";
pub const PLAINTIFF_NAME: &str = "plaintiff_name";
pub const DEFENDANT_NAME: &str = "defendant_name";
pub const JUDGMENT_AMOUNT: &str = "judgment_amount";
pub const JUDGMENT_DATE: &str = "judgment_date";
pub const COURT: &str = "court";
pub const COUNTY: &str = "county";

/// Canonical judgment fields
pub const CANONICAL_FIELDS: [&str; 7] = [
    CASE_NUMBER,
    PLAINTIFF_NAME,
    DEFENDANT_NAME,
    JUDGMENT_AMOUNT,
    JUDGMENT_DATE,
    COURT,
    COUNTY,
];

// Two-digit years first: %Y also accepts "24" as year 24
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d", "%d-%b-%Y"];

/// Validation rules for one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRules {
    /// Canonical fields that must be present and non-empty
    pub required_fields: Vec<String>,
    /// Normalized header → canonical field
    pub column_aliases: BTreeMap<String, String>,
}

impl SourceRules {
    fn new(required: &[&str], aliases: &[(&str, &str)]) -> Self {
        Self {
            required_fields: required.iter().map(|s| s.to_string()).collect(),
            column_aliases: aliases
                .iter()
                .map(|(alias, field)| (alias.to_string(), field.to_string()))
                .collect(),
        }
    }

    /// Built-in rules per source
    pub fn builtin(source: BatchSource) -> Self {
        match source {
            BatchSource::ExportFormatA => Self::new(
                &[CASE_NUMBER, DEFENDANT_NAME, JUDGMENT_AMOUNT, JUDGMENT_DATE],
                &[
                    ("case_no", CASE_NUMBER),
                    ("case_id", CASE_NUMBER),
                    ("debtor", DEFENDANT_NAME),
                    ("debtor_name", DEFENDANT_NAME),
                    ("creditor", PLAINTIFF_NAME),
                    ("amount", JUDGMENT_AMOUNT),
                    ("date", JUDGMENT_DATE),
                ],
            ),
            BatchSource::ExportFormatB => Self::new(
                &[CASE_NUMBER, PLAINTIFF_NAME, DEFENDANT_NAME, JUDGMENT_AMOUNT],
                &[
                    ("index_number", CASE_NUMBER),
                    ("creditor", PLAINTIFF_NAME),
                    ("creditor_name", PLAINTIFF_NAME),
                    ("debtor_name", DEFENDANT_NAME),
                    ("total_amount", JUDGMENT_AMOUNT),
                    ("entry_date", JUDGMENT_DATE),
                    ("county_name", COUNTY),
                ],
            ),
            BatchSource::CourtDump => Self::new(
                &[CASE_NUMBER, COURT, JUDGMENT_DATE],
                &[
                    ("docket_number", CASE_NUMBER),
                    ("docket", CASE_NUMBER),
                    ("court_name", COURT),
                    ("filed_date", JUDGMENT_DATE),
                    ("award_amount", JUDGMENT_AMOUNT),
                    ("party_plaintiff", PLAINTIFF_NAME),
                    ("party_defendant", DEFENDANT_NAME),
                ],
            ),
            BatchSource::Manual => Self::new(&[CASE_NUMBER], &[]),
        }
    }

    /// Apply a config override on top of these rules
    pub fn with_override(mut self, config: &SourceRuleConfig) -> Self {
        if let Some(required) = &config.required_fields {
            self.required_fields = required.clone();
        }
        for (alias, field) in &config.column_aliases {
            self.column_aliases.insert(alias.clone(), field.clone());
        }
        self
    }

    /// Value of a canonical field, looking through aliases
    ///
    /// The canonical column wins when both it and an alias are present.
    fn lookup<'a>(&self, row: &'a RawRow, field: &str) -> Option<&'a str> {
        row.get(field).or_else(|| {
            self.column_aliases
                .iter()
                .filter(|(_, target)| target.as_str() == field)
                .find_map(|(alias, _)| row.get(alias))
        })
    }
}

/// Source → rules table
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: HashMap<BatchSource, SourceRules>,
}

impl RuleTable {
    pub fn builtin() -> Self {
        Self {
            rules: BatchSource::ALL
                .into_iter()
                .map(|source| (source, SourceRules::builtin(source)))
                .collect(),
        }
    }

    /// Built-in rules with `[sources.<tag>]` overrides applied
    pub fn from_config(overrides: &BTreeMap<String, SourceRuleConfig>) -> Result<Self> {
        let mut table = Self::builtin();
        for (tag, config) in overrides {
            let source = BatchSource::from_str(tag).map_err(Error::Config)?;
            for field in config
                .required_fields
                .iter()
                .flatten()
                .chain(config.column_aliases.values())
            {
                if !CANONICAL_FIELDS.contains(&field.as_str()) {
                    return Err(Error::Config(format!(
                        "[sources.{}] names unknown field '{}'",
                        tag, field
                    )));
                }
            }
            let rules = table.get(source).clone().with_override(config);
            table.rules.insert(source, rules);
        }
        Ok(table)
    }

    pub fn get(&self, source: BatchSource) -> &SourceRules {
        // Every source is seeded by builtin()
        &self.rules[&source]
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Validate one raw row against its source's rules
///
/// Every rule is evaluated; all violations are returned together.
pub fn validate(row: &RawRow, rules: &SourceRules) -> std::result::Result<ValidRow, ValidationError> {
    let mut violations = Vec::new();

    if !row.missing_columns.is_empty() || !row.overflow.is_empty() {
        let expected = row.fields.len() + row.missing_columns.len();
        let found = row.fields.len() + row.overflow.len();
        violations.push(FieldViolation::new(
            "*",
            "column_count",
            format!("column count mismatch: expected {}, found {}", expected, found),
        ));
    }

    let mut required: Vec<&str> = rules.required_fields.iter().map(String::as_str).collect();
    if !required.contains(&CASE_NUMBER) {
        required.insert(0, CASE_NUMBER);
    }
    for field in &required {
        if rules.lookup(row, field).is_none() {
            violations.push(FieldViolation::new(
                *field,
                "required",
                format!("missing required field: {}", field),
            ));
        }
    }

    let judgment_amount = match rules.lookup(row, JUDGMENT_AMOUNT) {
        Some(value) => match parse_amount(value) {
            Ok(amount) => Some(amount),
            Err(message) => {
                violations.push(FieldViolation::new(JUDGMENT_AMOUNT, "amount", message));
                None
            }
        },
        None => None,
    };

    let judgment_date = match rules.lookup(row, JUDGMENT_DATE) {
        Some(value) => match parse_date(value) {
            Some(date) => Some(date),
            None => {
                violations.push(FieldViolation::new(
                    JUDGMENT_DATE,
                    "date",
                    format!("invalid date in {}: '{}'", JUDGMENT_DATE, value),
                ));
                None
            }
        },
        None => None,
    };

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }

    let text = |field: &str| rules.lookup(row, field).map(str::to_string);

    Ok(ValidRow {
        case_number: text(CASE_NUMBER).unwrap_or_default(),
        plaintiff_name: text(PLAINTIFF_NAME),
        defendant_name: text(DEFENDANT_NAME),
        judgment_amount,
        judgment_date,
        court: text(COURT),
        county: text(COUNTY),
        raw: row.clone(),
    })
}

/// Row paired with its validation outcome
pub type Validated = (RawRow, std::result::Result<ValidRow, ValidationError>);

/// Validate rows on `workers` blocking tasks, preserving input order
pub async fn validate_all(rows: Vec<RawRow>, rules: SourceRules, workers: usize) -> Result<Vec<Validated>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let workers = workers.max(1);
    let chunk_size = rows.len().div_ceil(workers);
    let rules = Arc::new(rules);

    let mut handles = Vec::with_capacity(workers);
    let mut remaining = rows;
    while !remaining.is_empty() {
        let rest = remaining.split_off(chunk_size.min(remaining.len()));
        let chunk = std::mem::replace(&mut remaining, rest);
        let rules = Arc::clone(&rules);
        handles.push(tokio::task::spawn_blocking(move || {
            chunk
                .into_iter()
                .map(|row| {
                    let outcome = validate(&row, &rules);
                    (row, outcome)
                })
                .collect::<Vec<_>>()
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        let chunk = handle
            .await
            .map_err(|e| Error::Internal(format!("Validation task failed: {}", e)))?;
        results.extend(chunk);
    }

    Ok(results)
}

/// Parse a non-negative monetary amount ("$1,500.00", " 250 ")
fn parse_amount(value: &str) -> std::result::Result<Decimal, String> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();

    if cleaned.starts_with('(') && cleaned.ends_with(')') {
        return Err(format!("negative amount in {}: '{}'", JUDGMENT_AMOUNT, value));
    }

    match Decimal::from_str(&cleaned) {
        Ok(amount) if amount.is_sign_negative() && !amount.is_zero() => {
            Err(format!("negative amount in {}: '{}'", JUDGMENT_AMOUNT, value))
        }
        Ok(amount) => Ok(amount),
        Err(_) => Err(format!("invalid amount in {}: '{}'", JUDGMENT_AMOUNT, value)),
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}
