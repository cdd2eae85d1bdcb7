//! Table Validator
//!
//! Staged comparison of a candidate table against the golden table:
//! column identity & order, then row count, then normalized cell
//! equality. The first mismatching stage wins, but every mismatch within
//! that stage is collected so the diagnostic is actually useful.
//!
//! Normalization is explicit and total: a value either normalizes or it
//! is a mismatch, never a silent best-effort guess.

use crate::error::{AgentError, Result};
use crate::table::Table;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value semantics of a column, inferred from the golden table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Date,
    Numeric,
    Text,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Date => write!(f, "date (dd-mm-YYYY)"),
            ColumnKind::Numeric => write!(f, "numeric"),
            ColumnKind::Text => write!(f, "text"),
        }
    }
}

/// One divergent cell: `(row index, column name, expected, actual)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMismatch {
    pub row: usize,
    pub column: String,
    pub expected: String,
    pub actual: String,
}

/// Structured diff between candidate and golden, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableDiff {
    ColumnMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    RowCountMismatch {
        expected: usize,
        actual: usize,
    },
    CellMismatches(Vec<CellMismatch>),
}

impl fmt::Display for TableDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableDiff::ColumnMismatch { expected, actual } => write!(
                f,
                "column mismatch: expected [{}], got [{}]",
                expected.join(", "),
                actual.join(", ")
            ),
            TableDiff::RowCountMismatch { expected, actual } => {
                write!(f, "row count mismatch: expected {}, got {}", expected, actual)
            }
            TableDiff::CellMismatches(cells) => {
                write!(f, "{} cell mismatch(es):", cells.len())?;
                for c in cells {
                    write!(
                        f,
                        " [row {}, column '{}': expected '{}', got '{}']",
                        c.row, c.column, c.expected, c.actual
                    )?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Pass,
    Diff(TableDiff),
}

lazy_static! {
    static ref CURRENCY_NOISE: Regex = Regex::new(r"[$€£₹,\s]").expect("static regex");
}

/// Normalize a date string to `dd-mm-YYYY`. Day-first formats are tried
/// first; idempotent on already-normalized input.
pub fn normalize_date(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    const FORMATS: &[&str] = &[
        "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%d-%m-%y", "%d/%m/%y", "%Y-%m-%d", "%d %b %Y",
        "%d-%b-%Y", "%d %B %Y",
    ];
    for fmt in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date.format("%d-%m-%Y").to_string());
        }
    }
    // Timestamp renderings (e.g. a dataframe date column) carry a
    // midnight time component.
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.format("%d-%m-%Y").to_string());
    }
    None
}

/// Coerce a numeric string to f64, tolerating currency symbols, thousands
/// separators, surrounding whitespace, and accounting-style parentheses
/// for negatives.
pub fn normalize_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut cleaned = CURRENCY_NOISE.replace_all(trimmed, "").into_owned();
    let mut negative = false;
    if cleaned.starts_with('(') && cleaned.ends_with(')') {
        negative = true;
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }
    let parsed: f64 = cleaned.parse().ok()?;
    Some(if negative { -parsed } else { parsed })
}

const NUMERIC_EPSILON: f64 = 1e-9;

fn date_keyword(name: &str) -> bool {
    let n = name.to_lowercase();
    n.contains("date")
}

fn numeric_keyword(name: &str) -> bool {
    let n = name.to_lowercase();
    ["debit", "credit", "balance", "amount", "amt"]
        .iter()
        .any(|k| n.contains(k))
}

/// Infer per-column value semantics from the golden table. Column-name
/// keywords decide first (date / debit / credit / balance / amount, the
/// same vocabulary bank statements use); otherwise a column is date-typed
/// when every non-empty cell parses as a date, numeric when every
/// non-empty cell coerces, else text.
pub fn infer_kinds(golden: &Table) -> Vec<ColumnKind> {
    golden
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if date_keyword(name) {
                return ColumnKind::Date;
            }
            if numeric_keyword(name) {
                return ColumnKind::Numeric;
            }
            let non_empty: Vec<&str> = golden
                .column_values(idx)
                .filter(|v| !v.trim().is_empty())
                .collect();
            if non_empty.is_empty() {
                return ColumnKind::Text;
            }
            if non_empty.iter().all(|v| normalize_date(v).is_some()) {
                return ColumnKind::Date;
            }
            if non_empty.iter().all(|v| normalize_number(v).is_some()) {
                return ColumnKind::Numeric;
            }
            ColumnKind::Text
        })
        .collect()
}

/// Compare a candidate table against the golden baseline.
///
/// Never fails on candidate data-shape problems: those become a
/// structured diff. An unparseable golden cell is the loader's bug and
/// surfaces as `SchemaInvalid`.
pub fn compare(candidate: &Table, golden: &Table, kinds: &[ColumnKind]) -> Result<ValidationResult> {
    // Stage 1: column identity & order, strict.
    if candidate.columns() != golden.columns() {
        return Ok(ValidationResult::Diff(TableDiff::ColumnMismatch {
            expected: golden.columns().to_vec(),
            actual: candidate.columns().to_vec(),
        }));
    }

    // Stage 2: row count.
    if candidate.row_count() != golden.row_count() {
        return Ok(ValidationResult::Diff(TableDiff::RowCountMismatch {
            expected: golden.row_count(),
            actual: candidate.row_count(),
        }));
    }

    // Stage 3: cell equality under per-column normalization.
    let mut mismatches = Vec::new();
    for row in 0..golden.row_count() {
        for (col, name) in golden.columns().iter().enumerate() {
            let expected = golden.cell(row, col).unwrap_or("");
            let actual = candidate.cell(row, col).unwrap_or("");
            let equal = match kinds.get(col).copied().unwrap_or(ColumnKind::Text) {
                ColumnKind::Date => cells_equal_as_dates(expected, actual, row, name)?,
                ColumnKind::Numeric => cells_equal_as_numbers(expected, actual, row, name)?,
                ColumnKind::Text => expected.trim() == actual.trim(),
            };
            if !equal {
                mismatches.push(CellMismatch {
                    row,
                    column: name.clone(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
    }

    if mismatches.is_empty() {
        Ok(ValidationResult::Pass)
    } else {
        Ok(ValidationResult::Diff(TableDiff::CellMismatches(mismatches)))
    }
}

fn cells_equal_as_dates(expected: &str, actual: &str, row: usize, column: &str) -> Result<bool> {
    if expected.trim().is_empty() {
        return Ok(actual.trim().is_empty());
    }
    let expected_norm = normalize_date(expected).ok_or_else(|| {
        AgentError::SchemaInvalid(format!(
            "golden cell at row {}, column '{}' is not a parseable date: '{}'",
            row, column, expected
        ))
    })?;
    Ok(match normalize_date(actual) {
        Some(actual_norm) => expected_norm == actual_norm,
        None => false,
    })
}

fn cells_equal_as_numbers(expected: &str, actual: &str, row: usize, column: &str) -> Result<bool> {
    if expected.trim().is_empty() {
        return Ok(actual.trim().is_empty());
    }
    let expected_norm = normalize_number(expected).ok_or_else(|| {
        AgentError::SchemaInvalid(format!(
            "golden cell at row {}, column '{}' is not a coercible number: '{}'",
            row, column, expected
        ))
    })?;
    Ok(match normalize_number(actual) {
        Some(actual_norm) => (expected_norm - actual_norm).abs() <= NUMERIC_EPSILON,
        None => false,
    })
}
