//! Golden Dataset Loader
//!
//! Resolves the target PDF and reference CSV under a data directory and
//! loads the golden table. Everything here is read-only and deterministic:
//! discovery globs are sorted, and the same inputs always yield the same
//! `GoldenDataset`.

use crate::error::{AgentError, Result};
use crate::table::Table;
use crate::validate::{self, ColumnKind};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Immutable per-run baseline: target key, input PDF, golden table and
/// its inferred column kinds.
#[derive(Debug, Clone)]
pub struct GoldenDataset {
    pub target: String,
    pub pdf_path: PathBuf,
    pub csv_path: PathBuf,
    golden: Table,
    kinds: Vec<ColumnKind>,
}

impl GoldenDataset {
    /// Load the dataset for `target`. The data directory defaults to
    /// `data/<target>` unless overridden.
    pub fn load(target: &str, data_dir: Option<&Path>) -> Result<Self> {
        let base = match data_dir {
            Some(dir) => dir.to_path_buf(),
            None => Path::new("data").join(target),
        };

        let pdf_path = find_first(&base, "pdf")?.ok_or_else(|| {
            AgentError::DatasetNotFound(format!("no PDF found under {}", base.display()))
        })?;

        let preferred = base.join("result.csv");
        let csv_path = if preferred.exists() {
            preferred
        } else {
            find_first(&base, "csv")?.ok_or_else(|| {
                AgentError::DatasetNotFound(format!("no CSV found under {}", base.display()))
            })?
        };

        let golden = Table::from_csv_path(&csv_path).map_err(|e| {
            AgentError::SchemaInvalid(format!(
                "reference CSV {} is not a valid table: {}",
                csv_path.display(),
                e
            ))
        })?;
        validate_schema(&golden)?;
        let kinds = validate::infer_kinds(&golden);
        check_golden_cells(&golden, &kinds)?;

        info!(
            bank = %target,
            pdf = %pdf_path.display(),
            csv = %csv_path.display(),
            columns = golden.columns().len(),
            rows = golden.row_count(),
            "golden dataset loaded"
        );

        Ok(Self {
            target: target.to_string(),
            pdf_path,
            csv_path,
            golden,
            kinds,
        })
    }

    pub fn golden(&self) -> &Table {
        &self.golden
    }

    pub fn kinds(&self) -> &[ColumnKind] {
        &self.kinds
    }
}

/// First file with the given extension directly under `base`, then one
/// level of recursion; sorted so the pick is stable.
fn find_first(base: &Path, ext: &str) -> Result<Option<PathBuf>> {
    if !base.is_dir() {
        return Err(AgentError::DatasetNotFound(format!(
            "data directory {} does not exist",
            base.display()
        )));
    }
    let mut direct = files_with_ext(base, ext)?;
    direct.sort();
    if let Some(first) = direct.into_iter().next() {
        return Ok(Some(first));
    }

    let mut nested = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        if path.is_dir() {
            nested.extend(files_with_ext(&path, ext)?);
        }
    }
    nested.sort();
    Ok(nested.into_iter().next())
}

fn files_with_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file()
            && path
                .extension()
                .map(|e| e.eq_ignore_ascii_case(ext))
                .unwrap_or(false)
        {
            found.push(path);
        }
    }
    Ok(found)
}

fn validate_schema(golden: &Table) -> Result<()> {
    let mut seen = HashSet::new();
    for name in golden.columns() {
        if name.trim().is_empty() {
            return Err(AgentError::SchemaInvalid(
                "golden table has an empty column name".to_string(),
            ));
        }
        if !seen.insert(name.as_str()) {
            return Err(AgentError::SchemaInvalid(format!(
                "golden table has duplicate column '{}'",
                name
            )));
        }
    }
    Ok(())
}

/// Reject a golden table whose date or numeric cells cannot be
/// normalized. A malformed reference cannot be repaired by regenerating
/// candidate code, so this is fatal at load time.
fn check_golden_cells(golden: &Table, kinds: &[ColumnKind]) -> Result<()> {
    for (col, (name, kind)) in golden.columns().iter().zip(kinds.iter()).enumerate() {
        for (row, value) in golden.column_values(col).enumerate() {
            if value.trim().is_empty() {
                continue;
            }
            let ok = match kind {
                ColumnKind::Date => validate::normalize_date(value).is_some(),
                ColumnKind::Numeric => validate::normalize_number(value).is_some(),
                ColumnKind::Text => true,
            };
            if !ok {
                return Err(AgentError::SchemaInvalid(format!(
                    "golden cell at row {}, column '{}' cannot be normalized as {}: '{}'",
                    row, name, kind, value
                )));
            }
        }
    }
    Ok(())
}
