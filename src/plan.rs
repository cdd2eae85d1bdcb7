//! Plan Builder
//!
//! Derives a generation brief from the golden table's schema and, on
//! retries, the prior attempt's diagnostic. Pure: same dataset and
//! diagnostic always produce the same plan.

use crate::dataset::GoldenDataset;
use crate::diagnostic::Diagnostic;
use crate::validate::ColumnKind;
use serde::{Deserialize, Serialize};

/// How many golden rows are inlined into the brief to ground the oracle.
const SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

/// Generation brief handed to the code-generation oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub target: String,
    pub columns: Vec<ColumnSpec>,
    pub sample_rows: Vec<Vec<String>>,
    pub prior_failure: Option<String>,
}

impl Plan {
    pub fn build(dataset: &GoldenDataset, prior: Option<&Diagnostic>) -> Self {
        let columns = dataset
            .golden()
            .columns()
            .iter()
            .zip(dataset.kinds().iter())
            .map(|(name, kind)| ColumnSpec {
                name: name.clone(),
                kind: *kind,
            })
            .collect();

        let sample_rows = dataset
            .golden()
            .rows()
            .iter()
            .take(SAMPLE_ROWS)
            .cloned()
            .collect();

        Plan {
            target: dataset.target.clone(),
            columns,
            sample_rows,
            prior_failure: prior.map(|d| d.summary()),
        }
    }

    /// Column names in required output order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
