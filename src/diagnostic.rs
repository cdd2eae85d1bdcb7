//! Diagnostics
//!
//! Structured descriptions of why an attempt failed. Diagnostics are the
//! only state carried across attempt boundaries; within one attempt data
//! flows strictly downstream.

use crate::sandbox::ExecutionFailure;
use crate::validate::TableDiff;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// The oracle was unreachable or returned empty/malformed text.
    Generation(String),
    /// The candidate failed at load or run time.
    Execution(ExecutionFailure),
    /// The candidate ran but its table diverged from the golden one.
    Validation(TableDiff),
}

impl Diagnostic {
    /// Render the diagnostic as brief text for the next generation plan.
    pub fn summary(&self) -> String {
        match self {
            Diagnostic::Generation(msg) => {
                format!("The previous generation attempt failed: {}", msg)
            }
            Diagnostic::Execution(failure) => format!(
                "The previous parser failed at runtime: {}",
                failure
            ),
            Diagnostic::Validation(diff) => format!(
                "The previous parser ran but produced a wrong table: {}",
                diff
            ),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Generation(msg) => write!(f, "generation failure: {}", msg),
            Diagnostic::Execution(failure) => write!(f, "execution failure: {}", failure),
            Diagnostic::Validation(diff) => write!(f, "validation diff: {}", diff),
        }
    }
}
