//! Repair Loop
//!
//! Bounded generate→execute→validate loop with diagnostic-driven repair.
//! Each attempt runs its phases strictly downstream; the diagnostic of a
//! failed attempt crosses to the next attempt's plan and nowhere else.
//! Attempt records are append-only and kept for audit whether or not the
//! run converges.

use crate::dataset::GoldenDataset;
use crate::diagnostic::Diagnostic;
use crate::error::Result;
use crate::generator::CodeGenerator;
use crate::plan::Plan;
use crate::sandbox::{ExecutionOutcome, SandboxExecutor};
use crate::validate::{self, ValidationResult};
use tracing::{info, warn};

pub const MAX_ATTEMPTS: u8 = 3;

/// One full pass through plan→generate→execute→validate.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based sequence number.
    pub attempt: u8,
    /// Candidate source, when generation got that far.
    pub source: Option<String>,
    /// Why this attempt failed.
    pub diagnostic: Diagnostic,
}

/// Terminal artifact of a run.
#[derive(Debug, Clone)]
pub enum RunResult {
    /// The candidate at `attempt` validated against the golden table.
    /// Earlier failed attempts are retained in `history`.
    Converged {
        source: String,
        attempt: u8,
        history: Vec<AttemptRecord>,
    },
    /// Every attempt failed; the full ordered record of why.
    Exhausted { history: Vec<AttemptRecord> },
}

impl RunResult {
    pub fn converged(&self) -> bool {
        matches!(self, RunResult::Converged { .. })
    }

    pub fn history(&self) -> &[AttemptRecord] {
        match self {
            RunResult::Converged { history, .. } => history,
            RunResult::Exhausted { history } => history,
        }
    }
}

pub struct RepairLoop {
    max_attempts: u8,
}

impl RepairLoop {
    pub fn new(max_attempts: u8) -> Self {
        Self { max_attempts }
    }

    /// Run the loop to a terminal state. Only fatal dataset problems
    /// (surfaced by the validator when the loader let a malformed golden
    /// cell through) escape as errors; every per-attempt failure becomes
    /// a diagnostic and consumes exactly one attempt.
    pub async fn run(
        &self,
        dataset: &GoldenDataset,
        generator: &dyn CodeGenerator,
        executor: &SandboxExecutor,
    ) -> Result<RunResult> {
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut prior: Option<Diagnostic> = None;

        for attempt in 1..=self.max_attempts {
            info!(attempt, max = self.max_attempts, "starting attempt");

            // Planning(n)
            let plan = Plan::build(dataset, prior.as_ref());

            // Generating(n). An unavailable oracle consumes the attempt;
            // unbounded retries against a down oracle are not allowed.
            let source = match generator.generate(&plan).await {
                Ok(source) => source,
                Err(e) => {
                    warn!(attempt, error = %e, "generation failed");
                    let diagnostic = Diagnostic::Generation(e.to_string());
                    prior = Some(diagnostic.clone());
                    history.push(AttemptRecord {
                        attempt,
                        source: None,
                        diagnostic,
                    });
                    continue;
                }
            };

            // Executing(n)
            let outcome = executor.execute(&source, &dataset.pdf_path).await?;
            let candidate = match outcome {
                ExecutionOutcome::Table(table) => table,
                ExecutionOutcome::Failed(failure) => {
                    warn!(attempt, failure = %failure, "execution failed");
                    let diagnostic = Diagnostic::Execution(failure);
                    prior = Some(diagnostic.clone());
                    history.push(AttemptRecord {
                        attempt,
                        source: Some(source),
                        diagnostic,
                    });
                    continue;
                }
            };

            // Validating(n)
            match validate::compare(&candidate, dataset.golden(), dataset.kinds())? {
                ValidationResult::Pass => {
                    info!(attempt, "candidate validated against golden table");
                    return Ok(RunResult::Converged {
                        source,
                        attempt,
                        history,
                    });
                }
                ValidationResult::Diff(diff) => {
                    warn!(attempt, diff = %diff, "validation failed");
                    let diagnostic = Diagnostic::Validation(diff);
                    prior = Some(diagnostic.clone());
                    history.push(AttemptRecord {
                        attempt,
                        source: Some(source),
                        diagnostic,
                    });
                }
            }
        }

        warn!(max = self.max_attempts, "attempts exhausted without convergence");
        Ok(RunResult::Exhausted { history })
    }
}

impl Default for RepairLoop {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS)
    }
}
