//! End-to-end repair loop tests driven by a scripted oracle.
//!
//! The stub generator replays a fixed sequence of candidate sources (or
//! outages), so every loop transition is exercised deterministically.
//! Candidates are real Python run through the real sandbox; they ignore
//! the PDF and return hardcoded tables.

use async_trait::async_trait;
use parsegen::dataset::GoldenDataset;
use parsegen::diagnostic::Diagnostic;
use parsegen::error::{AgentError, Result};
use parsegen::generator::CodeGenerator;
use parsegen::plan::Plan;
use parsegen::repair_loop::{RepairLoop, RunResult, MAX_ATTEMPTS};
use parsegen::sandbox::{ExecutionOutcome, FailureKind, SandboxExecutor};
use parsegen::validate::{self, TableDiff, ValidationResult};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const GOLDEN_CSV: &str = "\
Date,Narration,Amount
01-01-2024,opening balance,100.00
02-01-2024,UPI/groceries,-42.50
03-01-2024,salary,1000.00
";

/// Candidate returning exactly the golden rows.
const EXACT_SOURCE: &str = r#"
def parse(pdf_path):
    return [
        ["Date", "Narration", "Amount"],
        ["01-01-2024", "opening balance", "100.00"],
        ["02-01-2024", "UPI/groceries", "-42.50"],
        ["03-01-2024", "salary", "1000.00"],
    ]
"#;

/// Candidate with one wrong cell (Amount, row index 2).
const ONE_CELL_OFF_SOURCE: &str = r#"
def parse(pdf_path):
    return [
        ["Date", "Narration", "Amount"],
        ["01-01-2024", "opening balance", "100.00"],
        ["02-01-2024", "UPI/groceries", "-42.50"],
        ["03-01-2024", "salary", "10000.00"],
    ]
"#;

/// Candidate that raises at runtime.
const RAISING_SOURCE: &str = r#"
def parse(pdf_path):
    raise ValueError("could not open statement")
"#;

/// Candidate with a persistently wrong column name.
const WRONG_COLUMN_SOURCE: &str = r#"
def parse(pdf_path):
    return [
        ["Date", "Description", "Amount"],
        ["01-01-2024", "opening balance", "100.00"],
        ["02-01-2024", "UPI/groceries", "-42.50"],
        ["03-01-2024", "salary", "1000.00"],
    ]
"#;

fn write_dataset(dir: &Path) {
    File::create(dir.join("statement.pdf")).unwrap();
    let mut f = File::create(dir.join("result.csv")).unwrap();
    f.write_all(GOLDEN_CSV.as_bytes()).unwrap();
}

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Replays scripted responses, one per generate() call.
struct ScriptedGenerator {
    script: Mutex<Vec<std::result::Result<String, String>>>,
    calls: Mutex<Vec<Plan>>,
}

impl ScriptedGenerator {
    fn new(script: Vec<std::result::Result<&str, &str>>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .rev()
                    .map(|r| r.map(|s| s.to_string()).map_err(|e| e.to_string()))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn plans(&self) -> Vec<Plan> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, plan: &Plan) -> Result<String> {
        self.calls.lock().unwrap().push(plan.clone());
        match self.script.lock().unwrap().pop() {
            Some(Ok(source)) => Ok(source),
            Some(Err(msg)) => Err(AgentError::Generation(msg)),
            None => panic!("generator called more times than scripted"),
        }
    }
}

fn executor() -> SandboxExecutor {
    SandboxExecutor::new(Duration::from_secs(20))
}

#[tokio::test]
async fn scenario_a_exact_match_converges_on_first_attempt() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let dataset = GoldenDataset::load("icici", Some(dir.path())).unwrap();
    let generator = ScriptedGenerator::new(vec![Ok(EXACT_SOURCE)]);

    let result = RepairLoop::default()
        .run(&dataset, &generator, &executor())
        .await
        .unwrap();

    match result {
        RunResult::Converged {
            source,
            attempt,
            history,
        } => {
            assert_eq!(attempt, 1);
            assert!(history.is_empty());
            // The returned candidate itself must validate, not some
            // stale candidate from another attempt.
            let outcome = executor().execute(&source, &dataset.pdf_path).await.unwrap();
            match outcome {
                ExecutionOutcome::Table(table) => assert_eq!(
                    validate::compare(&table, dataset.golden(), dataset.kinds()).unwrap(),
                    ValidationResult::Pass
                ),
                other => panic!("accepted candidate failed to run: {:?}", other),
            }
        }
        RunResult::Exhausted { history } => {
            panic!("expected convergence, got exhaustion: {:?}", history)
        }
    }
}

#[tokio::test]
async fn scenario_b_recovers_from_raise_and_cell_mismatch() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let dataset = GoldenDataset::load("icici", Some(dir.path())).unwrap();
    let generator = ScriptedGenerator::new(vec![
        Ok(RAISING_SOURCE),
        Ok(ONE_CELL_OFF_SOURCE),
        Ok(EXACT_SOURCE),
    ]);

    let result = RepairLoop::default()
        .run(&dataset, &generator, &executor())
        .await
        .unwrap();

    match result {
        RunResult::Converged {
            attempt, history, ..
        } => {
            assert_eq!(attempt, 3);
            assert_eq!(history.len(), 2);
            match &history[0].diagnostic {
                Diagnostic::Execution(failure) => {
                    assert_eq!(failure.kind, FailureKind::Raised);
                    assert!(failure.message.contains("could not open statement"));
                }
                other => panic!("expected execution diagnostic, got {:?}", other),
            }
            match &history[1].diagnostic {
                Diagnostic::Validation(TableDiff::CellMismatches(cells)) => {
                    assert_eq!(cells.len(), 1);
                    assert_eq!(cells[0].row, 2);
                    assert_eq!(cells[0].column, "Amount");
                    assert_eq!(cells[0].expected, "1000.00");
                    assert_eq!(cells[0].actual, "10000.00");
                }
                other => panic!("expected cell mismatch diagnostic, got {:?}", other),
            }
            // Attempt 3's plan saw attempt 2's diagnostic.
            let plans = generator.plans();
            assert!(plans[0].prior_failure.is_none());
            assert!(plans[2].prior_failure.as_ref().unwrap().contains("Amount"));
        }
        RunResult::Exhausted { history } => {
            panic!("expected convergence, got exhaustion: {:?}", history)
        }
    }
}

#[tokio::test]
async fn scenario_c_persistent_column_mismatch_exhausts() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let dataset = GoldenDataset::load("icici", Some(dir.path())).unwrap();
    let generator = ScriptedGenerator::new(vec![
        Ok(WRONG_COLUMN_SOURCE),
        Ok(WRONG_COLUMN_SOURCE),
        Ok(WRONG_COLUMN_SOURCE),
    ]);

    let result = RepairLoop::default()
        .run(&dataset, &generator, &executor())
        .await
        .unwrap();

    match result {
        RunResult::Exhausted { history } => {
            assert_eq!(history.len(), MAX_ATTEMPTS as usize);
            for record in &history {
                match &record.diagnostic {
                    Diagnostic::Validation(TableDiff::ColumnMismatch { expected, actual }) => {
                        assert!(expected.contains(&"Narration".to_string()));
                        assert!(actual.contains(&"Description".to_string()));
                    }
                    other => panic!("expected column mismatch diagnostic, got {:?}", other),
                }
            }
        }
        RunResult::Converged { attempt, .. } => {
            panic!("expected exhaustion, converged at attempt {}", attempt)
        }
    }
}

#[tokio::test]
async fn scenario_d_oracle_outage_consumes_all_attempts() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let dataset = GoldenDataset::load("icici", Some(dir.path())).unwrap();
    let generator = ScriptedGenerator::new(vec![
        Err("oracle unreachable"),
        Err("oracle unreachable"),
        Err("oracle unreachable"),
    ]);

    let result = RepairLoop::default()
        .run(&dataset, &generator, &executor())
        .await
        .unwrap();

    match result {
        RunResult::Exhausted { history } => {
            assert_eq!(history.len(), MAX_ATTEMPTS as usize);
            assert_eq!(generator.call_count(), MAX_ATTEMPTS as usize);
            for (idx, record) in history.iter().enumerate() {
                assert_eq!(record.attempt as usize, idx + 1);
                assert!(record.source.is_none());
                match &record.diagnostic {
                    Diagnostic::Generation(msg) => assert!(msg.contains("oracle unreachable")),
                    other => panic!("expected generation diagnostic, got {:?}", other),
                }
            }
        }
        RunResult::Converged { attempt, .. } => {
            panic!("expected exhaustion, converged at attempt {}", attempt)
        }
    }
}

#[tokio::test]
async fn attempt_records_never_exceed_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let dataset = GoldenDataset::load("icici", Some(dir.path())).unwrap();
    // More outages scripted than the loop may consume.
    let generator = ScriptedGenerator::new(vec![
        Err("down"),
        Err("down"),
        Err("down"),
        Err("down"),
        Err("down"),
    ]);

    let result = RepairLoop::default()
        .run(&dataset, &generator, &executor())
        .await
        .unwrap();

    assert!(!result.converged());
    assert_eq!(result.history().len(), MAX_ATTEMPTS as usize);
    assert_eq!(generator.call_count(), MAX_ATTEMPTS as usize);
}
