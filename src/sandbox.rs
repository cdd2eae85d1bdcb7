//! Sandbox Executor
//!
//! Runs untrusted candidate source in a throwaway subprocess. Every
//! invocation gets a fresh temporary directory holding the candidate and
//! a fixed runner shim; the shim loads the candidate, calls its single
//! `parse(pdf_path)` entry point, and serializes the returned table as
//! CSV on stdout. Nothing survives the invocation: the child is killed on
//! timeout and the directory is dropped on every exit path, so one
//! attempt can never corrupt the next.

use crate::error::{AgentError, Result};
use crate::table::Table;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Exit status the runner shim reserves for a return value that is not
/// table-shaped. Any other nonzero status is a raised error.
const EXIT_MALFORMED: i32 = 3;

/// Fixed ABI shim between the executor and candidate code. Load errors
/// and raised exceptions surface as tracebacks on stderr; a non-table
/// return value exits with the reserved status.
const RUNNER_SHIM: &str = r#"import csv
import importlib.util
import sys

EXIT_MALFORMED = 3


def load_candidate(path):
    spec = importlib.util.spec_from_file_location("candidate", path)
    module = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(module)
    return module


def coerce_rows(result):
    if hasattr(result, "columns") and hasattr(result, "itertuples"):
        header = [str(c) for c in list(result.columns)]
        body = [
            ["" if v is None or v != v else str(v) for v in row]
            for row in result.itertuples(index=False, name=None)
        ]
        return [header] + body
    if isinstance(result, list) and result:
        if all(isinstance(r, dict) for r in result):
            header = list(result[0].keys())
            body = [
                ["" if r.get(k) is None else str(r.get(k)) for k in header]
                for r in result
            ]
            return [header] + body
        if all(isinstance(r, (list, tuple)) for r in result):
            return [["" if v is None else str(v) for v in r] for r in result]
    return None


def main():
    pdf_path = sys.argv[1]
    candidate_path = sys.argv[2]
    module = load_candidate(candidate_path)
    parse = getattr(module, "parse", None)
    if not callable(parse):
        raise AttributeError("candidate does not define a callable parse()")
    result = parse(pdf_path)
    rows = coerce_rows(result)
    if rows is None:
        sys.stderr.write("parse() did not return a table-shaped value\n")
        sys.exit(EXIT_MALFORMED)
    width = len(rows[0])
    if any(len(r) != width for r in rows):
        sys.stderr.write("parse() returned rows of uneven width\n")
        sys.exit(EXIT_MALFORMED)
    writer = csv.writer(sys.stdout, lineterminator="\n")
    for row in rows:
        writer.writerow(row)


if __name__ == "__main__":
    main()
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The candidate exceeded the wall-clock budget.
    Timeout,
    /// The candidate raised at load or run time.
    Raised,
    /// The candidate returned something that is not a table.
    MalformedOutput,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Raised => write!(f, "raised"),
            FailureKind::MalformedOutput => write!(f, "malformed output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
    pub location: Option<String>,
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(ref loc) = self.location {
            write!(f, " (at {})", loc)?;
        }
        Ok(())
    }
}

/// Outcome of one sandboxed invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Table(Table),
    Failed(ExecutionFailure),
}

lazy_static! {
    static ref TRACE_LOCATION: Regex =
        Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("static regex");
}

pub struct SandboxExecutor {
    python: String,
    timeout: Duration,
}

impl SandboxExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            python: "python3".to_string(),
            timeout,
        }
    }

    pub fn with_python(mut self, python: String) -> Self {
        self.python = python;
        self
    }

    /// Execute candidate source against the target PDF. Candidate
    /// failures of every kind come back as `ExecutionOutcome::Failed`;
    /// `Err` is reserved for executor plumbing (tempdir, spawn).
    pub async fn execute(&self, source: &str, pdf_path: &Path) -> Result<ExecutionOutcome> {
        let scratch = tempfile::tempdir()?;
        let candidate_path = scratch.path().join("candidate.py");
        let runner_path = scratch.path().join("runner.py");
        tokio::fs::write(&candidate_path, source).await?;
        tokio::fs::write(&runner_path, RUNNER_SHIM).await?;

        let mut child = Command::new(&self.python)
            .arg(&runner_path)
            .arg(pdf_path)
            .arg(&candidate_path)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Sandbox(format!("failed to spawn {}: {}", self.python, e)))?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let waited = tokio::time::timeout(self.timeout, async {
            let (stdout, stderr) = tokio::join!(read_pipe(stdout_pipe), read_pipe(stderr_pipe));
            let status = child.wait().await;
            (status, stdout, stderr)
        })
        .await;

        let (status, stdout, stderr) = match waited {
            Ok((status, stdout, stderr)) => (status.map_err(AgentError::Io)?, stdout, stderr),
            Err(_) => {
                // Budget expired: kill the child, report, reclaim.
                let _ = child.kill().await;
                warn!(timeout_secs = self.timeout.as_secs(), "candidate timed out");
                return Ok(ExecutionOutcome::Failed(ExecutionFailure {
                    kind: FailureKind::Timeout,
                    message: format!(
                        "candidate exceeded the {}s execution budget",
                        self.timeout.as_secs()
                    ),
                    location: None,
                }));
            }
        };

        if !status.success() {
            let kind = if status.code() == Some(EXIT_MALFORMED) {
                FailureKind::MalformedOutput
            } else {
                FailureKind::Raised
            };
            return Ok(ExecutionOutcome::Failed(ExecutionFailure {
                kind,
                message: last_error_line(&stderr),
                location: location_hint(&stderr),
            }));
        }

        if stdout.trim().is_empty() {
            return Ok(ExecutionOutcome::Failed(ExecutionFailure {
                kind: FailureKind::MalformedOutput,
                message: "candidate produced no output".to_string(),
                location: None,
            }));
        }

        match Table::from_csv_str(&stdout) {
            Ok(table) => {
                info!(rows = table.row_count(), "candidate produced a table");
                Ok(ExecutionOutcome::Table(table))
            }
            Err(e) => Ok(ExecutionOutcome::Failed(ExecutionFailure {
                kind: FailureKind::MalformedOutput,
                message: format!("candidate output is not a well-formed table: {}", e),
                location: None,
            })),
        }
    }
}

async fn read_pipe<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf).await;
    }
    buf
}

/// Last non-empty stderr line, which for a Python traceback is the
/// exception type and message.
fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("candidate failed with no error output")
        .to_string()
}

/// Deepest `File "...", line N` frame in the traceback, preferring frames
/// inside the candidate itself.
fn location_hint(stderr: &str) -> Option<String> {
    let mut deepest: Option<String> = None;
    let mut deepest_in_candidate: Option<String> = None;
    for caps in TRACE_LOCATION.captures_iter(stderr) {
        let hint = format!("{}:{}", &caps[1], &caps[2]);
        if caps[1].ends_with("candidate.py") {
            deepest_in_candidate = Some(hint.clone());
        }
        deepest = Some(hint);
    }
    deepest_in_candidate.or(deepest)
}
