//! Code Generator Client
//!
//! Wraps the code-generation oracle behind the `CodeGenerator` capability
//! trait so the repair loop is testable with a scripted stub. Two
//! implementations ship: `LlmGenerator` (OpenAI-style chat completions)
//! and `TemplateGenerator` (deterministic pdfplumber template, used
//! offline and as the dummy-key fallback).
//!
//! The client enforces the response contract — non-empty source defining
//! exactly one `parse` entry point — and nothing else; runtime shape is
//! the sandbox's job. It never retries: retrying is the repair loop's
//! responsibility.

use crate::error::{AgentError, Result};
use crate::plan::Plan;
use crate::validate::ColumnKind;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Produce candidate source for the plan. Errors mean the oracle is
    /// unavailable or violated the response contract; both consume the
    /// current attempt.
    async fn generate(&self, plan: &Plan) -> Result<String>;
}

lazy_static! {
    static ref ENTRY_POINT: Regex = Regex::new(r"(?m)^def parse\s*\(").expect("static regex");
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)```(?:python)?\s*(.*?)```").expect("static regex");
}

/// Enforce the response contract: non-empty text defining exactly one
/// `parse(pdf_path)` entry point. Markdown fences are stripped first.
pub fn enforce_contract(raw: &str) -> Result<String> {
    let source = match CODE_FENCE.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.to_string(),
    };
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(AgentError::Generation(
            "oracle returned empty source".to_string(),
        ));
    }
    let entry_points = ENTRY_POINT.find_iter(trimmed).count();
    if entry_points != 1 {
        return Err(AgentError::Generation(format!(
            "oracle source must define exactly one parse() entry point, found {}",
            entry_points
        )));
    }
    Ok(format!("{}\n", trimmed))
}

/// Render a plan into the oracle prompt.
pub fn build_prompt(plan: &Plan) -> String {
    let mut parts = Vec::new();

    parts.push(format!(
        "Write a Python function `parse(pdf_path: str)` that extracts the transaction table from a {} bank statement PDF using pdfplumber.",
        plan.target
    ));
    parts.push("\nOUTPUT CONTRACT:".to_string());
    parts.push(
        "- Return a list of rows; the first row is the header, every later row has the same width."
            .to_string(),
    );
    parts.push(format!(
        "- Column names and order must be exactly: [{}]",
        plan.column_names().join(", ")
    ));

    parts.push("\nCOLUMN SEMANTICS:".to_string());
    for col in &plan.columns {
        parts.push(format!("- {}: {}", col.name, col.kind));
    }

    if !plan.sample_rows.is_empty() {
        parts.push("\nSAMPLE EXPECTED ROWS:".to_string());
        for row in &plan.sample_rows {
            parts.push(format!("- {}", row.join(" | ")));
        }
    }

    if let Some(ref prior) = plan.prior_failure {
        parts.push("\nPREVIOUS ATTEMPT FAILED:".to_string());
        parts.push(prior.clone());
        parts.push("Fix the cause of that failure; do not repeat it.".to_string());
    }

    parts.push("\nReturn only the Python source, no prose.".to_string());
    parts.join("\n")
}

/// Oracle over an OpenAI-style chat-completions endpoint.
pub struct LlmGenerator {
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmGenerator {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let client = reqwest::Client::new();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise code generator. Always return only Python source code, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 2000
        });

        let response = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Generation(format!("LLM API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Generation(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentError::Generation("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl CodeGenerator for LlmGenerator {
    async fn generate(&self, plan: &Plan) -> Result<String> {
        let prompt = build_prompt(plan);
        info!(bank = %plan.target, "requesting candidate from oracle");
        let raw = self.call_llm(&prompt).await?;
        enforce_contract(&raw)
    }
}

/// Deterministic offline oracle: emits a pdfplumber parser specialized to
/// the plan's column schema. No network, same plan in, same source out.
pub struct TemplateGenerator;

#[async_trait]
impl CodeGenerator for TemplateGenerator {
    async fn generate(&self, plan: &Plan) -> Result<String> {
        let columns_literal = serde_json::to_string(&plan.column_names())?;
        let date_cols: Vec<&str> = plan
            .columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Date)
            .map(|c| c.name.as_str())
            .collect();
        let numeric_cols: Vec<&str> = plan
            .columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Numeric)
            .map(|c| c.name.as_str())
            .collect();
        let date_literal = serde_json::to_string(&date_cols)?;
        let numeric_literal = serde_json::to_string(&numeric_cols)?;

        let source = format!(
            r#"import pdfplumber
from dateutil import parser as date_parser

EXPECTED_COLUMNS = {columns_literal}
DATE_COLUMNS = {date_literal}
NUMERIC_COLUMNS = {numeric_literal}


def _normalize_date(value):
    if value is None or str(value).strip() == "":
        return ""
    try:
        return date_parser.parse(str(value), dayfirst=True).strftime("%d-%m-%Y")
    except Exception:
        return str(value).strip()


def _normalize_number(value):
    if value is None:
        return ""
    s = str(value).strip().replace(",", "")
    if s in ("", "-"):
        return ""
    try:
        return repr(float(s))
    except Exception:
        return s


def parse(pdf_path):
    rows = []
    header = None
    with pdfplumber.open(pdf_path) as pdf:
        for page in pdf.pages:
            for table in page.extract_tables() or []:
                if not table or len(table) < 2:
                    continue
                page_header = [str(h).strip() if h is not None else "" for h in table[0]]
                if header is None:
                    header = page_header
                body = table[1:]
                if page_header == header:
                    rows.extend(body)
                else:
                    rows.extend(table)

    if header is None:
        return [EXPECTED_COLUMNS]

    index = {{name: i for i, name in enumerate(header)}}
    out = [EXPECTED_COLUMNS]
    for row in rows:
        cells = []
        for name in EXPECTED_COLUMNS:
            i = index.get(name)
            value = row[i] if i is not None and i < len(row) else ""
            if name in DATE_COLUMNS:
                cells.append(_normalize_date(value))
            elif name in NUMERIC_COLUMNS:
                cells.append(_normalize_number(value))
            else:
                cells.append("" if value is None else str(value).strip())
        out.append(cells)
    return out
"#
        );
        enforce_contract(&source)
    }
}
