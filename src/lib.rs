//! parsegen — self-correcting bank statement parser generator.
//!
//! Given a target bank's statement PDF and a golden reference CSV, the
//! repair loop asks a code-generation oracle for an extraction routine,
//! runs it in a sandboxed subprocess, compares its table against the
//! golden one, and feeds the diagnosis back to the oracle for up to
//! three attempts.

pub mod dataset;
pub mod diagnostic;
pub mod error;
pub mod generator;
pub mod plan;
pub mod repair_loop;
pub mod sandbox;
pub mod table;
pub mod validate;
