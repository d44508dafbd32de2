//! # Spreadsheet Model Module
//!
//! In-memory model of the sheet bundle handed over by the ingestion
//! collaborator: one 2D cell matrix per sheet, a merge-range list, and the
//! sheet's declared range. Also hosts the pure cell-addressing helpers
//! (column letter codec, cell references, range grammar, merge-aware lookup).

use crate::spreadsheet::merge::MergeRange;
use crate::spreadsheet::range::Range;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub mod merge;
pub mod range;
pub mod reference;

/// Errors for sheet access and address parsing.
#[derive(Error, Debug)]
pub enum SpreadsheetError {
    /// A cell address that does not match the `A1` grammar.
    #[error("Invalid cell reference '{0}'")]
    InvalidCellReference(String),

    /// A range string that does not match the `A1:C10` grammar.
    #[error("Invalid range format '{0}'")]
    InvalidRangeFormat(String),

    /// Requested sheet is absent from the bundle.
    #[error("Sheet '{name}' not found")]
    SheetNotFound { name: String },
}

/// The sheet bundle produced by the external ingestion collaborator,
/// keyed by sheet name.
pub type SheetBundle = HashMap<String, SheetData>;

/// One sheet of the bundle: a row-major cell matrix, the merge ranges
/// declared on it, and the declared data range (e.g. `"A1:F120"`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SheetData {
    pub matrix: Vec<Vec<Value>>,
    #[serde(default)]
    pub merges: Vec<MergeRange>,
    #[serde(default)]
    pub declared_range: Option<String>,
}

impl SheetData {
    /// Raw cell lookup. Out-of-matrix positions read as `None`; ragged rows
    /// are tolerated the same way.
    pub fn cell(&self, row: usize, col: usize) -> Option<&Value> {
        self.matrix.get(row).and_then(|cells| cells.get(col))
    }

    /// Number of rows in the matrix.
    pub fn row_count(&self) -> usize {
        self.matrix.len()
    }

    /// Widest row of the matrix.
    pub fn col_count(&self) -> usize {
        self.matrix.iter().map(|row| row.len()).max().unwrap_or(0)
    }

    /// The declared range, if present and parseable.
    pub fn declared(&self) -> Option<Range> {
        let declared = self.declared_range.as_deref()?;
        Range::try_from(declared).ok()
    }
}

/// Checks whether a cell value reads as blank: null, or a string that is
/// empty after trimming.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None => true,
        Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

/// Renders a cell value as trimmed display text.
/// Blank values yield `None`; numbers and booleans are stringified.
pub fn display_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(text.to_owned())
            }
        }
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        other => Some(other.to_string()),
    }
}
