//! Excel-style range grammar with optional boundaries.

use crate::spreadsheet::reference::{column_to_index, row_to_index};
use crate::spreadsheet::SpreadsheetError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A cell range where any bound may be open.
/// Supports `"A1:C10"`, `"A1:"`, `"B2"`, `"A:C"`, `"2:7"`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Lower row bound (0-based), None for unbounded
    pub row_lower_bound: Option<usize>,
    /// Upper row bound (0-based), None for unbounded
    pub row_upper_bound: Option<usize>,
    /// Lower column bound (0-based), None for unbounded
    pub col_lower_bound: Option<usize>,
    /// Upper column bound (0-based), None for unbounded
    pub col_upper_bound: Option<usize>,
}

impl TryFrom<&str> for Range {
    type Error = SpreadsheetError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let pattern = Regex::new(r"^([A-Z]*)(\d*)(:([A-Z]*)(\d*))?$").expect("Hardcode regex pattern");
        let value = value.trim().to_ascii_uppercase();
        let captures = pattern
            .captures(value.as_str())
            .ok_or_else(|| SpreadsheetError::InvalidRangeFormat(value.to_owned()))?;
        Ok(Range {
            col_lower_bound: captures
                .get(1)
                .map(|matcher| matcher.as_str())
                .and_then(column_to_index),
            row_lower_bound: captures
                .get(2)
                .map(|matcher| matcher.as_str())
                .and_then(row_to_index),
            col_upper_bound: captures
                .get(4)
                .map(|matcher| matcher.as_str())
                .and_then(column_to_index),
            row_upper_bound: captures
                .get(5)
                .map(|matcher| matcher.as_str())
                .and_then(row_to_index),
        })
    }
}
