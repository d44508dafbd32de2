//! Cell reference codec: column letters, row numbers, and `A1`-style
//! addresses, all 0-based on the Rust side.

use crate::spreadsheet::SpreadsheetError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Parses column letters to a 0-based column index.
/// A = 0, B = 1, ..., Z = 25, AA = 26, AB = 27, ...
pub fn column_to_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    letters
        .to_ascii_uppercase()
        .chars()
        .map(|letter| letter as usize - 'A' as usize + 1)
        .reduce(|index, digit| index * 26 + digit)
        .map(|column| column - 1)
}

/// Encodes a 0-based column index as column letters.
/// 0 = A, 25 = Z, 26 = AA, 701 = ZZ, 702 = AAA.
pub fn index_to_column(index: usize) -> String {
    let mut column = index + 1;
    let mut letters = String::new();
    while column > 0 {
        column -= 1;
        let digit = char::from_u32('A' as u32 + (column % 26) as u32).expect("Hardcode letters");
        letters.insert(0, digit);
        column /= 26;
    }
    letters
}

/// Parses a 1-based row number string to a 0-based row index.
pub fn row_to_index(number: &str) -> Option<usize> {
    number
        .parse()
        .ok()
        .filter(|row| *row > 0)
        .map(|row: usize| row - 1)
}

/// A single cell position, 0-based.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Formats the reference as an Excel-style address (`{row:2, col:1}` -> `B3`).
    pub fn address(&self) -> String {
        format!("{}{}", index_to_column(self.col), self.row + 1)
    }
}

impl TryFrom<&str> for CellRef {
    type Error = SpreadsheetError;

    /// Parses an Excel-style address (e.g. `"B3"`) into a 0-based reference.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let pattern = Regex::new(r"^([A-Za-z]+)(\d+)$").expect("Hardcode regex pattern");
        let captures = pattern
            .captures(value.trim())
            .ok_or_else(|| SpreadsheetError::InvalidCellReference(value.to_owned()))?;
        let col = captures
            .get(1)
            .and_then(|letters| column_to_index(letters.as_str()));
        let row = captures
            .get(2)
            .and_then(|number| row_to_index(number.as_str()));
        match (row, col) {
            (Some(row), Some(col)) => Ok(CellRef { row, col }),
            _ => Err(SpreadsheetError::InvalidCellReference(value.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_codec_roundtrip() {
        for (index, letters) in [(0, "A"), (1, "B"), (25, "Z"), (26, "AA"), (701, "ZZ"), (702, "AAA")] {
            assert_eq!(index_to_column(index), letters);
            assert_eq!(column_to_index(letters), Some(index));
        }
    }

    #[test]
    fn column_parse_rejects_garbage() {
        assert_eq!(column_to_index(""), None);
        assert_eq!(column_to_index("A1"), None);
    }

    #[test]
    fn row_parse_is_one_based() {
        assert_eq!(row_to_index("1"), Some(0));
        assert_eq!(row_to_index("12"), Some(11));
        assert_eq!(row_to_index("0"), None);
        assert_eq!(row_to_index("x"), None);
    }

    #[test]
    fn cell_ref_parse_and_format() {
        let cell = CellRef::try_from("B3").unwrap();
        assert_eq!(cell, CellRef::new(2, 1));
        assert_eq!(cell.address(), "B3");

        let cell = CellRef::try_from("aa10").unwrap();
        assert_eq!(cell, CellRef::new(9, 26));
    }

    #[test]
    fn cell_ref_parse_rejects_partial_addresses() {
        assert!(CellRef::try_from("B").is_err());
        assert!(CellRef::try_from("3").is_err());
        assert!(CellRef::try_from("B3:C4").is_err());
    }
}
