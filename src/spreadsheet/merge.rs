//! Merge ranges and merge-aware cell lookup.

use crate::spreadsheet::reference::CellRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A rectangular merged-cell range; `start` is the top-left anchor holding
/// the range's value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl MergeRange {
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.start.row <= row && row <= self.end.row && self.start.col <= col && col <= self.end.col
    }
}

/// Finds the merge range covering a cell, if any.
pub fn owning_merge(merges: &[MergeRange], row: usize, col: usize) -> Option<&MergeRange> {
    merges.iter().find(|merge| merge.contains(row, col))
}

/// Merge-aware value lookup: a cell covered by a merge range reads as the
/// range's top-left cell, any other cell reads as itself.
pub fn merged_value<'a>(
    matrix: &'a [Vec<Value>],
    merges: &[MergeRange],
    row: usize,
    col: usize,
) -> Option<&'a Value> {
    let position = match owning_merge(merges, row, col) {
        Some(merge) => (merge.start.row, merge.start.col),
        None => (row, col),
    };
    matrix.get(position.0).and_then(|cells| cells.get(position.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matrix() -> Vec<Vec<Value>> {
        vec![
            vec![json!("Merged"), json!(""), json!("Solo")],
            vec![json!("a"), json!("b"), json!("c")],
        ]
    }

    fn merges() -> Vec<MergeRange> {
        vec![MergeRange {
            start: CellRef::new(0, 0),
            end: CellRef::new(0, 1),
        }]
    }

    #[test]
    fn covered_cell_reads_top_left() {
        let matrix = matrix();
        let merges = merges();
        assert_eq!(merged_value(&matrix, &merges, 0, 1), Some(&json!("Merged")));
        assert_eq!(merged_value(&matrix, &merges, 0, 0), Some(&json!("Merged")));
    }

    #[test]
    fn uncovered_cell_reads_itself() {
        let matrix = matrix();
        let merges = merges();
        assert_eq!(merged_value(&matrix, &merges, 0, 2), Some(&json!("Solo")));
        assert_eq!(merged_value(&matrix, &merges, 1, 1), Some(&json!("b")));
    }

    #[test]
    fn out_of_matrix_reads_none() {
        assert_eq!(merged_value(&matrix(), &merges(), 5, 5), None);
    }

    #[test]
    fn owning_merge_identity() {
        let merges = merges();
        assert!(owning_merge(&merges, 0, 1).is_some());
        assert!(owning_merge(&merges, 1, 0).is_none());
    }
}
