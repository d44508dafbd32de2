//! Flat tabular materialization of a region.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One physical column of an extracted table.
///
/// `id` is the positional physical name (`A`, `B`, `Row_12`, `A_attr_1`);
/// `display_name` is the header-derived label used for field matching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_attribute: bool,
}

impl TableColumn {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_attribute: false,
        }
    }

    pub fn attribute(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_attribute: true,
        }
    }
}

/// The physical, flat tabular materialization of a region: interleaved
/// primary and attribute columns plus row-major data. A synthetic row-order
/// column is appended when the table is written to the backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub table_name: String,
    pub columns: Vec<TableColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl ExtractedTable {
    /// True when the region produced no columns at all (degenerate span).
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
