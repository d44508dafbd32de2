//! # Database Module
//!
//! The narrow contract to the external relational execution engine, plus the
//! records and write path for materializing extracted regions into it. The
//! engine itself (parsing, planning, storage) is a collaborator: this crate
//! only sends SQL text and receives rows.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod table;
pub mod writer;

/// Synthetic column carrying source row order through every materialized
/// table, used for deterministic output ordering.
pub const ROW_ORDER_COLUMN: &str = "_row_idx";

/// Synthetic column carrying the region ordinal through vertical plans.
pub const REGION_ORDINAL_COLUMN: &str = "_reg_idx";

/// Table the post-processed run output is staged into.
pub const RESULT_TABLE: &str = "t_result";

/// One column of a query result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryField {
    pub name: String,
}

/// A backend query result: column metadata plus rows keyed by column name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub fields: Vec<QueryField>,
    pub rows: Vec<Map<String, Value>>,
}

/// Contract to the external relational execution engine.
///
/// Implementors must support `CREATE TABLE`, `DROP TABLE IF EXISTS`,
/// parameterized inserts with `$n` placeholders, and plain `SELECT`
/// execution. Failures propagate verbatim; the engine never retries.
pub trait SqlBackend {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult>;
}

/// Quotes an SQL identifier, doubling any embedded quote.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_ident("Name"), "\"Name\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
