//! Region materialization: writes an extracted table into the backend as a
//! fresh physical table with deduplicated column names and the synthetic
//! row-order column.

use crate::database::table::ExtractedTable;
use crate::database::{quote_ident, SqlBackend, ROW_ORDER_COLUMN};
use anyhow::Result;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Rows per INSERT statement.
const INSERT_BATCH: usize = 200;

/// Drops and recreates the table, then loads the rows in batches. Every data
/// column is TEXT; values are rendered to their display text on the way in,
/// nulls stay null.
pub fn materialize(backend: &mut dyn SqlBackend, table: &ExtractedTable) -> Result<()> {
    let table_ident = quote_ident(&table.table_name);
    backend.execute(&format!("DROP TABLE IF EXISTS {}", table_ident), &[])?;

    let headers = dedupe_headers(table);
    let mut definitions: Vec<String> = headers
        .iter()
        .map(|header| format!("{} TEXT", quote_ident(header)))
        .collect();
    definitions.push(format!("{} INTEGER", quote_ident(ROW_ORDER_COLUMN)));
    backend.execute(
        &format!("CREATE TABLE {} ({})", table_ident, definitions.join(", ")),
        &[],
    )?;

    let column_count = headers.len() + 1;
    for (batch_index, batch) in table.rows.chunks(INSERT_BATCH).enumerate() {
        let mut params: Vec<Value> = Vec::with_capacity(batch.len() * column_count);
        let mut tuples: Vec<String> = Vec::with_capacity(batch.len());
        for (offset, row) in batch.iter().enumerate() {
            let base = params.len();
            for index in 0..headers.len() {
                params.push(render_cell(row.get(index)));
            }
            params.push(Value::from((batch_index * INSERT_BATCH + offset) as i64));
            let placeholders: Vec<String> =
                (1..=column_count).map(|n| format!("${}", base + n)).collect();
            tuples.push(format!("({})", placeholders.join(", ")));
        }
        backend.execute(
            &format!("INSERT INTO {} VALUES {}", table_ident, tuples.join(", ")),
            &params,
        )?;
    }

    debug!(
        table = table.table_name.as_str(),
        columns = headers.len(),
        rows = table.rows.len(),
        "materialized region table"
    );
    Ok(())
}

/// The data columns of an existing table, in ordinal position, excluding the
/// synthetic `_`-prefixed ones.
pub fn table_columns(backend: &mut dyn SqlBackend, table_name: &str) -> Result<Vec<String>> {
    let result = backend.execute(
        "SELECT column_name FROM information_schema.columns \
         WHERE table_name = $1 AND column_name NOT LIKE '\\_%' \
         ORDER BY ordinal_position",
        &[Value::String(table_name.to_owned())],
    )?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.get("column_name"))
        .filter_map(|value| value.as_str().map(str::to_owned))
        .collect())
}

/// Physical column names: blank ids become `Col_<n>`, duplicates are
/// suffixed `_2`, `_3`, and so on.
fn dedupe_headers(table: &ExtractedTable) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    table
        .columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let base = column.id.trim();
            let base = if base.is_empty() {
                format!("Col_{}", index + 1)
            } else {
                base.to_owned()
            };
            let mut candidate = base.clone();
            let mut counter = 2;
            while used.contains(&candidate) {
                candidate = format!("{}_{}", base, counter);
                counter += 1;
            }
            used.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// TEXT rendering of a cell value; ragged rows read as null.
fn render_cell(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::Null,
        Some(Value::String(text)) => Value::String(text.clone()),
        Some(Value::Bool(flag)) => Value::String(flag.to_string()),
        Some(Value::Number(number)) => Value::String(number.to_string()),
        Some(other) => Value::String(other.to_string()),
    }
}
