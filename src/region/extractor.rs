//! Region extraction: resolves a region's span against its sheet, derives
//! the per-item display names (merge-aware, optionally cascading), gates and
//! interleaves attribute columns, and produces the flat [`ExtractedTable`].
//!
//! A horizontal region is treated as a transposed vertical one: items run
//! along rows, header cells occupy the leading columns, and the raw slice is
//! transposed before being treated as row-major.

use crate::database::table::{ExtractedTable, TableColumn};
use crate::region::{Direction, Region, RegionError};
use crate::spreadsheet::merge::{merged_value, owning_merge};
use crate::spreadsheet::reference::index_to_column;
use crate::spreadsheet::{display_text, is_blank, SheetData};
use serde_json::Value;
use tracing::debug;

/// One output column family: the primary item column plus the attribute
/// columns gated onto it.
struct Item {
    /// Sheet column (vertical) or sheet row (horizontal) of the item.
    axis: usize,
    column: TableColumn,
    attributes: Vec<ItemAttribute>,
}

struct ItemAttribute {
    column: TableColumn,
    /// Fixed (row, col) position the attribute value is read from.
    value_at: (usize, usize),
}

struct Layout {
    items: Vec<Item>,
    /// Data rows (vertical) or data columns (horizontal), in source order.
    data_positions: Vec<usize>,
}

/// Derives the header field list of a region: one entry per item, with
/// attribute fields interleaved after their item. Used by schema
/// reconciliation; extraction emits exactly the same columns.
pub fn header_fields(region: &Region, sheet: &SheetData) -> Result<Vec<TableColumn>, RegionError> {
    Ok(layout(region, sheet)?
        .items
        .into_iter()
        .flat_map(|item| {
            std::iter::once(item.column)
                .chain(item.attributes.into_iter().map(|attribute| attribute.column))
        })
        .collect())
}

/// Extracts a region into its flat table. Ragged matrix rows read as null;
/// attribute values are nulled wherever the item's primary cell is blank.
pub fn extract(region: &Region, sheet: &SheetData) -> Result<ExtractedTable, RegionError> {
    let layout = layout(region, sheet)?;
    let mut columns = Vec::new();
    for item in &layout.items {
        columns.push(item.column.clone());
        for attribute in &item.attributes {
            columns.push(attribute.column.clone());
        }
    }

    let mut rows = Vec::with_capacity(layout.data_positions.len());
    for position in &layout.data_positions {
        let mut record = Vec::with_capacity(columns.len());
        for item in &layout.items {
            let base = match region.direction {
                Direction::Vertical => sheet.cell(*position, item.axis),
                Direction::Horizontal => sheet.cell(item.axis, *position),
            };
            let base_blank = is_blank(base);
            record.push(base.cloned().unwrap_or(Value::Null));
            for attribute in &item.attributes {
                let value = if base_blank {
                    Value::Null
                } else {
                    sheet
                        .cell(attribute.value_at.0, attribute.value_at.1)
                        .cloned()
                        .unwrap_or(Value::Null)
                };
                record.push(value);
            }
        }
        rows.push(record);
    }

    debug!(
        region = region.name.as_str(),
        columns = columns.len(),
        rows = rows.len(),
        "extracted region"
    );
    Ok(ExtractedTable {
        table_name: region.physical_table(),
        columns,
        rows,
    })
}

/// Resolves the span and builds the item layout shared by header derivation
/// and extraction.
fn layout(region: &Region, sheet: &SheetData) -> Result<Layout, RegionError> {
    region.validate()?;
    let start = region.start.expect("validated above");

    // Open-ended bounds fall back to the declared range, then the matrix extent.
    let declared = sheet.declared();
    let row_upper = region
        .end
        .map(|end| end.row)
        .or(declared.and_then(|range| range.row_upper_bound))
        .unwrap_or_else(|| sheet.row_count().saturating_sub(1));
    let col_upper = region
        .end
        .map(|end| end.col)
        .or(declared.and_then(|range| range.col_upper_bound))
        .unwrap_or_else(|| sheet.col_count().saturating_sub(1));

    if start.row > row_upper || start.col > col_upper || sheet.row_count() == 0 {
        debug!(region = region.name.as_str(), "degenerate span, nothing to extract");
        return Ok(Layout {
            items: Vec::new(),
            data_positions: Vec::new(),
        });
    }

    let depth = region.header_depth();
    let (item_axis, header_lower, data_lower_offset) = match region.direction {
        Direction::Vertical => (start.col..=col_upper, start.row, start.row),
        Direction::Horizontal => (start.row..=row_upper, start.col, start.col),
    };
    let data_lower = data_lower_offset + depth + region.skip_rows;
    let data_upper = match region.direction {
        Direction::Vertical => row_upper,
        Direction::Horizontal => col_upper,
    };
    let data_positions: Vec<usize> = (data_lower..=data_upper).collect();

    let items = item_axis
        .map(|axis| build_item(region, sheet, axis, header_lower, depth))
        .collect();

    Ok(Layout {
        items,
        data_positions,
    })
}

fn build_item(
    region: &Region,
    sheet: &SheetData,
    axis: usize,
    header_lower: usize,
    depth: usize,
) -> Item {
    let id = match region.direction {
        Direction::Vertical => index_to_column(axis),
        Direction::Horizontal => format!("Row_{}", axis + 1),
    };
    let display_name = derive_display_name(region, sheet, axis, header_lower, depth)
        .unwrap_or_else(|| id.clone());

    let mut attributes = Vec::new();
    for (ordinal, attribute) in region.header_attributes.iter().enumerate() {
        let Some((from, to)) = attribute.endpoints() else {
            continue;
        };
        let (covered, value_at) = match region.direction {
            Direction::Vertical => {
                let lower = from.col.min(to.col);
                let upper = from.col.max(to.col);
                (lower <= axis && axis <= upper, (from.row, axis))
            }
            Direction::Horizontal => {
                let lower = from.row.min(to.row);
                let upper = from.row.max(to.row);
                (lower <= axis && axis <= upper, (axis, from.col))
            }
        };
        if !covered {
            continue;
        }
        let suffix = attribute
            .suffix
            .clone()
            .unwrap_or_else(|| format!("attr_{}", ordinal + 1));
        attributes.push(ItemAttribute {
            column: TableColumn::attribute(
                format!("{}_attr_{}", id, ordinal + 1),
                format!("{}_{}", display_name, suffix),
            ),
            value_at,
        });
    }

    Item {
        axis,
        column: TableColumn::new(id, display_name),
        attributes,
    }
}

/// Header-derived display name for one item, or None when every header cell
/// is blank. Cascading concatenates the header lines with `_`, skipping
/// repeats owned by the same merge range.
fn derive_display_name(
    region: &Region,
    sheet: &SheetData,
    axis: usize,
    header_lower: usize,
    depth: usize,
) -> Option<String> {
    let position = |line: usize| match region.direction {
        Direction::Vertical => (line, axis),
        Direction::Horizontal => (axis, line),
    };

    if region.cascade_header {
        let mut names: Vec<String> = Vec::new();
        let mut previous_anchor: Option<(usize, usize)> = None;
        for line in header_lower..header_lower + depth {
            let (row, col) = position(line);
            let anchor = owning_merge(&sheet.merges, row, col)
                .map(|merge| (merge.start.row, merge.start.col));
            if anchor.is_some() && anchor == previous_anchor {
                continue;
            }
            if let Some(text) = display_text(merged_value(&sheet.matrix, &sheet.merges, row, col)) {
                names.push(text);
            }
            previous_anchor = anchor;
        }
        if names.is_empty() {
            None
        } else {
            Some(names.join("_"))
        }
    } else {
        let (row, col) = position(header_lower + depth - 1);
        display_text(merged_value(&sheet.matrix, &sheet.merges, row, col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::AttributeRange;
    use crate::spreadsheet::merge::MergeRange;
    use crate::spreadsheet::reference::CellRef;
    use serde_json::json;

    fn sheet(matrix: Vec<Vec<Value>>) -> SheetData {
        SheetData {
            matrix,
            merges: Vec::new(),
            declared_range: None,
        }
    }

    fn region(start: &str, end: &str) -> Region {
        let mut region = Region::new("r", "Sheet1");
        region.start = Some(CellRef::try_from(start).unwrap());
        region.end = Some(CellRef::try_from(end).unwrap());
        region
    }

    #[test]
    fn vertical_extraction_basic() {
        let sheet = sheet(vec![
            vec![json!("Name"), json!("Age")],
            vec![json!("alice"), json!(30)],
            vec![json!("bob"), json!(41)],
        ]);
        let table = extract(&region("A1", "B3"), &sheet).unwrap();

        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[0].id, "A");
        assert_eq!(table.columns[0].display_name, "Name");
        assert_eq!(table.columns[1].id, "B");
        assert_eq!(table.columns[1].display_name, "Age");
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec![json!("alice"), json!(30)]);
        assert_eq!(table.rows[1], vec![json!("bob"), json!(41)]);
    }

    #[test]
    fn skip_rows_drop_leading_data() {
        let sheet = sheet(vec![
            vec![json!("Name")],
            vec![json!("units")],
            vec![json!("alice")],
        ]);
        let mut region = region("A1", "A3");
        region.skip_rows = 1;
        let table = extract(&region, &sheet).unwrap();
        assert_eq!(table.rows, vec![vec![json!("alice")]]);
    }

    #[test]
    fn blank_header_falls_back_to_positional_id() {
        let sheet = sheet(vec![
            vec![json!("Name"), json!("")],
            vec![json!("alice"), json!(1)],
        ]);
        let table = extract(&region("A1", "B2"), &sheet).unwrap();
        assert_eq!(table.columns[1].display_name, "B");
    }

    #[test]
    fn cascade_concatenates_and_skips_merge_repeats() {
        let mut sheet = sheet(vec![
            vec![json!("2024"), json!("2024"), json!("Total")],
            vec![json!("Q1"), json!("Q2"), json!("")],
            vec![json!(1), json!(2), json!(3)],
        ]);
        // "2024" spans the first two header columns.
        sheet.merges.push(MergeRange {
            start: CellRef::new(0, 0),
            end: CellRef::new(0, 1),
        });
        let mut region = region("A1", "C3");
        region.header_rows = 2;
        region.cascade_header = true;
        let table = extract(&region, &sheet).unwrap();

        assert_eq!(table.columns[0].display_name, "2024_Q1");
        assert_eq!(table.columns[1].display_name, "2024_Q2");
        assert_eq!(table.columns[2].display_name, "Total");
        assert_eq!(table.rows, vec![vec![json!(1), json!(2), json!(3)]]);
    }

    #[test]
    fn cascade_skips_vertical_merge_span() {
        // A merge covering both header rows must contribute its value once.
        let mut sheet = sheet(vec![
            vec![json!("Name"), json!("FY")],
            vec![json!(""), json!("Amount")],
            vec![json!("alice"), json!(10)],
        ]);
        sheet.merges.push(MergeRange {
            start: CellRef::new(0, 0),
            end: CellRef::new(1, 0),
        });
        let mut region = region("A1", "B3");
        region.header_rows = 2;
        region.cascade_header = true;
        let table = extract(&region, &sheet).unwrap();

        assert_eq!(table.columns[0].display_name, "Name");
        assert_eq!(table.columns[1].display_name, "FY_Amount");
    }

    #[test]
    fn attribute_columns_are_gated_and_interleaved() {
        let sheet = sheet(vec![
            vec![json!("kg"), json!("t"), json!("")],
            vec![json!("Iron"), json!("Coal"), json!("Note")],
            vec![json!(5), json!(""), json!("x")],
        ]);
        let mut region = region("A2", "C3");
        region.header_attributes.push(AttributeRange {
            start: Some(CellRef::new(0, 0)),
            end: Some(CellRef::new(0, 1)),
            suffix: Some("unit".to_owned()),
        });
        let table = extract(&region, &sheet).unwrap();

        let ids: Vec<&str> = table.columns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "A_attr_1", "B", "B_attr_1", "C"]);
        assert_eq!(table.columns[1].display_name, "Iron_unit");
        assert!(table.columns[1].is_attribute);

        // Coal's base cell is blank, so its attribute value is nulled.
        assert_eq!(
            table.rows[0],
            vec![json!(5), json!("kg"), json!(""), Value::Null, json!("x")]
        );
    }

    #[test]
    fn horizontal_extraction_transposes() {
        let sheet = sheet(vec![
            vec![json!("Name"), json!("alice"), json!("bob")],
            vec![json!("Age"), json!(30), json!(41)],
        ]);
        let mut region = region("A1", "C2");
        region.direction = Direction::Horizontal;
        let table = extract(&region, &sheet).unwrap();

        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[0].id, "Row_1");
        assert_eq!(table.columns[0].display_name, "Name");
        assert_eq!(table.columns[1].id, "Row_2");
        assert_eq!(table.columns[1].display_name, "Age");
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec![json!("alice"), json!(30)]);
        assert_eq!(table.rows[1], vec![json!("bob"), json!(41)]);
    }

    #[test]
    fn open_end_uses_declared_range() {
        let mut sheet = sheet(vec![
            vec![json!("Name"), json!("Age"), json!("junk")],
            vec![json!("alice"), json!(30), json!("junk")],
        ]);
        sheet.declared_range = Some("A1:B2".to_owned());
        let mut region = Region::new("r", "Sheet1");
        region.start = Some(CellRef::new(0, 0));
        let table = extract(&region, &sheet).unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.rows, vec![vec![json!("alice"), json!(30)]]);
    }

    #[test]
    fn degenerate_span_yields_empty_table() {
        let sheet = sheet(vec![vec![json!("Name")]]);
        let table = extract(&region("C5", "A1"), &sheet).unwrap();
        assert!(table.is_empty());
        assert!(table.rows.is_empty());
    }

    #[test]
    fn ragged_rows_pad_with_null() {
        let sheet = sheet(vec![
            vec![json!("Name"), json!("Age")],
            vec![json!("alice")],
        ]);
        let table = extract(&region("A1", "B2"), &sheet).unwrap();
        assert_eq!(table.rows[0], vec![json!("alice"), Value::Null]);
    }

    #[test]
    fn header_fields_match_extraction_columns() {
        let sheet = sheet(vec![
            vec![json!("Name"), json!("Age")],
            vec![json!("alice"), json!(30)],
        ]);
        let region = region("A1", "B2");
        let fields = header_fields(&region, &sheet).unwrap();
        let table = extract(&region, &sheet).unwrap();
        assert_eq!(fields, table.columns);
    }
}
