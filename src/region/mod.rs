//! # Region Module
//!
//! A region is a user-declared rectangular extract of a sheet, carrying the
//! header/skip/direction/attribute metadata needed to turn the raw cell
//! matrix into a flat table. Descriptors live here; the extraction algorithm
//! lives in [`extractor`].

use crate::spreadsheet::reference::CellRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod extractor;

/// Configuration errors that block saving a region.
#[derive(Error, Debug)]
pub enum RegionError {
    /// `start` must be set before extraction.
    #[error("Region '{name}' has no start cell; select a range before saving")]
    MissingBounds { name: String },

    /// Attribute ranges must run perpendicular to the item axis:
    /// one row in vertical mode, one column in horizontal mode.
    #[error("Region '{name}': attribute range {index} must lie on a single {axis}")]
    MisalignedAttributeRange {
        name: String,
        index: usize,
        axis: &'static str,
    },
}

/// Orientation of a region: whether items run along columns (vertical,
/// headers on top) or along rows (horizontal, headers on the left).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Vertical,
    Horizontal,
}

/// A header-adjacent sub-range producing one synthetic column per covered
/// item. Incomplete ranges (missing endpoint) are skipped during extraction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AttributeRange {
    pub start: Option<CellRef>,
    pub end: Option<CellRef>,
    #[serde(default)]
    pub suffix: Option<String>,
}

impl AttributeRange {
    /// Both endpoints, when the range is complete.
    pub fn endpoints(&self) -> Option<(CellRef, CellRef)> {
        Some((self.start?, self.end?))
    }
}

/// A user-declared rectangular extract of a sheet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub sheet_name: String,
    #[serde(default)]
    pub start: Option<CellRef>,
    #[serde(default)]
    pub end: Option<CellRef>,
    #[serde(default = "default_header_rows")]
    pub header_rows: usize,
    #[serde(default)]
    pub skip_rows: usize,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub cascade_header: bool,
    #[serde(default)]
    pub header_attributes: Vec<AttributeRange>,
    /// Physical table name, assigned at first materialization.
    #[serde(default)]
    pub table_name: Option<String>,
    /// Set on edit, cleared when the region is materialized.
    #[serde(default)]
    pub dirty: bool,
}

fn default_header_rows() -> usize {
    1
}

impl Region {
    pub fn new(name: &str, sheet_name: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_owned(),
            sheet_name: sheet_name.to_owned(),
            start: None,
            end: None,
            header_rows: 1,
            skip_rows: 0,
            direction: Direction::Vertical,
            cascade_header: false,
            header_attributes: Vec::new(),
            table_name: None,
            dirty: true,
        }
    }

    /// Header depth with the legacy `0 means 1` reading applied.
    pub fn header_depth(&self) -> usize {
        self.header_rows.max(1)
    }

    /// Physical table name, falling back to the id-derived default used at
    /// materialization time.
    pub fn physical_table(&self) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| format!("t_{}", self.id.replace('-', "_")))
    }

    /// Validates the invariants that must hold before extraction: a start
    /// cell, and attribute ranges perpendicular to the item axis.
    pub fn validate(&self) -> Result<(), RegionError> {
        if self.start.is_none() {
            return Err(RegionError::MissingBounds {
                name: self.name.clone(),
            });
        }
        for (index, attribute) in self.header_attributes.iter().enumerate() {
            let Some((from, to)) = attribute.endpoints() else {
                continue;
            };
            let aligned = match self.direction {
                Direction::Vertical => from.row == to.row,
                Direction::Horizontal => from.col == to.col,
            };
            if !aligned {
                return Err(RegionError::MisalignedAttributeRange {
                    name: self.name.clone(),
                    index: index + 1,
                    axis: match self.direction {
                        Direction::Vertical => "row",
                        Direction::Horizontal => "column",
                    },
                });
            }
        }
        Ok(())
    }
}
