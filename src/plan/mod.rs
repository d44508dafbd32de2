//! # Plan Module
//!
//! Synthesizes the final SELECT statement that materializes the unified
//! schema: a `UNION ALL` plan for vertical merges, a `JOIN` chain for
//! horizontal merges, and a single-region projection for previews. Per-field
//! rule chains are composed into the projection as nested SQL expressions.

use crate::region::Region;
use crate::rules::RuleResolver;
use crate::schema::{FieldConfig, MergeStrategy};
use thiserror::Error;

pub mod horizontal;
pub mod vertical;

/// Sentinel query projected when no field is visible: a deliberate
/// error-row statement instead of invalid SQL.
pub const NO_VISIBLE_FIELDS_SQL: &str = "SELECT 'No visible fields' AS error";

/// Errors raised while synthesizing a plan.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Master region '{id}' not found")]
    MasterRegionNotFound { id: String },

    #[error("Region '{id}' not found")]
    RegionNotFound { id: String },
}

/// Builds the execution SQL for the given strategy. Only visible fields are
/// projected; output order is deterministic (source appearance for vertical
/// merges, master row order for horizontal ones).
pub fn build_sql(
    regions: &[Region],
    configs: &[FieldConfig],
    strategy: &MergeStrategy,
    rules: &dyn RuleResolver,
) -> Result<String, PlanError> {
    match strategy {
        MergeStrategy::Vertical { .. } => Ok(vertical::build(regions, configs, rules)),
        MergeStrategy::Horizontal {
            master_region_id,
            slaves,
        } => horizontal::build(regions, configs, master_region_id, slaves, rules),
    }
}

/// The visible projection of a field list.
pub(crate) fn visible<'a>(configs: &'a [FieldConfig]) -> Vec<&'a FieldConfig> {
    configs.iter().filter(|config| !config.hidden).collect()
}

/// Single-region preview: projects the visible fields sourced from one
/// materialized region, rule chains applied, in source row order.
pub fn single_region_sql(
    region_id: &str,
    regions: &[Region],
    configs: &[FieldConfig],
    rules: &dyn RuleResolver,
) -> Result<String, PlanError> {
    use crate::database::{quote_ident, ROW_ORDER_COLUMN};
    use crate::rules::chain::apply_rules_to_expr;

    let region = regions
        .iter()
        .find(|region| region.id == region_id)
        .or_else(|| regions.first())
        .ok_or_else(|| PlanError::RegionNotFound {
            id: region_id.to_owned(),
        })?;

    let visible = visible(configs);
    if visible.is_empty() {
        return Ok(NO_VISIBLE_FIELDS_SQL.to_owned());
    }

    let parts: Vec<String> = visible
        .iter()
        .map(|config| {
            let expr = config
                .source_for_region(&region.id)
                .map(|source| quote_ident(&source.field_name))
                .unwrap_or_else(|| "NULL".to_owned());
            let expr = apply_rules_to_expr(&expr, &config.effective_strategies(), rules);
            format!("{} AS {}", expr, quote_ident(&config.phys_alias))
        })
        .collect();

    Ok(format!(
        "SELECT {} FROM {} ORDER BY {}",
        parts.join(", "),
        quote_ident(&region.physical_table()),
        quote_ident(ROW_ORDER_COLUMN)
    ))
}
