//! Horizontal merge plan: the master table aliased `m`, slaves `s1`, `s2`, …
//! in declared order, each joined with its configured flavor. Every visible
//! field projects its best source (lowest region priority); join keys resolve
//! display names to physical columns through the field configs, and a slave
//! whose keys all fail to resolve degrades to the literal `1=1` ON clause.

use crate::database::{quote_ident, ROW_ORDER_COLUMN};
use crate::plan::{visible, PlanError, NO_VISIBLE_FIELDS_SQL};
use crate::region::Region;
use crate::rules::chain::apply_rules_to_expr;
use crate::rules::RuleResolver;
use crate::schema::{FieldConfig, FieldSource, SlaveJoin, TargetInstance};
use std::collections::HashMap;
use tracing::warn;

pub(super) fn build(
    regions: &[Region],
    configs: &[FieldConfig],
    master_region_id: &str,
    slaves: &[SlaveJoin],
    rules: &dyn RuleResolver,
) -> Result<String, PlanError> {
    let master = regions
        .iter()
        .find(|region| region.id == master_region_id)
        .ok_or_else(|| PlanError::MasterRegionNotFound {
            id: master_region_id.to_owned(),
        })?;

    let visible = visible(configs);
    if visible.is_empty() {
        return Ok(NO_VISIBLE_FIELDS_SQL.to_owned());
    }

    // Alias and priority per region: the master is `m` with priority 0,
    // slaves keep their declared ordinal even when earlier ones are missing.
    let mut alias_of: HashMap<&str, String> = HashMap::new();
    let mut priority_of: HashMap<&str, usize> = HashMap::new();
    alias_of.insert(master.id.as_str(), "m".to_owned());
    priority_of.insert(master.id.as_str(), 0);
    let resolved_slaves: Vec<(&SlaveJoin, &Region, String)> = slaves
        .iter()
        .enumerate()
        .filter_map(|(index, slave)| {
            let region = regions.iter().find(|region| region.id == slave.region_id)?;
            let alias = format!("s{}", index + 1);
            alias_of.insert(region.id.as_str(), alias.clone());
            priority_of.insert(region.id.as_str(), index + 1);
            Some((slave, region, alias))
        })
        .collect();

    let parts: Vec<String> = visible
        .iter()
        .map(|config| {
            let best = config
                .sources
                .iter()
                .filter(|source| alias_of.contains_key(source.region_id.as_str()))
                .min_by_key(|source| priority_of[source.region_id.as_str()]);
            let expr = match best {
                Some(source) => format!(
                    "{}.{}",
                    alias_of[source.region_id.as_str()],
                    quote_ident(&source.field_name)
                ),
                None => "NULL".to_owned(),
            };
            let expr = apply_rules_to_expr(&expr, &config.effective_strategies(), rules);
            format!("{} AS {}", expr, quote_ident(&config.phys_alias))
        })
        .collect();

    let mut from_clause = format!("{} m", quote_ident(&master.physical_table()));
    for (slave, region, alias) in &resolved_slaves {
        let slave_index = priority_of[region.id.as_str()] - 1;
        let conditions: Vec<String> = slave
            .join_keys
            .iter()
            .filter_map(|key| {
                if key.slave_field.is_empty() || key.target_field.is_empty() {
                    return None;
                }
                let target_region_id = match key.target {
                    TargetInstance::Master => Some(master.id.as_str()),
                    TargetInstance::Slave(index) if index < slave_index => {
                        slaves.get(index).map(|target| target.region_id.as_str())
                    }
                    TargetInstance::Slave(_) => None,
                };
                let target_region_id = target_region_id?;
                let target_alias = alias_of.get(target_region_id)?;
                let slave_column = physical_field(configs, &region.id, &key.slave_field)?;
                let target_column = physical_field(configs, target_region_id, &key.target_field)?;
                Some(format!(
                    "{}.{} = {}.{}",
                    alias,
                    quote_ident(slave_column),
                    target_alias,
                    quote_ident(target_column)
                ))
            })
            .collect();

        if conditions.is_empty() && !slave.join_keys.is_empty() {
            warn!(
                slave = region.name.as_str(),
                "no join key resolved, ON clause degraded to 1=1"
            );
        }
        let on_clause = if conditions.is_empty() {
            "1=1".to_owned()
        } else {
            conditions.join(" AND ")
        };
        from_clause.push_str(&format!(
            " {} {} {} ON {}",
            slave.join_type.keyword(),
            quote_ident(&region.physical_table()),
            alias,
            on_clause
        ));
    }

    let projection: Vec<String> = visible
        .iter()
        .map(|config| quote_ident(&config.phys_alias))
        .collect();
    Ok(format!(
        "SELECT {} FROM (SELECT {}, m.{} FROM {}) AS t_union ORDER BY {}",
        projection.join(", "),
        parts.join(", "),
        quote_ident(ROW_ORDER_COLUMN),
        from_clause,
        quote_ident(ROW_ORDER_COLUMN)
    ))
}

/// Resolves a display name to the physical column a region feeds it from,
/// through the field config sources.
fn physical_field<'a>(
    configs: &'a [FieldConfig],
    region_id: &str,
    display_name: &str,
) -> Option<&'a str> {
    configs
        .iter()
        .flat_map(|config| config.sources.iter())
        .find(|source| source.region_id == region_id && source.display_name == display_name)
        .map(|source: &FieldSource| source.field_name.as_str())
}
