//! Field-schema reconciliation: computes the canonical [`FieldConfig`] list
//! describing the unified output schema from the regions' extracted headers
//! and the merge strategy, and migrates user customizations across
//! recomputation.

use crate::region::{extractor, Region};
use crate::schema::{
    FieldConfig, FieldSource, MatchMode, MergeStrategy, SchemaError, TargetInstance,
};
use crate::spreadsheet::SheetBundle;
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum table-name length folded into a physical alias.
const PHYS_TABLE_WIDTH: usize = 30;

/// A provisional output field while grouping is still in flight.
struct FieldGroup {
    id: String,
    name: String,
    sources: Vec<FieldSource>,
}

impl FieldGroup {
    fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_owned(),
            sources: Vec::new(),
        }
    }

    fn has_source_from(&self, region_id: &str) -> bool {
        self.sources.iter().any(|source| source.region_id == region_id)
    }

    fn matches(&self, region_id: &str, display_name: &str) -> bool {
        self.sources
            .iter()
            .any(|source| source.region_id == region_id && source.display_name == display_name)
    }
}

/// Computes the unified field list for the given regions and strategy.
/// Re-running from scratch always yields the same partition (idempotent).
pub fn compute_fields(
    regions: &[Region],
    bundle: &SheetBundle,
    strategy: &MergeStrategy,
) -> Result<Vec<FieldConfig>, SchemaError> {
    if regions.is_empty() {
        return Err(SchemaError::NoRegions);
    }

    let mut configs = match strategy {
        MergeStrategy::Vertical { match_mode } => match match_mode {
            MatchMode::ByPosition => vertical_by_position(regions, bundle),
            MatchMode::ByName => vertical_by_name(regions, bundle),
        },
        MergeStrategy::Horizontal {
            master_region_id,
            slaves,
        } => {
            if regions.len() < 2 {
                return Err(SchemaError::NotEnoughRegions {
                    needed: 2,
                    actual: regions.len(),
                });
            }
            horizontal(regions, bundle, master_region_id, slaves)
        }
    };

    assign_aliases(&mut configs, regions);
    debug!(fields = configs.len(), "computed field configs");
    Ok(configs)
}

/// The header field list a region contributes, as field sources. Regions
/// that cannot be derived (sheet absent, no start cell) contribute nothing.
fn region_sources(region: &Region, bundle: &SheetBundle) -> Vec<FieldSource> {
    let Some(sheet) = bundle.get(&region.sheet_name) else {
        warn!(
            region = region.name.as_str(),
            sheet = region.sheet_name.as_str(),
            "sheet not found, region contributes no fields"
        );
        return Vec::new();
    };
    match extractor::header_fields(region, sheet) {
        Ok(columns) => columns
            .into_iter()
            .map(|column| FieldSource {
                region_id: region.id.clone(),
                region_name: region.name.clone(),
                field_name: column.id,
                display_name: column.display_name,
                is_attribute: column.is_attribute,
            })
            .collect(),
        Err(error) => {
            warn!(
                region = region.name.as_str(),
                %error,
                "region headers unavailable, region contributes no fields"
            );
            Vec::new()
        }
    }
}

/// Aligns columns purely by ordinal index; the output field count is the
/// maximum column count among the regions.
fn vertical_by_position(regions: &[Region], bundle: &SheetBundle) -> Vec<FieldConfig> {
    let headers: Vec<Vec<FieldSource>> = regions
        .iter()
        .map(|region| region_sources(region, bundle))
        .collect();
    let width = headers.iter().map(|fields| fields.len()).max().unwrap_or(0);

    (0..width)
        .map(|ordinal| {
            let sources: Vec<FieldSource> = headers
                .iter()
                .filter_map(|fields| fields.get(ordinal).cloned())
                .collect();
            let name = sources
                .first()
                .map(|source| source.display_name.clone())
                .unwrap_or_else(|| format!("Column_{}", ordinal + 1));
            let mut config = FieldConfig::new(&name, sources);
            config.is_attribute = config.sources.iter().any(|source| source.is_attribute);
            config
        })
        .collect()
}

/// Groups headers by equal display name across regions, with at most one
/// source per region per group: a header joins the first matching group that
/// does not yet carry a source from its region, so within-region duplicates
/// stay distinct while still merging across regions.
fn vertical_by_name(regions: &[Region], bundle: &SheetBundle) -> Vec<FieldConfig> {
    let mut groups: Vec<FieldGroup> = Vec::new();

    for region in regions {
        for source in region_sources(region, bundle) {
            let slot = groups.iter().position(|group| {
                group.name == source.display_name && !group.has_source_from(&region.id)
            });
            match slot {
                Some(index) => groups[index].sources.push(source),
                None => {
                    let mut group = FieldGroup::new(&source.display_name);
                    group.sources.push(source);
                    groups.push(group);
                }
            }
        }
    }

    groups
        .into_iter()
        .map(|group| {
            let mut config = FieldConfig::new(&group.name, group.sources);
            config.is_attribute = config.sources.iter().any(|source| source.is_attribute);
            config
        })
        .collect()
}

/// One group per extracted column, master first, then slaves in declared
/// order; groups tied together by join keys are merged (slave group spliced
/// into the target group). Only the master or an earlier slave is a valid
/// join target; forward references are dropped.
fn horizontal(
    regions: &[Region],
    bundle: &SheetBundle,
    master_region_id: &str,
    slaves: &[crate::schema::SlaveJoin],
) -> Vec<FieldConfig> {
    let find_region = |id: &str| regions.iter().find(|region| region.id == id);

    let mut ordered: Vec<&Region> = Vec::new();
    if let Some(master) = find_region(master_region_id) {
        ordered.push(master);
    }
    for slave in slaves {
        if let Some(region) = find_region(&slave.region_id) {
            ordered.push(region);
        }
    }

    let mut groups: Vec<FieldGroup> = Vec::new();
    for region in &ordered {
        for source in region_sources(region, bundle) {
            let mut group = FieldGroup::new(&source.display_name);
            group.sources.push(source);
            groups.push(group);
        }
    }

    // Merge groups tied together by join keys, keyed by group id so earlier
    // removals cannot shift the target out from under us.
    for (slave_index, slave) in slaves.iter().enumerate() {
        let Some(slave_region) = find_region(&slave.region_id) else {
            continue;
        };
        for key in &slave.join_keys {
            if key.slave_field.is_empty() || key.target_field.is_empty() {
                continue;
            }
            let target_region_id = match key.target {
                TargetInstance::Master => Some(master_region_id),
                TargetInstance::Slave(index) if index < slave_index => {
                    slaves.get(index).map(|target| target.region_id.as_str())
                }
                TargetInstance::Slave(index) => {
                    warn!(
                        slave = slave_index,
                        target = index,
                        "join key references a later slave, dropped"
                    );
                    None
                }
            };
            let Some(target_region_id) = target_region_id else {
                continue;
            };

            let slave_group = groups
                .iter()
                .find(|group| group.matches(&slave_region.id, &key.slave_field))
                .map(|group| group.id.clone());
            let target_group = groups
                .iter()
                .find(|group| group.matches(target_region_id, &key.target_field))
                .map(|group| group.id.clone());
            if let (Some(slave_group), Some(target_group)) = (slave_group, target_group) {
                if slave_group == target_group {
                    continue;
                }
                let position = groups
                    .iter()
                    .position(|group| group.id == slave_group)
                    .expect("group id found above");
                let removed = groups.remove(position);
                let target = groups
                    .iter_mut()
                    .find(|group| group.id == target_group)
                    .expect("group id found above");
                target.sources.extend(removed.sources);
            }
        }
    }

    let priority = |region_id: &str| {
        ordered
            .iter()
            .position(|region| region.id == region_id)
            .unwrap_or(usize::MAX)
    };

    groups
        .into_iter()
        .map(|group| {
            let best = group
                .sources
                .iter()
                .min_by_key(|source| priority(&source.region_id))
                .cloned()
                .expect("groups are created with one source");
            let mut config = FieldConfig::new(&best.display_name, group.sources);
            config.is_attribute = config.sources.iter().any(|source| source.is_attribute);
            config
        })
        .collect()
}

/// Deduplicates display aliases and derives the collision-free physical
/// aliases, each in its own namespace. Duplicate names are suffixed `_2`,
/// `_3`, and so on.
fn assign_aliases(configs: &mut [FieldConfig], regions: &[Region]) {
    let mut used_aliases: HashSet<String> = HashSet::new();
    let mut used_phys: HashSet<String> = HashSet::new();

    for config in configs.iter_mut() {
        config.alias = dedupe(&config.alias, &mut used_aliases);

        let first = config.sources.first();
        let table = first
            .and_then(|source| regions.iter().find(|region| region.id == source.region_id))
            .map(|region| region.physical_table())
            .unwrap_or_else(|| "t".to_owned());
        let table: String = table.chars().take(PHYS_TABLE_WIDTH).collect();
        let column = first
            .map(|source| source.field_name.as_str())
            .unwrap_or("Col");
        config.phys_alias = dedupe(&format!("{}#{}", table, column), &mut used_phys);
    }
}

fn dedupe(base: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = base.to_owned();
    let mut counter = 2;
    while used.contains(&candidate) {
        candidate = format!("{}_{}", base, counter);
        counter += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// Carries user customizations from a previous field list onto a freshly
/// computed one: a new field matching a previous one on `name` and first
/// source region inherits its `alias`, `hidden` flag and rule chain (with
/// the legacy singular rule folded in). Everything else starts visible with
/// empty rule lists.
pub fn migrate_fields(
    mut computed: Vec<FieldConfig>,
    previous: &[FieldConfig],
) -> Vec<FieldConfig> {
    for config in computed.iter_mut() {
        let match_key = config.sources.first().map(|source| source.region_id.as_str());
        let matched = previous.iter().find(|candidate| {
            candidate.name == config.name
                && candidate.sources.first().map(|source| source.region_id.as_str()) == match_key
        });
        if let Some(matched) = matched {
            config.alias = matched.alias.clone();
            config.hidden = matched.hidden;
            config.strategies = matched.effective_strategies();
            config.strategy = None;
        }
    }
    computed
}
