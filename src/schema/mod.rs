//! # Schema Module
//!
//! Records describing the unified output schema: which regions/columns feed
//! each output field, which rules apply to it, and the merge policy used to
//! reconcile the regions. Reconciliation itself lives in [`reconciler`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub mod reconciler;

/// Configuration errors raised while reconciling the schema.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Define at least one region before refreshing fields")]
    NoRegions,

    /// A merge strategy requiring multiple tables with too few regions.
    #[error("The selected merge strategy needs at least {needed} regions, found {actual}")]
    NotEnoughRegions { needed: usize, actual: usize },
}

/// How vertical merges align columns across regions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchMode {
    #[default]
    ByName,
    ByPosition,
}

/// SQL join flavor of one slave region.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Left,
    Right,
    Inner,
    Full,
}

impl JoinType {
    /// The SQL keyword for this join; `full` maps to `FULL OUTER JOIN`.
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Inner => "INNER JOIN",
            JoinType::Full => "FULL OUTER JOIN",
        }
    }
}

/// The table instance a join key points at: the master, or a slave declared
/// earlier in the slave list. Serialized as `MASTER` / `SLAVE_<index>`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TargetInstance {
    Master,
    Slave(usize),
}

impl fmt::Display for TargetInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetInstance::Master => write!(f, "MASTER"),
            TargetInstance::Slave(index) => write!(f, "SLAVE_{}", index),
        }
    }
}

impl From<TargetInstance> for String {
    fn from(value: TargetInstance) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for TargetInstance {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "MASTER" {
            return Ok(TargetInstance::Master);
        }
        value
            .strip_prefix("SLAVE_")
            .and_then(|index| index.parse().ok())
            .map(TargetInstance::Slave)
            .ok_or_else(|| format!("'{}' is not a join target instance", value))
    }
}

/// One equality predicate of a slave's join condition. Field names are the
/// header display names the user configured against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinKey {
    pub slave_field: String,
    pub target: TargetInstance,
    pub target_field: String,
}

/// One slave region of a horizontal merge, with its join flavor and keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlaveJoin {
    pub region_id: String,
    #[serde(default)]
    pub join_type: JoinType,
    #[serde(default)]
    pub join_keys: Vec<JoinKey>,
}

/// The policy used to reconcile multiple regions into one schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MergeStrategy {
    Vertical {
        #[serde(default)]
        match_mode: MatchMode,
    },
    Horizontal {
        master_region_id: String,
        #[serde(default)]
        slaves: Vec<SlaveJoin>,
    },
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Vertical {
            match_mode: MatchMode::ByName,
        }
    }
}

/// One region/column contribution to an output field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSource {
    pub region_id: String,
    pub region_name: String,
    /// Physical column id in the region's materialized table.
    pub field_name: String,
    pub display_name: String,
    #[serde(default)]
    pub is_attribute: bool,
}

/// One column of the unified output schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub id: String,
    pub name: String,
    /// User-facing display alias, unique among its generation.
    pub alias: String,
    /// Collision-free physical column name used in generated SQL.
    pub phys_alias: String,
    /// Contributing sources, ordered by ascending region priority.
    pub sources: Vec<FieldSource>,
    #[serde(default)]
    pub strategies: Vec<String>,
    /// Legacy singular rule id, folded into `strategies` on migration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default)]
    pub validations: Vec<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub is_attribute: bool,
}

impl FieldConfig {
    pub fn new(name: &str, sources: Vec<FieldSource>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_owned(),
            alias: name.to_owned(),
            phys_alias: String::new(),
            sources,
            strategies: Vec::new(),
            strategy: None,
            validations: Vec::new(),
            hidden: false,
            is_attribute: false,
        }
    }

    /// The rule chain with the legacy singular field folded in: an explicit
    /// `strategies` list wins; otherwise a legacy `strategy` other than
    /// `none` reads as a one-element chain.
    pub fn effective_strategies(&self) -> Vec<String> {
        if !self.strategies.is_empty() {
            return self.strategies.clone();
        }
        match self.strategy.as_deref() {
            Some("none") | None => Vec::new(),
            Some(rule) => vec![rule.to_owned()],
        }
    }

    /// The source contributed by a given region, if any.
    pub fn source_for_region(&self, region_id: &str) -> Option<&FieldSource> {
        self.sources
            .iter()
            .find(|source| source.region_id == region_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_instance_string_roundtrip() {
        assert_eq!(String::from(TargetInstance::Master), "MASTER");
        assert_eq!(String::from(TargetInstance::Slave(2)), "SLAVE_2");
        assert_eq!(
            TargetInstance::try_from("MASTER".to_owned()).unwrap(),
            TargetInstance::Master
        );
        assert_eq!(
            TargetInstance::try_from("SLAVE_0".to_owned()).unwrap(),
            TargetInstance::Slave(0)
        );
        assert!(TargetInstance::try_from("SLAVE_x".to_owned()).is_err());
    }

    #[test]
    fn join_type_keywords() {
        assert_eq!(JoinType::Left.keyword(), "LEFT JOIN");
        assert_eq!(JoinType::Full.keyword(), "FULL OUTER JOIN");
    }

    #[test]
    fn effective_strategies_folds_legacy_field() {
        let mut config = FieldConfig::new("Name", Vec::new());
        assert!(config.effective_strategies().is_empty());

        config.strategy = Some("trim".to_owned());
        assert_eq!(config.effective_strategies(), vec!["trim".to_owned()]);

        config.strategy = Some("none".to_owned());
        assert!(config.effective_strategies().is_empty());

        config.strategies = vec!["upper".to_owned()];
        config.strategy = Some("trim".to_owned());
        assert_eq!(config.effective_strategies(), vec!["upper".to_owned()]);
    }

    #[test]
    fn merge_strategy_serde_shape() {
        let strategy = MergeStrategy::Horizontal {
            master_region_id: "r1".to_owned(),
            slaves: vec![SlaveJoin {
                region_id: "r2".to_owned(),
                join_type: JoinType::Full,
                join_keys: vec![JoinKey {
                    slave_field: "id".to_owned(),
                    target: TargetInstance::Master,
                    target_field: "id".to_owned(),
                }],
            }],
        };
        let json = serde_json::to_value(&strategy).unwrap();
        assert_eq!(json["type"], "horizontal");
        assert_eq!(json["slaves"][0]["join_type"], "full");
        assert_eq!(json["slaves"][0]["join_keys"][0]["target"], "MASTER");

        let back: MergeStrategy = serde_json::from_value(json).unwrap();
        match back {
            MergeStrategy::Horizontal { slaves, .. } => {
                assert_eq!(slaves[0].join_keys[0].target, TargetInstance::Master)
            }
            _ => panic!("expected horizontal"),
        }
    }
}
