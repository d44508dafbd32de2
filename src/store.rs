//! # Configuration Store
//!
//! The single in-memory configuration object: sheet bundle, regions, merge
//! strategy, field configs and rule sets. All mutation goes through named
//! commands; every command bumps a monotonically increasing version and
//! notifies the registered observers, so dependents can diff against the
//! version they last saw instead of relying on an implicit global lifecycle.
//!
//! The store is single-threaded by design. Nothing here guards against a
//! second operation starting while one is in flight; re-entrancy safety is
//! the caller's responsibility.

use crate::region::Region;
use crate::rules::validation::ValidationRule;
use crate::rules::CustomRule;
use crate::schema::{FieldConfig, MergeStrategy};
use crate::spreadsheet::SheetBundle;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The complete configuration state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default)]
    pub workbook: SheetBundle,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
    #[serde(default)]
    pub field_configs: Vec<FieldConfig>,
    #[serde(default)]
    pub custom_rules: Vec<CustomRule>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
}

/// Observer callback: receives the new version and the state it produced.
pub type Observer = Box<dyn Fn(u64, &ProjectState)>;

/// Handle for unsubscribing an observer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ObserverId(usize);

/// Versioned configuration container mutated only through named commands.
#[derive(Default)]
pub struct ConfigStore {
    state: ProjectState,
    version: u64,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: usize,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn subscribe(&mut self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) {
        self.observers.retain(|(observer_id, _)| *observer_id != id);
    }

    fn commit(&mut self, command: &str) {
        self.version += 1;
        debug!(command, version = self.version, "state committed");
        for (_, observer) in &self.observers {
            observer(self.version, &self.state);
        }
    }

    // Commands

    pub fn load_workbook(&mut self, workbook: SheetBundle) {
        self.state.workbook = workbook;
        self.commit("load_workbook");
    }

    /// Inserts or replaces a region by id, marking it dirty.
    pub fn upsert_region(&mut self, mut region: Region) {
        region.dirty = true;
        match self
            .state
            .regions
            .iter()
            .position(|existing| existing.id == region.id)
        {
            Some(index) => self.state.regions[index] = region,
            None => self.state.regions.push(region),
        }
        self.commit("upsert_region");
    }

    pub fn remove_region(&mut self, region_id: &str) {
        self.state.regions.retain(|region| region.id != region_id);
        self.commit("remove_region");
    }

    pub fn set_merge_strategy(&mut self, strategy: MergeStrategy) {
        self.state.merge_strategy = strategy;
        self.commit("set_merge_strategy");
    }

    pub fn set_field_configs(&mut self, configs: Vec<FieldConfig>) {
        self.state.field_configs = configs;
        self.commit("set_field_configs");
    }

    pub fn set_custom_rules(&mut self, rules: Vec<CustomRule>) {
        self.state.custom_rules = rules;
        self.commit("set_custom_rules");
    }

    pub fn set_validation_rules(&mut self, rules: Vec<ValidationRule>) {
        self.state.validation_rules = rules;
        self.commit("set_validation_rules");
    }

    /// Marks every region materialized: records its table name and clears
    /// the dirty flag. Called by the engine after a successful save.
    pub(crate) fn mark_materialized(&mut self, tables: &[(String, String)]) {
        for (region_id, table_name) in tables {
            if let Some(region) = self
                .state
                .regions
                .iter_mut()
                .find(|region| &region.id == region_id)
            {
                region.table_name = Some(table_name.clone());
                region.dirty = false;
            }
        }
        self.commit("mark_materialized");
    }

    /// Clears all configuration back to the default empty state. The loaded
    /// workbook survives a reset, mirroring the original behavior.
    pub fn reset(&mut self) {
        self.state.regions.clear();
        self.state.merge_strategy = MergeStrategy::default();
        self.state.field_configs.clear();
        self.state.custom_rules.clear();
        self.state.validation_rules.clear();
        self.commit("reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn commands_bump_the_version() {
        let mut store = ConfigStore::new();
        assert_eq!(store.version(), 0);
        store.upsert_region(Region::new("a", "S1"));
        assert_eq!(store.version(), 1);
        store.set_field_configs(Vec::new());
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn upsert_replaces_by_id_and_marks_dirty() {
        let mut store = ConfigStore::new();
        let mut region = Region::new("sales", "S1");
        region.id = "r1".to_owned();
        store.upsert_region(region.clone());

        region.name = "renamed".to_owned();
        region.dirty = false;
        store.upsert_region(region);

        assert_eq!(store.state().regions.len(), 1);
        assert_eq!(store.state().regions[0].name, "renamed");
        assert!(store.state().regions[0].dirty);
    }

    #[test]
    fn observers_see_every_commit() {
        let mut store = ConfigStore::new();
        let seen: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let id = store.subscribe(Box::new(move |version, _| {
            sink.borrow_mut().push(version);
        }));

        store.upsert_region(Region::new("a", "S1"));
        store.remove_region("missing");
        assert_eq!(*seen.borrow(), vec![1, 2]);

        store.unsubscribe(id);
        store.reset();
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn reset_clears_configuration_but_keeps_workbook() {
        let mut store = ConfigStore::new();
        store.load_workbook(SheetBundle::new());
        store.upsert_region(Region::new("a", "S1"));
        store.set_custom_rules(vec![CustomRule {
            id: "x".to_owned(),
            name: "x".to_owned(),
            code: "value".to_owned(),
        }]);
        store.reset();

        assert!(store.state().regions.is_empty());
        assert!(store.state().custom_rules.is_empty());
        assert!(matches!(
            store.state().merge_strategy,
            MergeStrategy::Vertical { .. }
        ));
    }

    #[test]
    fn mark_materialized_records_table_and_clears_dirty() {
        let mut store = ConfigStore::new();
        let mut region = Region::new("a", "S1");
        region.id = "r1".to_owned();
        store.upsert_region(region);
        store.mark_materialized(&[("r1".to_owned(), "t_r1".to_owned())]);

        let region = &store.state().regions[0];
        assert_eq!(region.table_name.as_deref(), Some("t_r1"));
        assert!(!region.dirty);
    }
}
