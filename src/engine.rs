//! # Engine Module
//!
//! The operations façade tying the pipeline together: saving regions
//! (extract + materialize), refreshing fields (reconcile + migrate), running
//! the plan (build SQL, execute, post-process through scalar rule chains and
//! validations, stage the result), previewing a single region, and resetting
//! the configuration.
//!
//! Operations are synchronous request/response; each is awaited to
//! completion by the caller before triggering the next. Nothing guards
//! against overlapping operations (see [`crate::store`]).

use crate::database::table::{ExtractedTable, TableColumn};
use crate::database::{writer, QueryResult, SqlBackend, RESULT_TABLE};
use crate::error::SheetLoomError;
use crate::plan;
use crate::region::extractor;
use crate::rules::chain::apply_transforms;
use crate::rules::validation::ValidationRegistry;
use crate::rules::{RowContext, TransformRegistry};
use crate::schema::reconciler;
use crate::store::{ConfigStore, ProjectState};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// One output column of a run: the user-facing alias plus the physical name
/// it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunColumn {
    pub name: String,
    pub phys_alias: String,
}

/// The post-processed result of a run.
#[derive(Clone, Debug, Default)]
pub struct RunOutput {
    pub columns: Vec<RunColumn>,
    pub rows: Vec<Vec<Value>>,
    pub warnings: Vec<String>,
}

impl RunOutput {
    fn empty() -> Self {
        Self::default()
    }
}

/// The engine: owns the backend connection and the rule registries, and
/// drives every external action against a [`ConfigStore`].
pub struct Engine<B: SqlBackend> {
    backend: B,
    transforms: TransformRegistry,
    validations: ValidationRegistry,
}

impl<B: SqlBackend> Engine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            transforms: TransformRegistry::new(),
            validations: ValidationRegistry::new(),
        }
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Pulls the user-defined rule sets out of the configuration state so
    /// the registries resolve them on the next operation.
    fn sync_registries(&mut self, state: &ProjectState) {
        self.transforms.set_custom_rules(&state.custom_rules);
        self.validations.set_custom_rules(&state.validation_rules);
    }

    /// Validates and materializes every region into its physical table.
    /// A region whose sheet is missing from the bundle is skipped with a
    /// warning; a region with no start cell blocks the whole save.
    pub fn save_regions(&mut self, store: &mut ConfigStore) -> Result<(), SheetLoomError> {
        let state = store.state();
        let mut materialized: Vec<(String, String)> = Vec::new();
        for region in &state.regions {
            let Some(sheet) = state.workbook.get(&region.sheet_name) else {
                warn!(
                    region = region.name.as_str(),
                    sheet = region.sheet_name.as_str(),
                    "sheet not found, region skipped"
                );
                continue;
            };
            region.validate()?;
            let table = extractor::extract(region, sheet)?;
            if table.is_empty() {
                warn!(region = region.name.as_str(), "empty extraction, region skipped");
                continue;
            }
            writer::materialize(&mut self.backend, &table)?;
            materialized.push((region.id.clone(), table.table_name));
        }
        info!(regions = materialized.len(), "regions materialized");
        store.mark_materialized(&materialized);
        Ok(())
    }

    /// Recomputes the field configs for the current regions and strategy,
    /// carrying the previous per-field customizations over.
    pub fn refresh_fields(&mut self, store: &mut ConfigStore) -> Result<(), SheetLoomError> {
        let state = store.state();
        let computed =
            reconciler::compute_fields(&state.regions, &state.workbook, &state.merge_strategy)?;
        let migrated = reconciler::migrate_fields(computed, &state.field_configs);
        store.set_field_configs(migrated);
        Ok(())
    }

    /// Materializes the regions, builds and executes the plan, applies the
    /// scalar side of each field's rule chain to the result rows, evaluates
    /// the per-field validations, and stages the post-processed rows into
    /// the result table.
    pub fn run(&mut self, store: &mut ConfigStore) -> Result<RunOutput, SheetLoomError> {
        // Regions are always re-materialized before a run.
        self.save_regions(store)?;

        let state = store.state();
        self.sync_registries(state);
        let sql = plan::build_sql(
            &state.regions,
            &state.field_configs,
            &state.merge_strategy,
            &self.transforms,
        )?;
        debug!(sql = sql.as_str(), "executing plan");
        let result = self.backend.execute(&sql, &[])?;

        let headers: Vec<String> = result
            .fields
            .iter()
            .map(|field| field.name.clone())
            .collect();
        if headers.is_empty() {
            return Ok(RunOutput::empty());
        }

        let configs = state.field_configs.clone();
        let config_by_phys: HashMap<&str, &crate::schema::FieldConfig> = configs
            .iter()
            .map(|config| (config.phys_alias.as_str(), config))
            .collect();

        let mut warnings: Vec<String> = Vec::new();

        // Pass 1: scalar rule chains, with the raw row as context.
        let mut transformed: Vec<Vec<Value>> = Vec::with_capacity(result.rows.len());
        for (row_index, row) in result.rows.iter().enumerate() {
            let context: RowContext = row.clone();
            let mut record = Vec::with_capacity(headers.len());
            for header in &headers {
                let value = row.get(header).cloned().unwrap_or(Value::Null);
                let value = match config_by_phys.get(header.as_str()) {
                    Some(config) => {
                        let chain = config.effective_strategies();
                        if chain.is_empty() {
                            value
                        } else {
                            let outcome =
                                apply_transforms(&value, &context, &chain, &self.transforms);
                            for warning in outcome.warnings {
                                warnings.push(format!(
                                    "row {}, field '{}': {}",
                                    row_index + 1,
                                    config.alias,
                                    warning
                                ));
                            }
                            outcome.value
                        }
                    }
                    None => value,
                };
                record.push(value);
            }
            transformed.push(record);
        }

        // Pass 2: validations, against the transformed rows.
        for (row_index, record) in transformed.iter().enumerate() {
            let context: RowContext = headers
                .iter()
                .cloned()
                .zip(record.iter().cloned())
                .collect();
            for (column_index, header) in headers.iter().enumerate() {
                let Some(config) = config_by_phys.get(header.as_str()) else {
                    continue;
                };
                let value = &record[column_index];
                for rule_id in &config.effective_strategies() {
                    for warning in self.transforms.validate_value(value, rule_id) {
                        warnings.push(format!(
                            "row {}, field '{}': {}",
                            row_index + 1,
                            config.alias,
                            warning
                        ));
                    }
                }
                for rule_id in &config.validations {
                    if let Some(message) = self.validations.validate(value, &context, rule_id) {
                        warnings.push(format!(
                            "row {}, field '{}': {}",
                            row_index + 1,
                            config.alias,
                            message
                        ));
                    }
                }
            }
        }

        // Project the visible output: synthetic `_`-prefixed columns, were a
        // backend to return them, stay internal.
        let visible_indices: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !header.starts_with('_'))
            .map(|(index, _)| index)
            .collect();
        let columns: Vec<RunColumn> = visible_indices
            .iter()
            .map(|&index| {
                let header = &headers[index];
                RunColumn {
                    name: config_by_phys
                        .get(header.as_str())
                        .map(|config| config.alias.clone())
                        .unwrap_or_else(|| header.clone()),
                    phys_alias: header.clone(),
                }
            })
            .collect();
        let rows: Vec<Vec<Value>> = transformed
            .iter()
            .map(|record| {
                visible_indices
                    .iter()
                    .map(|&index| record[index].clone())
                    .collect()
            })
            .collect();

        // Stage the post-processed rows for preview/export.
        let staged = ExtractedTable {
            table_name: RESULT_TABLE.to_owned(),
            columns: columns
                .iter()
                .map(|column| TableColumn::new(&column.phys_alias, &column.name))
                .collect(),
            rows: rows.clone(),
        };
        writer::materialize(&mut self.backend, &staged)?;

        info!(rows = rows.len(), warnings = warnings.len(), "run complete");
        Ok(RunOutput {
            columns,
            rows,
            warnings,
        })
    }

    /// Executes the single-region preview projection.
    pub fn preview_region(
        &mut self,
        store: &ConfigStore,
        region_id: &str,
    ) -> Result<QueryResult, SheetLoomError> {
        let state = store.state();
        self.sync_registries(state);
        let sql = plan::single_region_sql(
            region_id,
            &state.regions,
            &state.field_configs,
            &self.transforms,
        )?;
        Ok(self.backend.execute(&sql, &[])?)
    }

    /// Drops the staged result table and clears the configuration.
    pub fn reset(&mut self, store: &mut ConfigStore) -> Result<(), SheetLoomError> {
        self.backend.execute(
            &format!(
                "DROP TABLE IF EXISTS {}",
                crate::database::quote_ident(RESULT_TABLE)
            ),
            &[],
        )?;
        store.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::QueryField;
    use crate::region::Region;
    use crate::rules::validation::{ValidationKind, ValidationRule};
    use crate::spreadsheet::reference::CellRef;
    use crate::spreadsheet::{SheetBundle, SheetData};
    use anyhow::Result;
    use serde_json::json;

    /// Scripted backend: records every statement, answers the plan SELECT
    /// with a canned result, everything else with an empty one.
    struct ScriptedBackend {
        log: Vec<String>,
        plan_result: QueryResult,
    }

    impl ScriptedBackend {
        fn new(plan_result: QueryResult) -> Self {
            Self {
                log: Vec::new(),
                plan_result,
            }
        }
    }

    impl SqlBackend for ScriptedBackend {
        fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
            self.log.push(sql.to_owned());
            if sql.starts_with("SELECT") && !sql.contains("information_schema") {
                Ok(self.plan_result.clone())
            } else {
                Ok(QueryResult::default())
            }
        }
    }

    fn plan_result(fields: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult {
            fields: fields
                .iter()
                .map(|name| QueryField {
                    name: name.to_string(),
                })
                .collect(),
            rows: rows
                .into_iter()
                .map(|row| {
                    fields
                        .iter()
                        .map(|name| name.to_string())
                        .zip(row)
                        .collect()
                })
                .collect(),
        }
    }

    fn workbook() -> SheetBundle {
        let mut bundle = SheetBundle::new();
        bundle.insert(
            "S1".to_owned(),
            SheetData {
                matrix: vec![
                    vec![json!("Name"), json!("Age")],
                    vec![json!(" alice "), json!(30)],
                    vec![json!("bob"), json!(41)],
                ],
                merges: Vec::new(),
                declared_range: None,
            },
        );
        bundle
    }

    fn seeded_store() -> ConfigStore {
        let mut store = ConfigStore::new();
        store.load_workbook(workbook());
        let mut region = Region::new("sales", "S1");
        region.id = "r1".to_owned();
        region.start = Some(CellRef::new(0, 0));
        region.end = Some(CellRef::new(2, 1));
        store.upsert_region(region);
        store
    }

    #[test]
    fn save_regions_materializes_and_clears_dirty() {
        let mut store = seeded_store();
        let mut engine = Engine::new(ScriptedBackend::new(QueryResult::default()));
        engine.save_regions(&mut store).unwrap();

        let region = &store.state().regions[0];
        assert_eq!(region.table_name.as_deref(), Some("t_r1"));
        assert!(!region.dirty);

        let log = &engine.backend_mut().log;
        assert!(log[0].starts_with("DROP TABLE IF EXISTS \"t_r1\""));
        assert!(log[1].starts_with("CREATE TABLE \"t_r1\""));
        assert!(log[2].starts_with("INSERT INTO \"t_r1\""));
    }

    #[test]
    fn save_regions_blocks_on_missing_start() {
        let mut store = ConfigStore::new();
        store.load_workbook(workbook());
        store.upsert_region(Region::new("broken", "S1"));
        let mut engine = Engine::new(ScriptedBackend::new(QueryResult::default()));
        assert!(engine.save_regions(&mut store).is_err());
    }

    #[test]
    fn save_regions_skips_missing_sheet() {
        let mut store = ConfigStore::new();
        store.load_workbook(workbook());
        let mut region = Region::new("ghost", "NoSuchSheet");
        region.start = Some(CellRef::new(0, 0));
        store.upsert_region(region);
        let mut engine = Engine::new(ScriptedBackend::new(QueryResult::default()));
        engine.save_regions(&mut store).unwrap();
        assert!(engine.backend_mut().log.is_empty());
    }

    #[test]
    fn refresh_fields_computes_and_preserves_edits() {
        let mut store = seeded_store();
        let mut engine = Engine::new(ScriptedBackend::new(QueryResult::default()));
        engine.save_regions(&mut store).unwrap();
        engine.refresh_fields(&mut store).unwrap();

        let fields = store.state().field_configs.clone();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "Name");
        assert_eq!(fields[0].phys_alias, "t_r1#A");

        // Edit, refresh again: the edit survives.
        let mut edited = fields;
        edited[0].alias = "Customer".to_owned();
        edited[0].strategies = vec!["trim".to_owned()];
        edited[1].hidden = true;
        store.set_field_configs(edited);
        engine.refresh_fields(&mut store).unwrap();

        let fields = &store.state().field_configs;
        assert_eq!(fields[0].alias, "Customer");
        assert_eq!(fields[0].strategies, vec!["trim"]);
        assert!(fields[1].hidden);
    }

    #[test]
    fn run_applies_scalar_rules_and_stages_result() {
        let mut store = seeded_store();
        let result = plan_result(
            &["t_r1#A", "t_r1#B"],
            vec![
                vec![json!(" alice "), json!("30")],
                vec![json!("bob"), json!("41")],
            ],
        );
        let mut engine = Engine::new(ScriptedBackend::new(result));
        engine.refresh_fields(&mut store).unwrap();

        let mut fields = store.state().field_configs.clone();
        fields[0].strategies = vec!["trim".to_owned(), "upper".to_owned()];
        store.set_field_configs(fields);

        let output = engine.run(&mut store).unwrap();
        assert_eq!(
            output.columns,
            vec![
                RunColumn {
                    name: "Name".to_owned(),
                    phys_alias: "t_r1#A".to_owned()
                },
                RunColumn {
                    name: "Age".to_owned(),
                    phys_alias: "t_r1#B".to_owned()
                },
            ]
        );
        assert_eq!(output.rows[0], vec![json!("ALICE"), json!("30")]);
        assert_eq!(output.rows[1], vec![json!("BOB"), json!("41")]);
        assert!(output.warnings.is_empty());

        // The post-processed rows were staged for preview/export.
        let log = &engine.backend_mut().log;
        assert!(log.iter().any(|sql| sql.starts_with("CREATE TABLE \"t_result\"")));
        let staged_insert = log
            .iter()
            .find(|sql| sql.starts_with("INSERT INTO \"t_result\""))
            .unwrap();
        assert!(staged_insert.contains("VALUES"));
    }

    #[test]
    fn run_collects_rule_and_validation_warnings() {
        let mut store = seeded_store();
        let result = plan_result(
            &["t_r1#A", "t_r1#B"],
            vec![vec![json!("alice"), json!("not a number")]],
        );
        let mut engine = Engine::new(ScriptedBackend::new(result));
        engine.refresh_fields(&mut store).unwrap();

        let mut fields = store.state().field_configs.clone();
        // precision fails on "not a number": value reverts, one warning.
        fields[1].strategies = vec!["precision".to_owned()];
        fields[1].validations = vec!["positive".to_owned()];
        store.set_field_configs(fields);
        store.set_validation_rules(vec![ValidationRule {
            id: "positive".to_owned(),
            name: "must be positive".to_owned(),
            kind: ValidationKind::Script {
                code: "num(value) > 0 ? true : 'not positive'".to_owned(),
            },
        }]);

        let output = engine.run(&mut store).unwrap();
        assert_eq!(output.rows[0][1], json!("not a number"));
        // One failed-rule warning, one format warning, one validation error.
        assert_eq!(output.warnings.len(), 3);
        assert!(output.warnings[0].contains("Round to 2 decimals"));
        assert!(output
            .warnings
            .iter()
            .any(|warning| warning.contains("must be positive")));
    }

    #[test]
    fn reset_drops_result_table_and_clears_state() {
        let mut store = seeded_store();
        let mut engine = Engine::new(ScriptedBackend::new(QueryResult::default()));
        engine.reset(&mut store).unwrap();
        assert!(store.state().regions.is_empty());
        assert_eq!(
            engine.backend_mut().log[0],
            "DROP TABLE IF EXISTS \"t_result\""
        );
    }
}
