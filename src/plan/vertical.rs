//! Vertical merge plan: one SELECT per region, NULL-padding the fields a
//! region does not feed, unioned and ordered by (region ordinal, row order)
//! so the output matches source appearance.

use crate::database::{quote_ident, REGION_ORDINAL_COLUMN, ROW_ORDER_COLUMN};
use crate::plan::{visible, NO_VISIBLE_FIELDS_SQL};
use crate::region::Region;
use crate::rules::chain::apply_rules_to_expr;
use crate::rules::RuleResolver;
use crate::schema::FieldConfig;

pub(super) fn build(
    regions: &[Region],
    configs: &[FieldConfig],
    rules: &dyn RuleResolver,
) -> String {
    let visible = visible(configs);
    if visible.is_empty() {
        return NO_VISIBLE_FIELDS_SQL.to_owned();
    }

    let selects: Vec<String> = regions
        .iter()
        .enumerate()
        .map(|(ordinal, region)| {
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
            format!(
                "SELECT {}, {} AS {}, {} FROM {}",
                parts.join(", "),
                ordinal,
                REGION_ORDINAL_COLUMN,
                quote_ident(ROW_ORDER_COLUMN),
                quote_ident(&region.physical_table())
            )
        })
        .collect();

    let projection: Vec<String> = visible
        .iter()
        .map(|config| quote_ident(&config.phys_alias))
        .collect();

    format!(
        "SELECT {} FROM ({}) AS t_union ORDER BY {}, {}",
        projection.join(", "),
        selects.join(" UNION ALL "),
        REGION_ORDINAL_COLUMN,
        quote_ident(ROW_ORDER_COLUMN)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::TransformRegistry;
    use crate::schema::FieldSource;
    use crate::spreadsheet::reference::CellRef;

    fn region(id: &str, table: &str) -> Region {
        let mut region = Region::new(id, "S1");
        region.id = id.to_owned();
        region.start = Some(CellRef::new(0, 0));
        region.table_name = Some(table.to_owned());
        region
    }

    fn source(region_id: &str, field: &str, display: &str) -> FieldSource {
        FieldSource {
            region_id: region_id.to_owned(),
            region_name: region_id.to_owned(),
            field_name: field.to_owned(),
            display_name: display.to_owned(),
            is_attribute: false,
        }
    }

    fn config(name: &str, phys: &str, sources: Vec<FieldSource>) -> FieldConfig {
        let mut config = FieldConfig::new(name, sources);
        config.phys_alias = phys.to_owned();
        config
    }

    /// Region A has Name, Age; region B has Name, City. Each select NULL-pads
    /// the field the region does not feed and the union is ordered by
    /// (region ordinal, row order).
    #[test]
    fn union_plan_null_pads_missing_sources() {
        let rules = TransformRegistry::new();
        let regions = vec![region("a", "t_a"), region("b", "t_b")];
        let configs = vec![
            config(
                "Name",
                "t_a#A",
                vec![source("a", "A", "Name"), source("b", "A", "Name")],
            ),
            config("Age", "t_a#B", vec![source("a", "B", "Age")]),
            config("City", "t_b#B", vec![source("b", "B", "City")]),
        ];

        let sql = build(&regions, &configs, &rules);
        assert_eq!(
            sql,
            "SELECT \"t_a#A\", \"t_a#B\", \"t_b#B\" FROM (\
             SELECT \"A\" AS \"t_a#A\", \"B\" AS \"t_a#B\", NULL AS \"t_b#B\", \
             0 AS _reg_idx, \"_row_idx\" FROM \"t_a\" \
             UNION ALL \
             SELECT \"A\" AS \"t_a#A\", NULL AS \"t_a#B\", \"B\" AS \"t_b#B\", \
             1 AS _reg_idx, \"_row_idx\" FROM \"t_b\"\
             ) AS t_union ORDER BY _reg_idx, \"_row_idx\""
        );
    }

    #[test]
    fn rule_chains_wrap_the_projection() {
        let rules = TransformRegistry::new();
        let regions = vec![region("a", "t_a")];
        let mut name = config("Name", "p", vec![source("a", "A", "Name")]);
        name.strategies = vec!["trim".to_owned(), "upper".to_owned()];

        let sql = build(&regions, &[name], &rules);
        assert!(sql.contains("UPPER(TRIM(\"A\")) AS \"p\""));
    }

    #[test]
    fn hidden_fields_are_not_projected() {
        let rules = TransformRegistry::new();
        let regions = vec![region("a", "t_a")];
        let mut name = config("Name", "p1", vec![source("a", "A", "Name")]);
        name.hidden = true;
        let age = config("Age", "p2", vec![source("a", "B", "Age")]);

        let sql = build(&regions, &[name, age], &rules);
        assert!(!sql.contains("\"p1\""));
        assert!(sql.contains("\"p2\""));
    }

    #[test]
    fn all_hidden_yields_sentinel() {
        let rules = TransformRegistry::new();
        let regions = vec![region("a", "t_a")];
        let mut name = config("Name", "p", vec![source("a", "A", "Name")]);
        name.hidden = true;
        assert_eq!(build(&regions, &[name], &rules), NO_VISIBLE_FIELDS_SQL);
    }

    #[test]
    fn null_padding_is_not_rule_wrapped() {
        let rules = TransformRegistry::new();
        let regions = vec![region("a", "t_a"), region("b", "t_b")];
        let mut age = config("Age", "p", vec![source("a", "B", "Age")]);
        age.strategies = vec!["upper".to_owned()];

        let sql = build(&regions, &[age], &rules);
        // Region b has no source: NULL stays bare, never UPPER(NULL).
        assert!(sql.contains("NULL AS \"p\""));
        assert!(!sql.contains("UPPER(NULL)"));
    }
}
