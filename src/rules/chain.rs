//! Rule chain application: composing rule chains into nested SQL expressions
//! at plan time, and applying scalar chains to result values with row context
//! where SQL cannot express the rule.

use crate::rules::{RowContext, RuleResolver};
use serde_json::Value;
use tracing::warn;

/// Outcome of a scalar chain: the (possibly reverted) value and any warning
/// produced by a failing rule.
#[derive(Clone, Debug)]
pub struct TransformOutcome {
    pub value: Value,
    pub warnings: Vec<String>,
}

/// Wraps a column expression with the SQL representation of each rule in the
/// chain, left to right: `[trim, upper]` composes as `UPPER(TRIM(col))`.
///
/// The sentinel id `none`, unresolved ids and scalar-only rules are no-ops at
/// this layer (the scalar side picks the latter up after execution), and a
/// literal `NULL` passes through unwrapped.
pub fn apply_rules_to_expr(
    column_expr: &str,
    rule_ids: &[String],
    rules: &dyn RuleResolver,
) -> String {
    if column_expr == "NULL" {
        return column_expr.to_owned();
    }
    rule_ids.iter().fold(column_expr.to_owned(), |expr, id| {
        if id == "none" {
            return expr;
        }
        match rules.resolve(id).and_then(|rule| rule.sql_expr(&expr)) {
            Some(wrapped) => wrapped,
            None => expr,
        }
    })
}

/// Applies the scalar side of a rule chain to a single value.
///
/// Fail-closed: the first failing rule aborts the remaining chain and the
/// original, untransformed input value is returned together with one warning
/// naming the rule, never a partially-transformed value. SQL-only and
/// unresolved ids are skipped.
pub fn apply_transforms(
    value: &Value,
    row: &RowContext,
    rule_ids: &[String],
    rules: &dyn RuleResolver,
) -> TransformOutcome {
    let mut result = value.clone();
    for id in rule_ids {
        let Some(rule) = rules.resolve(id) else {
            continue;
        };
        if !rule.engine.has_scalar() {
            continue;
        }
        match rule.transform(&result, row) {
            Ok(transformed) => result = transformed,
            Err(error) => {
                warn!(rule = rule.name.as_str(), %error, "scalar rule failed, value reverted");
                return TransformOutcome {
                    value: value.clone(),
                    warnings: vec![format!("Rule '{}' failed: {}", rule.name, error)],
                };
            }
        }
    }
    TransformOutcome {
        value: result,
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{CustomRule, TransformRegistry};
    use serde_json::json;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn sql_chain_nests_left_to_right() {
        let registry = TransformRegistry::new();
        let expr = apply_rules_to_expr("\"A\"", &ids(&["trim", "upper"]), &registry);
        assert_eq!(expr, "UPPER(TRIM(\"A\"))");
    }

    #[test]
    fn sql_chain_skips_none_unknown_and_scalar_only() {
        let registry = TransformRegistry::new();
        let expr = apply_rules_to_expr(
            "\"A\"",
            &ids(&["none", "missing", "precision", "lower"]),
            &registry,
        );
        assert_eq!(expr, "LOWER(\"A\")");
    }

    #[test]
    fn null_expression_passes_through_unwrapped() {
        let registry = TransformRegistry::new();
        assert_eq!(apply_rules_to_expr("NULL", &ids(&["upper"]), &registry), "NULL");
    }

    #[test]
    fn scalar_chain_composes() {
        let registry = TransformRegistry::new();
        let outcome = apply_transforms(
            &json!(" foo "),
            &RowContext::new(),
            &ids(&["trim", "upper"]),
            &registry,
        );
        assert_eq!(outcome.value, json!("FOO"));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn failing_rule_reverts_to_original_with_one_warning() {
        let mut registry = TransformRegistry::new();
        registry.set_custom_rules(&[CustomRule {
            id: "boom".to_owned(),
            name: "boom".to_owned(),
            code: "num('not a number')".to_owned(),
        }]);
        let outcome = apply_transforms(
            &json!(" foo "),
            &RowContext::new(),
            &ids(&["trim", "boom", "upper"]),
            &registry,
        );
        // Not " foo " trimmed: the original input comes back untouched.
        assert_eq!(outcome.value, json!(" foo "));
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("boom"));
    }

    #[test]
    fn custom_rule_with_row_context() {
        let mut registry = TransformRegistry::new();
        registry.set_custom_rules(&[CustomRule {
            id: "scale".to_owned(),
            name: "scale by Qty".to_owned(),
            code: "num(value) * num(row['Qty'])".to_owned(),
        }]);
        let mut row = RowContext::new();
        row.insert("Qty".to_owned(), json!("4"));
        let outcome = apply_transforms(&json!("2.5"), &row, &ids(&["scale"]), &registry);
        assert_eq!(outcome.value, json!(10.0));
    }

    #[test]
    fn sql_only_rules_are_skipped_by_the_scalar_side() {
        // `upper` has engine Both, so it applies; unresolved ids are skipped.
        let registry = TransformRegistry::new();
        let outcome = apply_transforms(
            &json!("x"),
            &RowContext::new(),
            &ids(&["missing", "upper"]),
            &registry,
        );
        assert_eq!(outcome.value, json!("X"));
    }
}
