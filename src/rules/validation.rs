//! Validation rules: cross-field consistency checks evaluated against result
//! rows. Config-mode rules parameterize a built-in operator (sum of parts,
//! average of parts); script-mode rules run a restricted expression that
//! either vetoes the value (`false`) or returns a message string.

use crate::rules::{expr, value_text, RowContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numeric tolerance applied when comparing aggregates.
const DEFAULT_TOLERANCE: f64 = 0.001;

/// How a validation rule decides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ValidationKind {
    Config {
        /// Built-in operator id: `sum_equals` or `avg_equals`.
        operator: String,
        #[serde(default)]
        source_fields: Vec<String>,
        #[serde(default)]
        tolerance: Option<f64>,
    },
    Script {
        code: String,
    },
}

/// One validation rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: String,
    pub name: String,
    pub kind: ValidationKind,
}

/// Registry resolving validation rule ids. Custom rules shadow the built-in
/// operators by id.
#[derive(Default)]
pub struct ValidationRegistry {
    custom: Vec<ValidationRule>,
}

impl ValidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_custom_rules(&mut self, rules: &[ValidationRule]) {
        self.custom = rules.to_vec();
    }

    pub fn rule(&self, id: &str) -> Option<ValidationRule> {
        if let Some(rule) = self.custom.iter().find(|rule| rule.id == id) {
            return Some(rule.clone());
        }
        // The bare built-in operators are addressable directly.
        match id {
            "sum_equals" | "avg_equals" => Some(ValidationRule {
                id: id.to_owned(),
                name: id.to_owned(),
                kind: ValidationKind::Config {
                    operator: id.to_owned(),
                    source_fields: Vec::new(),
                    tolerance: None,
                },
            }),
            _ => None,
        }
    }

    /// Validates one value against one rule. Returns the failure message, or
    /// None when the value passes (or the rule id does not resolve).
    pub fn validate(&self, value: &Value, row: &RowContext, rule_id: &str) -> Option<String> {
        let rule = self.rule(rule_id)?;
        match &rule.kind {
            ValidationKind::Config {
                operator,
                source_fields,
                tolerance,
            } => run_operator(
                operator,
                &rule.name,
                value,
                row,
                source_fields,
                tolerance.unwrap_or(DEFAULT_TOLERANCE),
            ),
            ValidationKind::Script { code } => match expr::evaluate(code, value, row) {
                Ok(Value::Bool(false)) => Some(format!("Validation failed: {}", rule.name)),
                Ok(Value::String(message)) => Some(message),
                Ok(_) => None,
                Err(error) => Some(format!("Validation '{}' errored: {}", rule.name, error)),
            },
        }
    }
}

/// Lenient numeric read used by the aggregate operators: thousands
/// separators are stripped and anything non-numeric counts as zero.
fn loose_number(value: Option<&Value>) -> f64 {
    value
        .map(|value| value_text(value).replace(',', ""))
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(0.0)
}

fn run_operator(
    operator: &str,
    name: &str,
    value: &Value,
    row: &RowContext,
    source_fields: &[String],
    tolerance: f64,
) -> Option<String> {
    let target = loose_number(Some(value));
    let sum: f64 = source_fields
        .iter()
        .map(|field| loose_number(row.get(field)))
        .sum();

    match operator {
        "sum_equals" => {
            if (sum - target).abs() > tolerance {
                Some(format!(
                    "{}: sum of parts ({:.2}) does not equal the value ({:.2})",
                    name, sum, target
                ))
            } else {
                None
            }
        }
        "avg_equals" => {
            if source_fields.is_empty() {
                return None;
            }
            let average = sum / source_fields.len() as f64;
            if (average - target).abs() > tolerance {
                Some(format!(
                    "{}: average of parts ({:.2}) does not equal the value ({:.2})",
                    name, average, target
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}
