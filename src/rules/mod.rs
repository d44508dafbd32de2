//! # Rules Module
//!
//! Data-cleaning rules and the registries that resolve them. A rule carries
//! up to three capabilities: an SQL expression builder (composed into the
//! generated plan), a scalar transform with row context (applied client-side
//! where SQL cannot express the rule), and a format validator used to flag
//! suspicious output values. Custom rules are restricted expressions over
//! `value` and `row` (see [`expr`]), never free-form code.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod chain;
pub mod expr;
pub mod validation;

/// One result row keyed by physical column name, used as rule context.
pub type RowContext = Map<String, Value>;

/// Errors raised while parsing or applying a rule.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Eval(String),
}

/// Where a rule can run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleEngine {
    /// Composed into the SQL plan only.
    Sql,
    /// Applied client-side to result values only.
    Scalar,
    /// Both representations available; SQL wins at plan time, the scalar
    /// side serves previews and validation.
    Both,
}

impl RuleEngine {
    pub fn has_sql(&self) -> bool {
        matches!(self, RuleEngine::Sql | RuleEngine::Both)
    }

    pub fn has_scalar(&self) -> bool {
        matches!(self, RuleEngine::Scalar | RuleEngine::Both)
    }
}

/// A user-authored rule: a restricted expression over `value` and `row`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomRule {
    pub id: String,
    pub name: String,
    pub code: String,
}

enum RuleBody {
    Builtin {
        sql_expr: Option<fn(&str) -> String>,
        transform: Option<fn(&Value, &RowContext) -> Result<Value, RuleError>>,
        validate: Option<fn(&Value) -> bool>,
    },
    Expression {
        code: String,
    },
}

/// A resolved cleaning rule.
pub struct Rule {
    pub id: String,
    pub name: String,
    pub engine: RuleEngine,
    body: RuleBody,
}

impl Rule {
    /// Wraps a column expression, when the rule has an SQL representation.
    pub fn sql_expr(&self, column_expr: &str) -> Option<String> {
        match &self.body {
            RuleBody::Builtin {
                sql_expr: Some(builder),
                ..
            } if self.engine.has_sql() => Some(builder(column_expr)),
            _ => None,
        }
    }

    /// Applies the scalar transform with row context.
    pub fn transform(&self, value: &Value, row: &RowContext) -> Result<Value, RuleError> {
        match &self.body {
            RuleBody::Builtin {
                transform: Some(apply),
                ..
            } => apply(value, row),
            RuleBody::Builtin { .. } => Ok(value.clone()),
            RuleBody::Expression { code } => expr::evaluate(code, value, row),
        }
    }

    /// Checks a value against the rule's format expectation, when it has one.
    pub fn validate(&self, value: &Value) -> Option<bool> {
        match &self.body {
            RuleBody::Builtin {
                validate: Some(check),
                ..
            } => Some(check(value)),
            _ => None,
        }
    }
}

/// Contract for resolving a rule id at plan-build or apply time.
/// Absence of an id is a no-op for the caller, never an error.
pub trait RuleResolver {
    fn resolve(&self, id: &str) -> Option<&Rule>;
}

/// The transform registry: built-in rules plus user-defined custom rules.
/// A custom rule with a built-in's id shadows it.
pub struct TransformRegistry {
    builtins: Vec<Rule>,
    custom: Vec<Rule>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self {
            builtins: builtin_rules(),
            custom: Vec::new(),
        }
    }

    /// Replaces the custom rule set (restricted expressions).
    pub fn set_custom_rules(&mut self, rules: &[CustomRule]) {
        self.custom = rules
            .iter()
            .map(|rule| Rule {
                id: rule.id.clone(),
                name: rule.name.clone(),
                engine: RuleEngine::Scalar,
                body: RuleBody::Expression {
                    code: rule.code.clone(),
                },
            })
            .collect();
    }

    /// Validates a value against one rule without transforming it, returning
    /// format warnings. Used to highlight suspicious already-transformed data.
    pub fn validate_value(&self, value: &Value, rule_id: &str) -> Vec<String> {
        let Some(rule) = self.resolve(rule_id) else {
            return Vec::new();
        };
        match rule.validate(value) {
            Some(false) => vec![format!("Value does not satisfy rule '{}'", rule.name)],
            _ => Vec::new(),
        }
    }
}

impl RuleResolver for TransformRegistry {
    fn resolve(&self, id: &str) -> Option<&Rule> {
        self.custom
            .iter()
            .find(|rule| rule.id == id)
            .or_else(|| self.builtins.iter().find(|rule| rule.id == id))
    }
}

/// Renders a value as plain text for string transforms.
/// Null reads as the empty string.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

/// Numeric coercion: numbers pass through, strings are parsed strictly.
pub(crate) fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn builtin_rules() -> Vec<Rule> {
    fn string_transform(value: &Value, apply: impl Fn(&str) -> String) -> Value {
        match value {
            Value::String(text) => Value::String(apply(text)),
            other => other.clone(),
        }
    }

    vec![
        Rule {
            id: "upper".to_owned(),
            name: "Uppercase".to_owned(),
            engine: RuleEngine::Both,
            body: RuleBody::Builtin {
                sql_expr: Some(|col| format!("UPPER({})", col)),
                transform: Some(|value, _| Ok(string_transform(value, str::to_uppercase))),
                validate: None,
            },
        },
        Rule {
            id: "lower".to_owned(),
            name: "Lowercase".to_owned(),
            engine: RuleEngine::Both,
            body: RuleBody::Builtin {
                sql_expr: Some(|col| format!("LOWER({})", col)),
                transform: Some(|value, _| Ok(string_transform(value, str::to_lowercase))),
                validate: None,
            },
        },
        Rule {
            id: "trim".to_owned(),
            name: "Trim whitespace".to_owned(),
            engine: RuleEngine::Both,
            body: RuleBody::Builtin {
                sql_expr: Some(|col| format!("TRIM({})", col)),
                transform: Some(|value, _| {
                    Ok(string_transform(value, |text| text.trim().to_owned()))
                }),
                validate: None,
            },
        },
        Rule {
            id: "date_format".to_owned(),
            name: "Format date (yyyy-MM-dd)".to_owned(),
            engine: RuleEngine::Scalar,
            body: RuleBody::Builtin {
                sql_expr: None,
                transform: Some(|value, _| {
                    if matches!(value, Value::Null) {
                        return Ok(value.clone());
                    }
                    let date = parse_date(&value_text(value))
                        .ok_or_else(|| RuleError::Eval("invalid date".to_owned()))?;
                    Ok(Value::String(date.format("%Y-%m-%d").to_string()))
                }),
                validate: Some(|value| {
                    matches!(value, Value::Null) || parse_date(&value_text(value)).is_some()
                }),
            },
        },
        Rule {
            id: "precision".to_owned(),
            name: "Round to 2 decimals".to_owned(),
            engine: RuleEngine::Scalar,
            body: RuleBody::Builtin {
                sql_expr: None,
                transform: Some(|value, _| {
                    let number = value_number(value)
                        .ok_or_else(|| RuleError::Eval("not a number".to_owned()))?;
                    Ok(Value::String(format!("{:.2}", number)))
                }),
                validate: Some(|value| value_number(value).is_some()),
            },
        },
        Rule {
            id: "thousands".to_owned(),
            name: "Add thousands separators".to_owned(),
            engine: RuleEngine::Scalar,
            body: RuleBody::Builtin {
                sql_expr: None,
                transform: Some(|value, _| {
                    let text = value_text(value).replace(',', "");
                    let number: f64 = text
                        .trim()
                        .parse()
                        .map_err(|_| RuleError::Eval("not a number".to_owned()))?;
                    // Preserve the decimal width of the input.
                    let decimals = text
                        .split_once('.')
                        .map(|(_, fraction)| fraction.len())
                        .unwrap_or(0);
                    Ok(Value::String(group_thousands(number, decimals)))
                }),
                validate: Some(|value| {
                    value_text(value).replace(',', "").trim().parse::<f64>().is_ok()
                }),
            },
        },
        Rule {
            id: "remove_thousands".to_owned(),
            name: "Strip thousands separators".to_owned(),
            engine: RuleEngine::Scalar,
            body: RuleBody::Builtin {
                sql_expr: None,
                transform: Some(|value, _| match value {
                    Value::Null => Ok(value.clone()),
                    other => Ok(Value::String(value_text(other).replace(',', ""))),
                }),
                validate: None,
            },
        },
    ]
}

/// Accepts the date layouts the spreadsheet bundle commonly carries.
fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    for layout in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, layout) {
            return Some(date);
        }
    }
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(datetime) = chrono::NaiveDateTime::parse_from_str(text, layout) {
            return Some(datetime.date());
        }
    }
    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|datetime| datetime.date_naive())
}

fn group_thousands(number: f64, decimals: usize) -> String {
    let rendered = format!("{:.*}", decimals, number.abs());
    let (integer, fraction) = match rendered.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (rendered.as_str(), None),
    };
    let mut grouped = String::new();
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let mut result = String::new();
    if number < 0.0 {
        result.push('-');
    }
    result.push_str(&grouped);
    if let Some(fraction) = fraction {
        result.push('.');
        result.push_str(fraction);
    }
    result
}
