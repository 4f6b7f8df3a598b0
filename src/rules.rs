//! Processing-rules document: transformation rules, field mappings and the
//! error-handling policy.
//!
//! The document is deserialised into `*Doc` shapes and then compiled into a
//! [`RuleSet`]: conditions are parsed, actions are checked against the input
//! schema, and every rule is indexed by the output columns it binds. Nothing
//! is re-validated per record.

use std::{collections::HashMap, fs, path::Path, str::FromStr};

use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    data::{
        CANONICAL_DATE_FORMAT, Record, Value, default_date_formats, deserialize_optional_scalar,
        deserialize_scalar, parse_naive_date,
    },
    error::{FieldFailure, SchemaError},
    expr::Condition,
    policy::ErrorHandlingPolicy,
    schema::{InputSchema, OutputSchema},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRules {
    pub processing_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id_field: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub date_formats: Vec<String>,
    #[serde(default)]
    pub transformation_rules: Vec<TransformationRuleDoc>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub error_handling: ErrorHandlingPolicy,
}

impl ProcessingRules {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("Opening rules file {path:?}"))?;
        let rules = Self::from_yaml_str(&raw).with_context(|| format!("Loading rules {path:?}"))?;
        Ok(rules)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, SchemaError> {
        serde_yaml::from_str(input).map_err(|err| SchemaError::Document {
            document: "processing rules".to_string(),
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationRuleDoc {
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_field: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_fields: Vec<String>,
    #[serde(default)]
    pub logic: RuleLogicDoc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleLogicDoc {
    #[serde(default)]
    pub conditions: Vec<ConditionalActionDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_action: Option<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalActionDoc {
    pub condition: String,
    pub action: Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingKind {
    DirectCopy,
    DefaultValue,
    StringConversion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub output_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_field: Option<String>,
    pub transformation: MappingKind,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_value: Option<String>,
}

/// One argument of an action: a field reference or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionArg {
    Field {
        field: String,
    },
    Literal {
        #[serde(deserialize_with = "deserialize_scalar")]
        literal: String,
    },
}

impl ActionArg {
    fn field(&self) -> Option<&str> {
        match self {
            ActionArg::Field { field } => Some(field),
            ActionArg::Literal { .. } => None,
        }
    }

    fn value<'a>(&'a self, record: &'a Record) -> Result<Value, FieldFailure> {
        match self {
            ActionArg::Field { field } => field_value(record, field).cloned(),
            ActionArg::Literal { literal } => Ok(Value::String(literal.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Assign a fixed value.
    Literal {
        #[serde(deserialize_with = "deserialize_scalar")]
        value: String,
    },
    CopyField {
        field: String,
    },
    Concat {
        parts: Vec<ActionArg>,
    },
    Absolute {
        field: String,
    },
    /// Flip the sign of a numeric field.
    Negate {
        field: String,
    },
    /// Map a signed amount to a side indicator; zero counts as positive.
    SignIndicator {
        field: String,
        #[serde(default = "default_positive_indicator")]
        positive: String,
        #[serde(default = "default_negative_indicator")]
        negative: String,
    },
    ReformatDate {
        field: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        input_formats: Vec<String>,
        #[serde(default = "default_output_date_format")]
        output_format: String,
    },
    Arithmetic {
        left: ActionArg,
        op: ArithmeticOp,
        right: ActionArg,
    },
}

fn default_positive_indicator() -> String {
    "C".to_string()
}

fn default_negative_indicator() -> String {
    "D".to_string()
}

fn default_output_date_format() -> String {
    CANONICAL_DATE_FORMAT.to_string()
}

fn field_value<'a>(record: &'a Record, field: &str) -> Result<&'a Value, FieldFailure> {
    record.get(field).ok_or_else(|| FieldFailure::MissingField {
        field: field.to_string(),
    })
}

fn numeric(value: &Value, field: Option<&str>) -> Result<Decimal, FieldFailure> {
    if value.is_blank() {
        return Err(FieldFailure::MissingField {
            field: field.unwrap_or("<literal>").to_string(),
        });
    }
    value.to_decimal().ok_or_else(|| FieldFailure::TypeCoercion {
        value: value.as_display(),
        target: "decimal".to_string(),
    })
}

fn invalid_strftime(format: &str) -> bool {
    StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Literal { .. } => "literal",
            Action::CopyField { .. } => "copy_field",
            Action::Concat { .. } => "concat",
            Action::Absolute { .. } => "absolute",
            Action::Negate { .. } => "negate",
            Action::SignIndicator { .. } => "sign_indicator",
            Action::ReformatDate { .. } => "reformat_date",
            Action::Arithmetic { .. } => "arithmetic",
        }
    }

    /// Input fields the action reads.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Action::Literal { .. } => Vec::new(),
            Action::CopyField { field }
            | Action::Absolute { field }
            | Action::Negate { field }
            | Action::SignIndicator { field, .. }
            | Action::ReformatDate { field, .. } => vec![field.as_str()],
            Action::Concat { parts } => parts.iter().filter_map(ActionArg::field).collect(),
            Action::Arithmetic { left, right, .. } => {
                [left, right].into_iter().filter_map(ActionArg::field).collect()
            }
        }
    }

    fn check(&self) -> Result<(), String> {
        match self {
            Action::Concat { parts } if parts.is_empty() => {
                Err("concat requires at least one part".to_string())
            }
            Action::ReformatDate {
                input_formats,
                output_format,
                ..
            } => {
                if let Some(bad) = input_formats
                    .iter()
                    .chain(std::iter::once(output_format))
                    .find(|f| f.trim().is_empty() || invalid_strftime(f))
                {
                    return Err(format!("invalid date format '{bad}'"));
                }
                Ok(())
            }
            Action::Arithmetic { left, right, .. } => {
                for arg in [left, right] {
                    if let ActionArg::Literal { literal } = arg
                        && Decimal::from_str(literal.trim()).is_err()
                    {
                        return Err(format!("arithmetic literal '{literal}' is not a number"));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Computes the action's value for a record. `date_formats` are the
    /// engine-wide accepted input patterns, used when the action lists none.
    pub fn apply(&self, record: &Record, date_formats: &[String]) -> Result<Value, FieldFailure> {
        match self {
            Action::Literal { value } => Ok(Value::String(value.clone())),
            Action::CopyField { field } => field_value(record, field).cloned(),
            Action::Concat { parts } => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&part.value(record)?.as_display());
                }
                Ok(Value::String(out))
            }
            Action::Absolute { field } => {
                let amount = numeric(field_value(record, field)?, Some(field))?;
                Ok(Value::Decimal(amount.abs()))
            }
            Action::Negate { field } => {
                let amount = numeric(field_value(record, field)?, Some(field))?;
                Ok(Value::Decimal(-amount))
            }
            Action::SignIndicator {
                field,
                positive,
                negative,
            } => {
                let amount = numeric(field_value(record, field)?, Some(field))?;
                let side = if amount.is_sign_negative() && !amount.is_zero() {
                    negative
                } else {
                    positive
                };
                Ok(Value::String(side.clone()))
            }
            Action::ReformatDate {
                field,
                input_formats,
                output_format,
            } => {
                let value = field_value(record, field)?;
                let date = match value {
                    Value::Date(date) => *date,
                    blank if blank.is_blank() => return Ok(Value::Null),
                    other => {
                        let accepted = if input_formats.is_empty() {
                            date_formats
                        } else {
                            input_formats.as_slice()
                        };
                        let raw = other.as_display();
                        parse_naive_date(&raw, accepted).ok_or_else(|| FieldFailure::DateFormat {
                            value: raw.clone(),
                            accepted: accepted.join(", "),
                        })?
                    }
                };
                Ok(Value::String(date.format(output_format).to_string()))
            }
            Action::Arithmetic { left, op, right } => {
                let l = numeric(&left.value(record)?, left.field())?;
                let r = numeric(&right.value(record)?, right.field())?;
                let result = match op {
                    ArithmeticOp::Add => l.checked_add(r),
                    ArithmeticOp::Subtract => l.checked_sub(r),
                    ArithmeticOp::Multiply => l.checked_mul(r),
                    ArithmeticOp::Divide => {
                        if r.is_zero() {
                            return Err(FieldFailure::Transformation(format!(
                                "division by zero ({l} / {r})"
                            )));
                        }
                        l.checked_div(r)
                    }
                };
                result.map(Value::Decimal).ok_or_else(|| {
                    FieldFailure::Transformation(format!("arithmetic overflow in {op:?}"))
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub condition: Condition,
    pub action: Action,
}

#[derive(Debug, Clone)]
pub struct TransformationRule {
    pub rule_id: String,
    pub description: String,
    pub output_fields: Vec<String>,
    pub branches: Vec<Branch>,
    pub default_action: Option<Action>,
}

/// Which part of a rule produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleBranch {
    /// Zero-based index of the first matching condition.
    Condition(usize),
    DefaultAction,
}

impl TransformationRule {
    /// First-match-wins evaluation. `None` when no condition matched and the
    /// rule has no default action.
    pub fn evaluate(
        &self,
        record: &Record,
        date_formats: &[String],
    ) -> Option<(RuleBranch, Result<Value, FieldFailure>)> {
        if let Some((index, branch)) = self
            .branches
            .iter()
            .enumerate()
            .find(|(_, branch)| branch.condition.evaluate(record))
        {
            debug!(
                "Rule '{}' matched condition {} '{}'",
                self.rule_id,
                index + 1,
                branch.condition
            );
            return Some((
                RuleBranch::Condition(index),
                branch.action.apply(record, date_formats),
            ));
        }
        self.default_action
            .as_ref()
            .map(|action| (RuleBranch::DefaultAction, action.apply(record, date_formats)))
    }
}

/// Compiled, read-only form of a processing-rules document.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub processing_name: String,
    pub version: String,
    pub record_id_field: Option<String>,
    pub date_formats: Vec<String>,
    pub field_mappings: Vec<FieldMapping>,
    pub policy: ErrorHandlingPolicy,
    rules: Vec<TransformationRule>,
    by_column: HashMap<String, usize>,
}

impl RuleSet {
    pub fn compile(
        doc: ProcessingRules,
        input: &InputSchema,
        output: &OutputSchema,
    ) -> Result<Self, SchemaError> {
        let check_input = |rule: &str, field: &str| {
            if input.column(field).is_some() {
                Ok(())
            } else {
                Err(SchemaError::UnknownInputField {
                    rule: rule.to_string(),
                    field: field.to_string(),
                })
            }
        };
        let check_output = |rule: &str, column: &str| {
            if output.column(column).is_some() {
                Ok(())
            } else {
                Err(SchemaError::UnknownOutputColumn {
                    rule: rule.to_string(),
                    column: column.to_string(),
                })
            }
        };

        let mut rules: Vec<TransformationRule> = Vec::with_capacity(doc.transformation_rules.len());
        let mut by_column: HashMap<String, usize> = HashMap::new();
        for rule_doc in doc.transformation_rules {
            let rule_id = rule_doc.rule_id;
            if rules.iter().any(|r| r.rule_id == rule_id) {
                return Err(SchemaError::DuplicateRule(rule_id));
            }

            let mut output_fields = rule_doc.output_fields;
            if let Some(single) = rule_doc.output_field
                && !output_fields.contains(&single)
            {
                output_fields.insert(0, single);
            }
            if output_fields.is_empty() {
                return Err(SchemaError::UnboundRule { rule: rule_id });
            }

            let mut branches = Vec::with_capacity(rule_doc.logic.conditions.len());
            for pair in rule_doc.logic.conditions {
                let condition =
                    Condition::parse(&pair.condition).map_err(|source| SchemaError::Expression {
                        rule: rule_id.clone(),
                        source,
                    })?;
                for field in condition.references() {
                    check_input(&rule_id, field)?;
                }
                branches.push(Branch {
                    condition,
                    action: pair.action,
                });
            }

            let actions = branches
                .iter()
                .map(|b| &b.action)
                .chain(rule_doc.logic.default_action.as_ref());
            for action in actions {
                action.check().map_err(|message| SchemaError::InvalidAction {
                    rule: rule_id.clone(),
                    message,
                })?;
                for field in action.fields() {
                    check_input(&rule_id, field)?;
                }
            }

            let index = rules.len();
            for column in &output_fields {
                check_output(&rule_id, column)?;
                if let Some(existing) = by_column.insert(column.clone(), index) {
                    return Err(SchemaError::ConflictingRules {
                        column: column.clone(),
                        first: rules[existing].rule_id.clone(),
                        second: rule_id,
                    });
                }
            }
            rules.push(TransformationRule {
                rule_id,
                description: rule_doc.description,
                output_fields,
                branches,
                default_action: rule_doc.logic.default_action,
            });
        }

        for mapping in &doc.field_mappings {
            let label = format!("field_mapping:{}", mapping.output_field);
            check_output(&label, &mapping.output_field)?;
            match mapping.transformation {
                MappingKind::DirectCopy | MappingKind::StringConversion => {
                    let field = mapping.input_field.as_deref().ok_or_else(|| {
                        SchemaError::InvalidAction {
                            rule: label.clone(),
                            message: "input_field is required".to_string(),
                        }
                    })?;
                    check_input(&label, field)?;
                }
                MappingKind::DefaultValue => {
                    if mapping.default_value.is_none() {
                        return Err(SchemaError::InvalidAction {
                            rule: label,
                            message: "default_value is required".to_string(),
                        });
                    }
                }
            }
        }

        if let Some(field) = doc.record_id_field.as_deref() {
            check_input("record_id_field", field)?;
        }

        let date_formats = if doc.date_formats.is_empty() {
            default_date_formats()
        } else {
            if let Some(bad) = doc
                .date_formats
                .iter()
                .find(|f| f.trim().is_empty() || invalid_strftime(f))
            {
                return Err(SchemaError::Document {
                    document: "processing rules".to_string(),
                    message: format!("invalid date format '{bad}'"),
                });
            }
            doc.date_formats
        };

        Ok(RuleSet {
            processing_name: doc.processing_name,
            version: doc.version,
            record_id_field: doc.record_id_field,
            date_formats,
            field_mappings: doc.field_mappings,
            policy: doc.error_handling,
            rules,
            by_column,
        })
    }

    pub fn rules(&self) -> &[TransformationRule] {
        &self.rules
    }

    pub fn rule_for(&self, column: &str) -> Option<&TransformationRule> {
        self.by_column.get(column).map(|&index| &self.rules[index])
    }

    pub fn mapping_for(&self, column: &str) -> Option<&FieldMapping> {
        self.field_mappings.iter().rev().find(|m| m.output_field == column)
    }
}
