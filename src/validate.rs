//! Record validation against a schema.
//!
//! Validation never fails and never mutates the record; it only reports.
//! Columns are checked in declared order (populated, type, length), followed
//! by the schema's validation rules in declared order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    data::{Record, Value, coerce, default_date_formats},
    schema::{ColumnType, Schema, SchemaColumn, ValidationRule},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    MissingRequired,
    TypeMismatch,
    LengthMismatch,
    BusinessRuleFailed,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::MissingRequired => "MISSING_REQUIRED",
            ViolationKind::TypeMismatch => "TYPE_MISMATCH",
            ViolationKind::LengthMismatch => "LENGTH_MISMATCH",
            ViolationKind::BusinessRuleFailed => "BUSINESS_RULE_FAILED",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.field, self.kind, self.message)
    }
}

pub fn validate<C: SchemaColumn>(record: &Record, schema: &Schema<C>) -> Vec<Violation> {
    validate_with_formats(record, schema, &default_date_formats())
}

pub fn validate_with_formats<C: SchemaColumn>(
    record: &Record,
    schema: &Schema<C>,
    date_formats: &[String],
) -> Vec<Violation> {
    let mut violations = Vec::new();

    for column in schema.columns() {
        let spec = column.spec();
        let value = record.get(&spec.name);
        let populated = value.is_some_and(|v| !v.is_blank());
        if !populated {
            if column.must_be_populated() {
                violations.push(Violation::new(
                    &spec.name,
                    ViolationKind::MissingRequired,
                    match value {
                        None => format!("Required field '{}' is absent", spec.name),
                        Some(_) => format!("Required field '{}' is empty", spec.name),
                    },
                ));
            }
            continue;
        }
        let Some(value) = value else { continue };

        if let Some(message) = type_mismatch(value, spec.data_type, date_formats) {
            violations.push(Violation::new(&spec.name, ViolationKind::TypeMismatch, message));
            continue;
        }
        if let Some(length) = spec.length {
            let rendered = value.as_display().chars().count();
            if rendered > length {
                violations.push(Violation::new(
                    &spec.name,
                    ViolationKind::LengthMismatch,
                    format!("Value length {rendered} exceeds declared length {length}"),
                ));
            }
        }
    }

    for rule in &schema.validation_rules {
        check_rule(rule, record, &mut violations);
    }
    violations
}

fn type_mismatch(value: &Value, data_type: ColumnType, date_formats: &[String]) -> Option<String> {
    coerce(value, &data_type, date_formats).err().map(|failure| {
        format!(
            "Value '{}' does not fit declared type {}: {failure}",
            value.as_display(),
            data_type
        )
    })
}

fn check_rule(rule: &ValidationRule, record: &Record, violations: &mut Vec<Violation>) {
    match rule {
        ValidationRule::RequiredFields { fields } => {
            for field in fields {
                let already_reported = violations
                    .iter()
                    .any(|v| v.kind == ViolationKind::MissingRequired && v.field == *field);
                if !record.is_populated(field) && !already_reported {
                    violations.push(Violation::new(
                        field,
                        ViolationKind::MissingRequired,
                        format!("Required field '{field}' is missing or empty"),
                    ));
                }
            }
        }
        ValidationRule::AllowedValues {
            field,
            valid_values,
        } => {
            if let Some(value) = record.get(field).filter(|v| !v.is_blank()) {
                let rendered = value.as_display();
                if !valid_values.iter().any(|allowed| *allowed == rendered) {
                    violations.push(Violation::new(
                        field,
                        ViolationKind::BusinessRuleFailed,
                        format!(
                            "Value '{rendered}' is not one of [{}]",
                            valid_values.join(", ")
                        ),
                    ));
                }
            }
        }
        ValidationRule::Pattern {
            field,
            pattern,
            compiled,
        } => {
            if let Some(value) = record.get(field).filter(|v| !v.is_blank())
                && let Some(regex) = compiled.as_ref()
            {
                let rendered = value.as_display();
                if !regex.is_match(&rendered) {
                    violations.push(Violation::new(
                        field,
                        ViolationKind::BusinessRuleFailed,
                        format!("Value '{rendered}' does not match pattern '{pattern}'"),
                    ));
                }
            }
        }
        ValidationRule::Condition {
            condition,
            message,
            compiled,
        } => {
            if let Some(parsed) = compiled.as_ref()
                && !parsed.evaluate(record)
            {
                violations.push(Violation::new(
                    parsed.references().join(","),
                    ViolationKind::BusinessRuleFailed,
                    message
                        .clone()
                        .unwrap_or_else(|| format!("Condition '{condition}' is not satisfied")),
                ));
            }
        }
    }
}
