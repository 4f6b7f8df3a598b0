//! Error taxonomy for the conversion engine.
//!
//! Configuration-time failures ([`SchemaError`], [`ExpressionError`]) are
//! fatal and abort a run before any record is read. Per-field failures
//! ([`FieldFailure`]) are contained by the configured error-handling policy
//! and recorded in the diagnostics report.

use thiserror::Error;

use crate::policy::FailureCategory;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Schema '{schema}' has a column with an empty name at position {position}")]
    EmptyColumnName { schema: String, position: usize },

    #[error("Schema '{schema}' declares column '{column}' more than once")]
    DuplicateColumn { schema: String, column: String },

    #[error("Schema '{schema}': validation rule '{rule}' references unknown column '{column}'")]
    UnknownRuleField {
        schema: String,
        rule: String,
        column: String,
    },

    #[error("Unknown data_type '{token}'. Supported types: {supported}")]
    UnknownDataType { token: String, supported: String },

    #[error("Column '{column}': default '{value}' is not a valid {data_type}")]
    InvalidDefault {
        column: String,
        value: String,
        data_type: String,
    },

    #[error("Column '{column}': invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        column: String,
        pattern: String,
        reason: String,
    },

    #[error("Transformation rule id '{0}' is declared more than once")]
    DuplicateRule(String),

    #[error("Rule '{rule}' binds unknown output column '{column}'")]
    UnknownOutputColumn { rule: String, column: String },

    #[error("Rule '{rule}' references unknown input field '{field}'")]
    UnknownInputField { rule: String, field: String },

    #[error("Rule '{rule}' must bind at least one output column")]
    UnboundRule { rule: String },

    #[error("Output column '{column}' is bound to both rule '{first}' and rule '{second}'")]
    ConflictingRules {
        column: String,
        first: String,
        second: String,
    },

    #[error("Rule '{rule}': {message}")]
    InvalidAction { rule: String, message: String },

    #[error("Rule '{rule}': {source}")]
    Expression {
        rule: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Invalid {document} document: {message}")]
    Document { document: String, message: String },
}

/// A condition expression that failed to parse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed condition '{expression}' at offset {offset}: {message}")]
pub struct ExpressionError {
    pub expression: String,
    pub offset: usize,
    pub message: String,
}

/// A non-fatal failure while deriving a single output field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldFailure {
    #[error("Cannot convert '{value}' to {target}")]
    TypeCoercion { value: String, target: String },

    #[error("Unparsable date '{value}' (accepted formats: {accepted})")]
    DateFormat { value: String, accepted: String },

    #[error("Source field '{field}' is absent from the record")]
    MissingField { field: String },

    #[error("{0}")]
    Transformation(String),
}

impl FieldFailure {
    /// Policy category this failure is dispatched through.
    pub fn category(&self) -> FailureCategory {
        match self {
            FieldFailure::TypeCoercion { .. } | FieldFailure::DateFormat { .. } => {
                FailureCategory::InvalidFormat
            }
            FieldFailure::MissingField { .. } => FailureCategory::MissingData,
            FieldFailure::Transformation(_) => FailureCategory::TransformationError,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FieldFailure::TypeCoercion { .. } => "TYPE_COERCION",
            FieldFailure::DateFormat { .. } => "DATE_FORMAT",
            FieldFailure::MissingField { .. } => "MISSING_FIELD",
            FieldFailure::Transformation(_) => "TRANSFORMATION_ERROR",
        }
    }
}
