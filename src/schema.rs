//! Schema model for input and output record shapes.
//!
//! A [`Schema`] is an ordered column list plus optional validation rules. The
//! same document shape serves both sides of a conversion: input schemas use
//! plain [`ColumnSpec`] columns, output schemas use [`OutputColumnSpec`],
//! which adds the mapping and default information the rule resolver needs.
//! Both column kinds implement [`SchemaColumn`] so the validator can check a
//! record against either.
//!
//! ## Responsibilities
//!
//! - YAML (or JSON) loading via `serde_yaml`
//! - Structural checks: unique non-empty names, known data types, rule fields
//!   that exist, compilable patterns and conditions, coercible defaults
//! - `additional_fields` expansion into optional string output columns

use std::{collections::BTreeSet, fmt, fs, path::Path, str::FromStr};

use anyhow::{Context, Result};
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{
    data::{Value, coerce, default_date_formats, deserialize_optional_scalar},
    error::SchemaError,
    expr::Condition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnType {
    #[default]
    String,
    Integer,
    Decimal,
    Float,
    Boolean,
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["string", "integer", "decimal", "float", "boolean", "date"]
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = SchemaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "string" | "text" | "str" => Ok(ColumnType::String),
            "integer" | "int" => Ok(ColumnType::Integer),
            "decimal" | "numeric" | "number" => Ok(ColumnType::Decimal),
            "float" | "double" => Ok(ColumnType::Float),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            _ => Err(SchemaError::UnknownDataType {
                token: value.to_string(),
                supported: ColumnType::variants().join(", "),
            }),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_str(&token).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default, alias = "type")]
    pub data_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: None,
            required: false,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputColumnSpec {
    #[serde(flatten)]
    pub column: ColumnSpec,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_mapped_column: Option<String>,
    #[serde(default)]
    pub transformation_applied: bool,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<String>,
    #[serde(skip)]
    default_value: Option<Value>,
}

impl OutputColumnSpec {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            column: ColumnSpec::new(name, data_type),
            mandatory: false,
            input_mapped_column: None,
            transformation_applied: false,
            default: None,
            default_value: None,
        }
    }

    pub fn transformed(mut self) -> Self {
        self.transformation_applied = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.column.name
    }
}

/// Column behaviour shared by input and output schemas.
pub trait SchemaColumn {
    fn spec(&self) -> &ColumnSpec;

    /// Whether validation must find the column populated.
    fn must_be_populated(&self) -> bool;

    fn default_value(&self) -> Option<&Value> {
        None
    }

    fn from_additional_field(name: String) -> Self;

    fn finalize(&mut self) -> Result<(), SchemaError> {
        Ok(())
    }
}

impl SchemaColumn for ColumnSpec {
    fn spec(&self) -> &ColumnSpec {
        self
    }

    fn must_be_populated(&self) -> bool {
        self.required
    }

    fn from_additional_field(name: String) -> Self {
        ColumnSpec::new(name, ColumnType::String)
    }
}

impl SchemaColumn for OutputColumnSpec {
    fn spec(&self) -> &ColumnSpec {
        &self.column
    }

    fn must_be_populated(&self) -> bool {
        self.mandatory
    }

    fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    /// Additional output fields are optional strings that default to empty.
    fn from_additional_field(name: String) -> Self {
        OutputColumnSpec::new(name, ColumnType::String).with_default("")
    }

    fn finalize(&mut self) -> Result<(), SchemaError> {
        self.default_value = match self.default.as_deref() {
            Some(raw) => Some(parse_default(&self.column, raw)?),
            None => None,
        };
        Ok(())
    }
}

pub(crate) fn parse_default(column: &ColumnSpec, raw: &str) -> Result<Value, SchemaError> {
    coerce(
        &Value::String(raw.to_string()),
        &column.data_type,
        &default_date_formats(),
    )
    .map_err(|_| SchemaError::InvalidDefault {
        column: column.name.clone(),
        value: raw.to_string(),
        data_type: column.data_type.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum ValidationRule {
    RequiredFields {
        fields: Vec<String>,
    },
    #[serde(alias = "currency_validation", alias = "product_type_validation")]
    AllowedValues {
        field: String,
        #[serde(deserialize_with = "deserialize_scalar_list")]
        valid_values: Vec<String>,
    },
    Pattern {
        field: String,
        pattern: String,
        #[serde(skip)]
        compiled: Option<Regex>,
    },
    Condition {
        condition: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip)]
        compiled: Option<Condition>,
    },
}

fn deserialize_scalar_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Scalar(#[serde(deserialize_with = "crate::data::deserialize_scalar")] String);

    let values = Vec::<Scalar>::deserialize(deserializer)?;
    Ok(values.into_iter().map(|Scalar(s)| s).collect())
}

impl ValidationRule {
    pub fn label(&self) -> &'static str {
        match self {
            ValidationRule::RequiredFields { .. } => "required_fields",
            ValidationRule::AllowedValues { .. } => "allowed_values",
            ValidationRule::Pattern { .. } => "pattern",
            ValidationRule::Condition { .. } => "condition",
        }
    }

    /// Record field names the rule reads.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            ValidationRule::RequiredFields { fields } => fields.iter().map(String::as_str).collect(),
            ValidationRule::AllowedValues { field, .. } | ValidationRule::Pattern { field, .. } => {
                vec![field.as_str()]
            }
            ValidationRule::Condition { compiled, .. } => compiled
                .as_ref()
                .map(|condition| condition.references())
                .unwrap_or_default(),
        }
    }

    fn compile(&mut self, schema_name: &str) -> Result<(), SchemaError> {
        match self {
            ValidationRule::Pattern {
                field,
                pattern,
                compiled,
            } => {
                let regex = Regex::new(pattern).map_err(|err| SchemaError::InvalidPattern {
                    column: field.clone(),
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                })?;
                *compiled = Some(regex);
            }
            ValidationRule::Condition {
                condition,
                compiled,
                ..
            } => {
                let parsed = Condition::parse(condition).map_err(|source| SchemaError::Expression {
                    rule: format!("{schema_name}/condition"),
                    source,
                })?;
                *compiled = Some(parsed);
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdditionalFields {
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema<C = ColumnSpec> {
    #[serde(default)]
    pub schema_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub columns: Vec<C>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_fields: Option<AdditionalFields>,
}

pub type InputSchema = Schema<ColumnSpec>;
pub type OutputSchema = Schema<OutputColumnSpec>;

impl<C> Schema<C>
where
    C: SchemaColumn + for<'de> Deserialize<'de>,
{
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let schema = Self::from_yaml_str(&raw).with_context(|| format!("Loading schema {path:?}"))?;
        Ok(schema)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, SchemaError> {
        let schema: Schema<C> = serde_yaml::from_str(input).map_err(|err| SchemaError::Document {
            document: "schema".to_string(),
            message: err.to_string(),
        })?;
        schema.finalize()
    }
}

impl<C: SchemaColumn> Schema<C> {
    pub fn new(schema_name: impl Into<String>, columns: Vec<C>) -> Self {
        Schema {
            schema_name: schema_name.into(),
            version: String::new(),
            description: String::new(),
            columns,
            validation_rules: Vec::new(),
            additional_fields: None,
        }
    }

    /// Runs the structural checks and prepares compiled state. Must be called
    /// on programmatically built schemas before use.
    pub fn finalize(mut self) -> Result<Self, SchemaError> {
        if let Some(extra) = self.additional_fields.as_ref() {
            for name in &extra.fields {
                if !self.columns.iter().any(|c| c.spec().name == *name) {
                    self.columns.push(C::from_additional_field(name.clone()));
                }
            }
        }

        for (position, column) in self.columns.iter().enumerate() {
            if column.spec().name.trim().is_empty() {
                return Err(SchemaError::EmptyColumnName {
                    schema: self.schema_name.clone(),
                    position: position + 1,
                });
            }
        }
        if let Some(duplicate) = self.columns.iter().map(|c| &c.spec().name).duplicates().next() {
            return Err(SchemaError::DuplicateColumn {
                schema: self.schema_name.clone(),
                column: duplicate.clone(),
            });
        }
        for column in &mut self.columns {
            column.finalize()?;
        }

        let schema_name = self.schema_name.clone();
        for rule in &mut self.validation_rules {
            rule.compile(&schema_name)?;
        }
        for rule in &self.validation_rules {
            for field in rule.fields() {
                if self.column(field).is_none() {
                    return Err(SchemaError::UnknownRuleField {
                        schema: schema_name.clone(),
                        rule: rule.label().to_string(),
                        column: field.to_string(),
                    });
                }
            }
        }
        Ok(self)
    }

    pub fn columns(&self) -> &[C] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&C> {
        self.columns.iter().find(|c| c.spec().name == name)
    }

    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.spec().name.clone()).collect()
    }

    /// Columns flagged required/mandatory plus every `required_fields` entry.
    pub fn required_fields(&self) -> BTreeSet<&str> {
        let mut fields: BTreeSet<&str> = self
            .columns
            .iter()
            .filter(|c| c.must_be_populated())
            .map(|c| c.spec().name.as_str())
            .collect();
        for rule in &self.validation_rules {
            if let ValidationRule::RequiredFields { fields: listed } = rule {
                fields.extend(listed.iter().map(String::as_str));
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = r#"
schema_name: Transactions
version: 1.2.0
columns:
  - name: RECORD_TYPE
    data_type: string
    length: 3
    required: true
  - name: FACE_VALUE
    data_type: numeric
  - name: VALUE_DATE
    data_type: date
validation_rules:
  - rule_type: required_fields
    fields: [RECORD_TYPE, VALUE_DATE]
  - rule_type: currency_validation
    field: RECORD_TYPE
    valid_values: [TXN, 1]
"#;

    #[test]
    fn loads_columns_and_required_fields() {
        let schema = InputSchema::from_yaml_str(INPUT).expect("schema loads");
        assert_eq!(schema.schema_name, "Transactions");
        assert_eq!(schema.headers(), vec!["RECORD_TYPE", "FACE_VALUE", "VALUE_DATE"]);
        assert_eq!(schema.columns()[1].data_type, ColumnType::Decimal);
        let required: Vec<_> = schema.required_fields().into_iter().collect();
        assert_eq!(required, vec!["RECORD_TYPE", "VALUE_DATE"]);
        match &schema.validation_rules[1] {
            ValidationRule::AllowedValues { valid_values, .. } => {
                assert_eq!(valid_values, &vec!["TXN".to_string(), "1".to_string()]);
            }
            other => panic!("unexpected rule {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_columns() {
        let doc = "schema_name: s\ncolumns:\n  - name: A\n  - name: A\n";
        let err = InputSchema::from_yaml_str(doc).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateColumn { column, .. } if column == "A"));
    }

    #[test]
    fn rejects_unknown_data_type() {
        let doc = "schema_name: s\ncolumns:\n  - name: A\n    data_type: money\n";
        let err = InputSchema::from_yaml_str(doc).unwrap_err();
        assert!(err.to_string().contains("Unknown data_type 'money'"));
    }

    #[test]
    fn rejects_rules_referencing_unknown_fields() {
        let doc = "schema_name: s\ncolumns:\n  - name: A\nvalidation_rules:\n  - rule_type: required_fields\n    fields: [B]\n";
        let err = InputSchema::from_yaml_str(doc).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownRuleField { column, .. } if column == "B"));
    }

    #[test]
    fn output_defaults_are_typed_at_load() {
        let doc = r#"
schema_name: out
columns:
  - name: AMOUNT
    data_type: decimal
    mandatory: true
    default: 0
  - name: SIDE
    default: C
additional_fields:
  fields: [EXTRA_1]
"#;
        let schema = OutputSchema::from_yaml_str(doc).expect("output schema loads");
        let amount = schema.column("AMOUNT").unwrap();
        assert_eq!(amount.default_value(), Some(&Value::Decimal(0.into())));
        assert!(amount.must_be_populated());
        assert_eq!(schema.headers(), vec!["AMOUNT", "SIDE", "EXTRA_1"]);

        let bad = "schema_name: out\ncolumns:\n  - name: N\n    data_type: integer\n    default: abc\n";
        let err = OutputSchema::from_yaml_str(bad).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDefault { .. }));
    }

    #[test]
    fn rejects_invalid_patterns_and_conditions() {
        let bad_pattern = "schema_name: s\ncolumns:\n  - name: A\nvalidation_rules:\n  - rule_type: pattern\n    field: A\n    pattern: '('\n";
        assert!(matches!(
            InputSchema::from_yaml_str(bad_pattern).unwrap_err(),
            SchemaError::InvalidPattern { .. }
        ));

        let bad_condition = "schema_name: s\ncolumns:\n  - name: A\nvalidation_rules:\n  - rule_type: condition\n    condition: \"A ==\"\n";
        assert!(matches!(
            InputSchema::from_yaml_str(bad_condition).unwrap_err(),
            SchemaError::Expression { .. }
        ));
    }
}
