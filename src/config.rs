use std::{fs, path::Path};

use anyhow::{Context, Result};
use log::{debug, info};
use sha2::{Digest, Sha256};

use crate::{
    error::SchemaError,
    resolve::{ColumnPlan, plan_columns},
    rules::{ProcessingRules, RuleSet},
    schema::{InputSchema, OutputSchema},
};

/// Immutable bundle of the three configuration documents, cross-validated
/// and compiled. Built once per run and shared by reference.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub input_schema: InputSchema,
    pub output_schema: OutputSchema,
    pub rules: RuleSet,
    pub plans: Vec<ColumnPlan>,
    fingerprint: String,
}

impl ConversionConfig {
    pub fn from_documents(
        input_schema: &str,
        output_schema: &str,
        processing_rules: &str,
    ) -> Result<Self, SchemaError> {
        let input = InputSchema::from_yaml_str(input_schema)?;
        let output = OutputSchema::from_yaml_str(output_schema)?;
        let rules = ProcessingRules::from_yaml_str(processing_rules)?;
        let fingerprint = fingerprint_documents(&[input_schema, output_schema, processing_rules]);
        Self::assemble(input, output, rules, fingerprint)
    }

    /// Builds a bundle from already-parsed documents. The fingerprint is taken
    /// over their canonical YAML form.
    pub fn from_parts(
        input: InputSchema,
        output: OutputSchema,
        rules: ProcessingRules,
    ) -> Result<Self, SchemaError> {
        let input = input.finalize()?;
        let output = output.finalize()?;
        let canonical = |document: &str, value: Result<String, serde_yaml::Error>| {
            value.map_err(|err| SchemaError::Document {
                document: document.to_string(),
                message: err.to_string(),
            })
        };
        let docs = [
            canonical("input schema", serde_yaml::to_string(&input))?,
            canonical("output schema", serde_yaml::to_string(&output))?,
            canonical("processing rules", serde_yaml::to_string(&rules))?,
        ];
        let fingerprint = fingerprint_documents(&docs.each_ref().map(String::as_str));
        Self::assemble(input, output, rules, fingerprint)
    }

    pub fn load(input_schema: &Path, output_schema: &Path, processing_rules: &Path) -> Result<Self> {
        let read = |path: &Path, what: &str| {
            fs::read_to_string(path).with_context(|| format!("Reading {what} from {path:?}"))
        };
        let input = read(input_schema, "input schema")?;
        let output = read(output_schema, "output schema")?;
        let rules = read(processing_rules, "processing rules")?;
        let config = Self::from_documents(&input, &output, &rules).with_context(|| {
            format!(
                "Loading configuration ({input_schema:?}, {output_schema:?}, {processing_rules:?})"
            )
        })?;
        info!(
            "Loaded '{}' v{}: {} input column(s), {} output column(s), {} rule(s); fingerprint {}",
            config.rules.processing_name,
            config.rules.version,
            config.input_schema.columns().len(),
            config.output_schema.columns().len(),
            config.rules.rules().len(),
            config.fingerprint
        );
        Ok(config)
    }

    fn assemble(
        input: InputSchema,
        output: OutputSchema,
        rules: ProcessingRules,
        fingerprint: String,
    ) -> Result<Self, SchemaError> {
        let rules = RuleSet::compile(rules, &input, &output)?;
        let plans = plan_columns(&input, &output, &rules)?;
        debug!(
            "Column plans: {:?}",
            plans.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
        );
        Ok(ConversionConfig {
            input_schema: input,
            output_schema: output,
            rules,
            plans,
            fingerprint,
        })
    }

    /// Hex SHA-256 over the configuration documents.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn output_headers(&self) -> Vec<String> {
        self.output_schema.headers()
    }

    pub fn column_plans(&self) -> &[ColumnPlan] {
        &self.plans
    }
}

fn fingerprint_documents(documents: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for document in documents {
        hasher.update(document.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = "schema_name: in\ncolumns:\n  - name: A\n";
    const OUTPUT: &str = "schema_name: out\ncolumns:\n  - name: B\n    input_mapped_column: A\n";
    const RULES: &str = "processing_name: p\n";

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let first = ConversionConfig::from_documents(INPUT, OUTPUT, RULES).unwrap();
        let second = ConversionConfig::from_documents(INPUT, OUTPUT, RULES).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 64);

        let changed =
            ConversionConfig::from_documents(INPUT, OUTPUT, "processing_name: p\nversion: '2'\n")
                .unwrap();
        assert_ne!(first.fingerprint(), changed.fingerprint());
    }

    #[test]
    fn from_parts_matches_document_semantics() {
        let input = InputSchema::from_yaml_str(INPUT).unwrap();
        let output = OutputSchema::from_yaml_str(OUTPUT).unwrap();
        let rules = ProcessingRules::from_yaml_str(RULES).unwrap();
        let config = ConversionConfig::from_parts(input, output, rules).unwrap();
        assert_eq!(config.output_headers(), vec!["B"]);
        assert_eq!(config.column_plans()[0].source.as_ref().unwrap().field, "A");
    }

    #[test]
    fn invalid_policy_token_is_a_document_error() {
        let rules = "processing_name: p\nerror_handling:\n  missing_data: IGNORE\n";
        let err = ConversionConfig::from_documents(INPUT, OUTPUT, rules).unwrap_err();
        assert!(matches!(err, SchemaError::Document { .. }));
    }
}
