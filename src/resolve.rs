use crate::{
    data::{Record, Value, coerce},
    error::{FieldFailure, SchemaError},
    rules::{MappingKind, RuleBranch, RuleSet},
    schema::{ColumnType, InputSchema, OutputSchema, SchemaColumn, parse_default},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSource {
    pub field: String,
    /// Render the input value as text before coercion.
    pub stringify: bool,
}

/// How one output column is derived, fixed at configuration load.
#[derive(Debug, Clone)]
pub struct ColumnPlan {
    pub name: String,
    pub data_type: ColumnType,
    pub source: Option<ColumnSource>,
    pub transformation_applied: bool,
    pub default: Option<Value>,
    pub mandatory: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Mapped { field: String },
    Rule { rule_id: String, branch: RuleBranch },
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Value { value: Value, origin: Origin },
    /// Nothing could derive the column.
    Gap,
}

/// Builds the per-column plans in output-schema order. Processing-rule field
/// mappings take precedence over the output schema's own mapping and default.
pub fn plan_columns(
    input: &InputSchema,
    output: &OutputSchema,
    rules: &RuleSet,
) -> Result<Vec<ColumnPlan>, SchemaError> {
    let mut plans = Vec::with_capacity(output.columns().len());
    for column in output.columns() {
        let spec = &column.column;
        let mut plan = ColumnPlan {
            name: spec.name.clone(),
            data_type: spec.data_type,
            source: column.input_mapped_column.clone().map(|field| ColumnSource {
                field,
                stringify: false,
            }),
            transformation_applied: column.transformation_applied,
            default: column.default_value().cloned(),
            mandatory: column.mandatory,
        };

        if let Some(mapping) = rules.mapping_for(&spec.name) {
            match mapping.transformation {
                MappingKind::DirectCopy | MappingKind::StringConversion => {
                    plan.source = mapping.input_field.clone().map(|field| ColumnSource {
                        field,
                        stringify: mapping.transformation == MappingKind::StringConversion,
                    });
                    plan.transformation_applied = false;
                }
                MappingKind::DefaultValue => {
                    plan.source = None;
                }
            }
            if let Some(raw) = mapping.default_value.as_deref() {
                plan.default = Some(parse_default(spec, raw)?);
            }
        }

        if let Some(source) = plan.source.as_ref()
            && input.column(&source.field).is_none()
        {
            return Err(SchemaError::UnknownInputField {
                rule: format!("output column {}", spec.name),
                field: source.field.clone(),
            });
        }
        plans.push(plan);
    }
    Ok(plans)
}

/// Derives a single output value. The first applicable source wins: a direct
/// mapping, then a bound rule, then the declared default.
pub fn resolve_column(
    plan: &ColumnPlan,
    record: &Record,
    rules: &RuleSet,
) -> Result<Resolution, FieldFailure> {
    let formats = rules.date_formats.as_slice();

    if let Some(source) = plan.source.as_ref()
        && !plan.transformation_applied
    {
        let raw = record
            .get(&source.field)
            .ok_or_else(|| FieldFailure::MissingField {
                field: source.field.clone(),
            })?;
        let value = if source.stringify && !raw.is_null() {
            coerce(&Value::String(raw.as_display()), &plan.data_type, formats)?
        } else {
            coerce(raw, &plan.data_type, formats)?
        };
        return Ok(Resolution::Value {
            value,
            origin: Origin::Mapped {
                field: source.field.clone(),
            },
        });
    }

    if let Some(rule) = rules.rule_for(&plan.name)
        && let Some((branch, result)) = rule.evaluate(record, formats)
    {
        let value = coerce(&result?, &plan.data_type, formats)?;
        return Ok(Resolution::Value {
            value,
            origin: Origin::Rule {
                rule_id: rule.rule_id.clone(),
                branch,
            },
        });
    }

    Ok(match plan.default.as_ref() {
        Some(value) => Resolution::Value {
            value: value.clone(),
            origin: Origin::Default,
        },
        None => Resolution::Gap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ProcessingRules;

    const INPUT: &str = r#"
schema_name: in
columns:
  - name: CURRENCY
  - name: PRODUCT_TYPE
  - name: LEAF_GL
  - name: AMOUNT
    data_type: decimal
"#;

    const OUTPUT: &str = r#"
schema_name: out
columns:
  - name: CCY
    input_mapped_column: CURRENCY
  - name: LEAF_GL
    transformation_applied: true
  - name: AMOUNT_TEXT
  - name: BOOK
    default: MAIN
  - name: NOTE
"#;

    const RULES: &str = r#"
processing_name: test
transformation_rules:
  - rule_id: LEAF_GL_SUFFIX
    output_field: LEAF_GL
    logic:
      conditions:
        - condition: "CURRENCY == 'JPY' AND PRODUCT_TYPE IN ['D', 'G']"
          action:
            type: concat
            parts: [{ field: LEAF_GL }, { literal: _JPY_D_G }]
field_mappings:
  - output_field: AMOUNT_TEXT
    input_field: AMOUNT
    transformation: STRING_CONVERSION
"#;

    fn fixture() -> (Vec<ColumnPlan>, RuleSet) {
        let input = InputSchema::from_yaml_str(INPUT).unwrap();
        let output = OutputSchema::from_yaml_str(OUTPUT).unwrap();
        let rules =
            RuleSet::compile(ProcessingRules::from_yaml_str(RULES).unwrap(), &input, &output)
                .unwrap();
        let plans = plan_columns(&input, &output, &rules).unwrap();
        (plans, rules)
    }

    fn value_of(resolution: Resolution) -> Value {
        match resolution {
            Resolution::Value { value, .. } => value,
            Resolution::Gap => panic!("unexpected gap"),
        }
    }

    #[test]
    fn resolves_each_column_source() {
        let (plans, rules) = fixture();
        let record: Record = [
            ("CURRENCY", Value::from("JPY")),
            ("PRODUCT_TYPE", Value::from("D")),
            ("LEAF_GL", Value::from("1000")),
            ("AMOUNT", Value::from("12.50")),
        ]
        .into_iter()
        .collect();

        let resolved: Vec<_> = plans
            .iter()
            .map(|plan| resolve_column(plan, &record, &rules).unwrap())
            .collect();
        assert_eq!(value_of(resolved[0].clone()), Value::from("JPY"));
        assert!(matches!(
            &resolved[1],
            Resolution::Value { value, origin: Origin::Rule { branch: RuleBranch::Condition(0), .. } }
                if *value == Value::from("1000_JPY_D_G")
        ));
        assert_eq!(value_of(resolved[2].clone()), Value::from("12.50"));
        assert!(matches!(&resolved[3], Resolution::Value { origin: Origin::Default, .. }));
        assert_eq!(resolved[4], Resolution::Gap);
    }

    #[test]
    fn unmatched_rule_without_default_is_a_gap() {
        let (plans, rules) = fixture();
        let record: Record = [
            ("CURRENCY", Value::from("USD")),
            ("LEAF_GL", Value::from("1000")),
        ]
        .into_iter()
        .collect();
        assert_eq!(resolve_column(&plans[1], &record, &rules).unwrap(), Resolution::Gap);
    }

    #[test]
    fn absent_mapped_source_is_a_missing_field() {
        let (plans, rules) = fixture();
        let err = resolve_column(&plans[0], &Record::new(), &rules).unwrap_err();
        assert_eq!(
            err,
            FieldFailure::MissingField {
                field: "CURRENCY".to_string()
            }
        );
    }

    #[test]
    fn mapping_to_unknown_input_field_fails_planning() {
        let input = InputSchema::from_yaml_str(INPUT).unwrap();
        let output = OutputSchema::from_yaml_str(
            "schema_name: out\ncolumns:\n  - name: X\n    input_mapped_column: NOPE\n",
        )
        .unwrap();
        let rules = RuleSet::compile(
            ProcessingRules::from_yaml_str("processing_name: t\n").unwrap(),
            &input,
            &output,
        )
        .unwrap();
        assert!(matches!(
            plan_columns(&input, &output, &rules).unwrap_err(),
            SchemaError::UnknownInputField { field, .. } if field == "NOPE"
        ));
    }
}
