//! Conversion orchestrator.
//!
//! Each input record moves through
//! `RECEIVED -> INPUT_VALIDATED -> TRANSFORMED -> OUTPUT_VALIDATED` and ends
//! `EMITTED`, `REJECTED` or `SKIPPED`. Failures along the way are dispatched
//! through the configured [`ErrorHandlingPolicy`](crate::policy::ErrorHandlingPolicy)
//! and recorded as diagnostic events. [`Converter::convert_record`] depends
//! only on its arguments, so records can be converted in any order and the
//! partial results merged.

use std::fmt;

use log::{debug, info, log};
use serde::{Deserialize, Serialize};

use crate::{
    config::ConversionConfig,
    data::{Record, Value},
    error::FieldFailure,
    policy::{FailureCategory, Strategy},
    report::{ActionTaken, DiagnosticEntry, DiagnosticEvent, DiagnosticsReport, Stage},
    resolve::{ColumnPlan, Resolution, resolve_column},
    validate::{Violation, ViolationKind, validate_with_formats},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    Received,
    InputValidated,
    Transformed,
    OutputValidated,
    Emitted,
    Rejected,
    Skipped,
}

impl RecordState {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordState::Received => "RECEIVED",
            RecordState::InputValidated => "INPUT_VALIDATED",
            RecordState::Transformed => "TRANSFORMED",
            RecordState::OutputValidated => "OUTPUT_VALIDATED",
            RecordState::Emitted => "EMITTED",
            RecordState::Rejected => "REJECTED",
            RecordState::Skipped => "SKIPPED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecordState::Emitted | RecordState::Rejected | RecordState::Skipped
        )
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of converting one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordResult {
    pub index: usize,
    pub record_id: String,
    pub state: RecordState,
    /// Present only when `state` is [`RecordState::Emitted`].
    pub output: Option<Record>,
    pub violations: Vec<Violation>,
    pub events: Vec<DiagnosticEvent>,
}

impl RecordResult {
    fn diagnostic_entry(&self) -> Option<DiagnosticEntry> {
        if self.events.is_empty() {
            return None;
        }
        Some(DiagnosticEntry {
            record_index: self.index,
            record_id: self.record_id.clone(),
            outcome: self.state,
            events: self.events.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub index: usize,
    pub record_id: String,
    pub input: Record,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone)]
pub struct ConversionResult {
    /// Accepted output records in input order.
    pub records: Vec<Record>,
    pub rejected: Vec<RejectedRecord>,
    pub report: DiagnosticsReport,
}

/// Runs conversions against one immutable configuration bundle.
#[derive(Debug, Clone, Copy)]
pub struct Converter<'a> {
    config: &'a ConversionConfig,
}

impl<'a> Converter<'a> {
    pub fn new(config: &'a ConversionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &'a ConversionConfig {
        self.config
    }

    pub fn convert<I>(&self, records: I) -> ConversionResult
    where
        I: IntoIterator<Item = Record>,
    {
        let mut result = ConversionResult {
            records: Vec::new(),
            rejected: Vec::new(),
            report: DiagnosticsReport::new(
                self.config.rules.processing_name.clone(),
                self.config.fingerprint(),
            ),
        };
        for (index, input) in records.into_iter().enumerate() {
            let outcome = self.convert_record(index, &input);
            result.report.summary.record(outcome.state);
            if let Some(entry) = outcome.diagnostic_entry() {
                result.report.push(entry);
            }
            match outcome.state {
                RecordState::Emitted => {
                    if let Some(output) = outcome.output {
                        result.records.push(output);
                    }
                }
                RecordState::Rejected => result.rejected.push(RejectedRecord {
                    index,
                    record_id: outcome.record_id,
                    input,
                    violations: outcome.violations,
                }),
                _ => {}
            }
        }
        let summary = result.report.summary;
        info!(
            "Conversion '{}' finished: {} received, {} emitted, {} rejected, {} skipped",
            result.report.processing_name,
            summary.received,
            summary.emitted,
            summary.rejected,
            summary.skipped
        );
        result
    }

    pub fn convert_record(&self, index: usize, input: &Record) -> RecordResult {
        let mut run = RecordRun::new(self.config, index, input);
        run.execute();
        run.finish()
    }
}

pub fn convert<I>(config: &ConversionConfig, records: I) -> ConversionResult
where
    I: IntoIterator<Item = Record>,
{
    Converter::new(config).convert(records)
}

enum Dispatch {
    Proceed,
    Stop,
}

/// Mutable state for one record's pass through the state machine.
struct RecordRun<'a> {
    config: &'a ConversionConfig,
    input: &'a Record,
    stage: Stage,
    result: RecordResult,
}

impl<'a> RecordRun<'a> {
    fn new(config: &'a ConversionConfig, index: usize, input: &'a Record) -> Self {
        let record_id = config
            .rules
            .record_id_field
            .as_deref()
            .and_then(|field| input.get(field))
            .filter(|value| !value.is_blank())
            .map(Value::as_display)
            .unwrap_or_else(|| (index + 1).to_string());
        Self {
            config,
            input,
            stage: Stage::InputValidation,
            result: RecordResult {
                index,
                record_id,
                state: RecordState::Received,
                output: None,
                violations: Vec::new(),
                events: Vec::new(),
            },
        }
    }

    fn finish(self) -> RecordResult {
        self.result
    }

    fn advance(&mut self, state: RecordState) {
        debug!(
            "Record {} ({}): {} -> {}",
            self.result.index + 1,
            self.result.record_id,
            self.result.state,
            state
        );
        self.result.state = state;
    }

    fn strategy(&self, category: FailureCategory) -> Strategy {
        self.config.rules.policy.strategy_for(category)
    }

    fn record_event(
        &mut self,
        category: FailureCategory,
        kind: &str,
        field: &str,
        message: String,
        strategy: Strategy,
        action: ActionTaken,
    ) {
        log!(
            strategy.log_level(),
            "Record {} ({}) {:?}: {} {} on '{}': {} [{} -> {:?}]",
            self.result.index + 1,
            self.result.record_id,
            self.stage,
            category,
            kind,
            field,
            message,
            strategy,
            action
        );
        self.result.events.push(DiagnosticEvent {
            stage: self.stage,
            category,
            kind: kind.to_string(),
            field: field.to_string(),
            message,
            strategy,
            action,
        });
    }

    fn execute(&mut self) {
        if let Dispatch::Stop = self.validate_input() {
            return;
        }
        self.advance(RecordState::InputValidated);

        let Some(output) = self.transform() else {
            return;
        };
        self.advance(RecordState::Transformed);

        let Some(output) = self.validate_output(output) else {
            return;
        };
        self.advance(RecordState::OutputValidated);

        self.result.output = Some(output);
        self.advance(RecordState::Emitted);
    }

    fn validate_input(&mut self) -> Dispatch {
        self.stage = Stage::InputValidation;
        let config = self.config;
        let violations =
            validate_with_formats(self.input, &config.input_schema, &config.rules.date_formats);
        if violations.is_empty() {
            return Dispatch::Proceed;
        }
        let strategy = self.strategy(FailureCategory::ValidationFailure);
        let action = match strategy {
            Strategy::LogErrorMarkInvalid => ActionTaken::MarkedInvalid,
            Strategy::LogErrorSkipRecord => ActionTaken::SkippedRecord,
            Strategy::LogWarningContinue | Strategy::LogErrorUseDefault => ActionTaken::Continued,
        };
        self.record_violations(&violations, strategy, action);
        match action {
            ActionTaken::MarkedInvalid => {
                self.result.violations = violations;
                self.advance(RecordState::Rejected);
                Dispatch::Stop
            }
            ActionTaken::SkippedRecord => {
                self.advance(RecordState::Skipped);
                Dispatch::Stop
            }
            _ => Dispatch::Proceed,
        }
    }

    fn record_violations(
        &mut self,
        violations: &[Violation],
        strategy: Strategy,
        action: ActionTaken,
    ) {
        for violation in violations {
            self.record_event(
                FailureCategory::ValidationFailure,
                violation.kind.as_str(),
                &violation.field,
                violation.message.clone(),
                strategy,
                action,
            );
        }
    }

    fn transform(&mut self) -> Option<Record> {
        self.stage = Stage::Transformation;
        let config = self.config;
        let mut output = Record::with_capacity(config.plans.len());
        for plan in &config.plans {
            let failure = match resolve_column(plan, self.input, &config.rules) {
                Ok(Resolution::Value { value, .. }) => {
                    output.insert(plan.name.as_str(), value);
                    continue;
                }
                Ok(Resolution::Gap) => FieldOutcome::Gap,
                Err(failure) => FieldOutcome::Failed(failure),
            };
            let value = self.contain_field_failure(plan, failure)?;
            output.insert(plan.name.as_str(), value);
        }
        Some(output)
    }

    /// Applies the policy to one failed field. `None` ends the record.
    fn contain_field_failure(&mut self, plan: &ColumnPlan, outcome: FieldOutcome) -> Option<Value> {
        let (category, kind, message) = match &outcome {
            FieldOutcome::Gap => (
                FailureCategory::MissingData,
                "UNRESOLVED",
                format!("No mapping, rule or default resolves column '{}'", plan.name),
            ),
            FieldOutcome::Failed(failure) => (failure.category(), failure.kind(), failure.to_string()),
        };
        let strategy = self.strategy(category);
        let (action, value) = match strategy {
            Strategy::LogWarningContinue => (ActionTaken::ContinuedWithNull, Some(Value::Null)),
            Strategy::LogErrorUseDefault => (
                ActionTaken::UsedDefault,
                Some(plan.default.clone().unwrap_or(Value::Null)),
            ),
            Strategy::LogErrorSkipRecord => (ActionTaken::SkippedRecord, None),
            Strategy::LogErrorMarkInvalid => (ActionTaken::MarkedInvalid, None),
        };
        self.record_event(
            category,
            kind,
            &plan.name,
            message.clone(),
            strategy,
            action,
        );
        match action {
            ActionTaken::SkippedRecord => {
                self.advance(RecordState::Skipped);
                None
            }
            ActionTaken::MarkedInvalid => {
                let kind = match category {
                    FailureCategory::MissingData => ViolationKind::MissingRequired,
                    FailureCategory::InvalidFormat => ViolationKind::TypeMismatch,
                    _ => ViolationKind::BusinessRuleFailed,
                };
                self.result
                    .violations
                    .push(Violation::new(&plan.name, kind, message));
                self.advance(RecordState::Rejected);
                None
            }
            _ => value,
        }
    }

    fn validate_output(&mut self, mut output: Record) -> Option<Record> {
        self.stage = Stage::OutputValidation;
        let config = self.config;
        let formats = &config.rules.date_formats;
        let violations = validate_with_formats(&output, &config.output_schema, formats);
        if violations.is_empty() {
            return Some(output);
        }
        let strategy = self.strategy(FailureCategory::ValidationFailure);
        let mut remaining = violations;

        match strategy {
            Strategy::LogErrorUseDefault => {
                let mut repaired = false;
                for violation in &remaining {
                    let default = config
                        .plans
                        .iter()
                        .find(|plan| plan.name == violation.field)
                        .and_then(|plan| plan.default.clone());
                    let action = match default {
                        Some(value) => {
                            output.insert(violation.field.as_str(), value);
                            repaired = true;
                            ActionTaken::UsedDefault
                        }
                        None => ActionTaken::MarkedInvalid,
                    };
                    self.record_event(
                        FailureCategory::ValidationFailure,
                        violation.kind.as_str(),
                        &violation.field,
                        violation.message.clone(),
                        strategy,
                        action,
                    );
                }
                if repaired {
                    remaining = validate_with_formats(&output, &config.output_schema, formats);
                }
                if remaining.is_empty() {
                    return Some(output);
                }
                self.reject(remaining)
            }
            Strategy::LogErrorSkipRecord => {
                self.record_violations(
                    &remaining,
                    strategy,
                    ActionTaken::SkippedRecord,
                );
                self.advance(RecordState::Skipped);
                None
            }
            Strategy::LogErrorMarkInvalid => {
                self.record_violations(
                    &remaining,
                    strategy,
                    ActionTaken::MarkedInvalid,
                );
                self.reject(remaining)
            }
            Strategy::LogWarningContinue => {
                // An emitted record never lacks a required output value.
                let blocking = remaining
                    .iter()
                    .any(|v| v.kind == ViolationKind::MissingRequired);
                for violation in &remaining {
                    let action = if violation.kind == ViolationKind::MissingRequired {
                        ActionTaken::MarkedInvalid
                    } else {
                        ActionTaken::Continued
                    };
                    self.record_event(
                        FailureCategory::ValidationFailure,
                        violation.kind.as_str(),
                        &violation.field,
                        violation.message.clone(),
                        strategy,
                        action,
                    );
                }
                if blocking {
                    remaining.retain(|v| v.kind == ViolationKind::MissingRequired);
                    return self.reject(remaining);
                }
                Some(output)
            }
        }
    }

    fn reject(&mut self, violations: Vec<Violation>) -> Option<Record> {
        self.result.violations.extend(violations);
        self.advance(RecordState::Rejected);
        None
    }
}

enum FieldOutcome {
    Gap,
    Failed(FieldFailure),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ErrorHandlingPolicy;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    const INPUT: &str = r#"
schema_name: in
columns:
  - name: TXN_ID
    required: true
  - name: CURRENCY
    required: true
  - name: VALUE_DATE
  - name: AMOUNT
    data_type: decimal
"#;

    const OUTPUT: &str = r#"
schema_name: out
columns:
  - name: TXN_ID
    input_mapped_column: TXN_ID
    mandatory: true
  - name: CCY
    input_mapped_column: CURRENCY
    mandatory: true
  - name: VALUE_DATE
    transformation_applied: true
    default: "19000101"
  - name: SIDE
    transformation_applied: true
    mandatory: true
"#;

    fn rules(policy: &str) -> String {
        format!(
            r#"
processing_name: orchestrator
record_id_field: TXN_ID
transformation_rules:
  - rule_id: VALUE_DATE_FORMAT
    output_field: VALUE_DATE
    logic:
      conditions:
        - condition: "VALUE_DATE IS NOT NULL"
          action: {{ type: reformat_date, field: VALUE_DATE }}
  - rule_id: SIDE
    output_field: SIDE
    logic:
      conditions:
        - condition: "AMOUNT IS NOT MISSING"
          action: {{ type: sign_indicator, field: AMOUNT }}
error_handling:
{policy}
"#
        )
    }

    fn config(policy: &str) -> ConversionConfig {
        ConversionConfig::from_documents(INPUT, OUTPUT, &rules(policy)).expect("config loads")
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().map(|(k, v)| (*k, Value::from(*v))).collect()
    }

    #[test]
    fn emits_converted_record() {
        let config = config("  missing_data: LOG_WARNING_CONTINUE");
        let result = Converter::new(&config).convert_record(
            0,
            &record(&[
                ("TXN_ID", "T1"),
                ("CURRENCY", "JPY"),
                ("VALUE_DATE", "2024-01-15"),
                ("AMOUNT", "-10"),
            ]),
        );
        assert_eq!(result.state, RecordState::Emitted);
        assert!(result.events.is_empty());
        let output = result.output.expect("emitted output");
        assert_eq!(output.render_row(&config.output_headers()), vec!["T1", "JPY", "20240115", "D"]);
    }

    #[test]
    fn bad_date_uses_declared_default() {
        let config = config("  invalid_format: LOG_ERROR_USE_DEFAULT");
        let result = Converter::new(&config).convert_record(
            3,
            &record(&[
                ("TXN_ID", "T4"),
                ("CURRENCY", "JPY"),
                ("VALUE_DATE", "abc"),
                ("AMOUNT", "10"),
            ]),
        );
        assert_eq!(result.state, RecordState::Emitted);
        assert_eq!(result.record_id, "T4");
        assert_eq!(result.output.unwrap().get("VALUE_DATE"), Some(&Value::from("19000101")));
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].kind, "DATE_FORMAT");
        assert_eq!(result.events[0].action, ActionTaken::UsedDefault);
    }

    #[test]
    fn missing_required_input_is_rejected() {
        let config = config("  validation_failure: LOG_ERROR_MARK_INVALID");
        let outcome = Converter::new(&config).convert(vec![
            record(&[("TXN_ID", "T1"), ("AMOUNT", "5")]),
            record(&[("TXN_ID", "T2"), ("CURRENCY", "USD"), ("AMOUNT", "5")]),
        ]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
        let rejected = &outcome.rejected[0];
        assert_eq!(rejected.record_id, "T1");
        assert_eq!(rejected.violations[0].kind, ViolationKind::MissingRequired);
        assert_eq!(rejected.violations[0].field, "CURRENCY");
        assert_eq!(outcome.report.entries.len(), 1);
        assert_eq!(outcome.report.entries[0].outcome, RecordState::Rejected);
    }

    #[test]
    fn continue_never_emits_missing_mandatory_output() {
        let config = config("  missing_data: LOG_WARNING_CONTINUE\n  validation_failure: LOG_WARNING_CONTINUE");
        let result = Converter::new(&config)
            .convert_record(0, &record(&[("TXN_ID", "T1"), ("CURRENCY", "JPY")]));
        assert_eq!(result.state, RecordState::Rejected);
        assert!(result.violations.iter().all(|v| v.kind == ViolationKind::MissingRequired));
        assert!(result.violations.iter().any(|v| v.field == "SIDE"));
    }

    #[test]
    fn skip_strategy_drops_record_silently_from_output() {
        let config = config("  invalid_format: LOG_ERROR_SKIP_RECORD");
        let outcome = Converter::new(&config).convert(vec![record(&[
            ("TXN_ID", "T1"),
            ("CURRENCY", "JPY"),
            ("VALUE_DATE", "not a date"),
            ("AMOUNT", "1"),
        ])]);
        assert!(outcome.records.is_empty());
        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.report.summary.skipped, 1);
        assert_eq!(outcome.report.entries[0].outcome, RecordState::Skipped);
    }

    #[test]
    fn policy_defaults_apply_when_unset() {
        let config = config("  {}");
        assert_eq!(config.rules.policy, ErrorHandlingPolicy::default());
        assert!(RecordState::Skipped.is_terminal());
    }

    const RATIO_RULE: &str = r#"  - rule_id: RATIO
    output_field: RATIO
    logic:
      conditions:
        - condition: "DIVISOR IS NOT NULL"
          action: { type: arithmetic, left: { field: AMOUNT }, op: divide, right: { field: DIVISOR } }
"#;

    fn config_from(input: &str, output: &str, rules: &str) -> ConversionConfig {
        ConversionConfig::from_documents(input, output, rules).expect("config loads")
    }

    #[test]
    fn date_typed_output_keeps_canonical_pattern() {
        let output = OUTPUT.replace(
            "  - name: VALUE_DATE\n    transformation_applied: true\n",
            "  - name: VALUE_DATE\n    data_type: date\n    length: 8\n    transformation_applied: true\n",
        );
        let config = config_from(INPUT, &output, &rules("  {}"));
        let result = Converter::new(&config).convert_record(
            0,
            &record(&[
                ("TXN_ID", "T1"),
                ("CURRENCY", "JPY"),
                ("VALUE_DATE", "2024-01-15"),
                ("AMOUNT", "10"),
            ]),
        );
        assert_eq!(result.state, RecordState::Emitted, "events: {:?}", result.events);
        assert!(result.events.is_empty());
        let output = result.output.expect("emitted output");
        assert_eq!(
            output.get("VALUE_DATE"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()))
        );
        assert_eq!(output.render_row(&config.output_headers()), vec!["T1", "JPY", "20240115", "C"]);
    }

    #[test]
    fn use_default_repairs_missing_mandatory_output() {
        let output = OUTPUT.replace(
            "    input_mapped_column: CURRENCY\n    mandatory: true\n",
            "    input_mapped_column: CURRENCY\n    mandatory: true\n    default: XXX\n",
        );
        let config = config_from(INPUT, &output, &rules("  validation_failure: LOG_ERROR_USE_DEFAULT"));
        let result = Converter::new(&config).convert_record(
            0,
            &record(&[("TXN_ID", "T1"), ("CURRENCY", ""), ("AMOUNT", "10")]),
        );
        assert_eq!(result.state, RecordState::Emitted);
        assert_eq!(result.output.unwrap().get("CCY"), Some(&Value::from("XXX")));
        let repaired = result.events.last().expect("output validation event");
        assert_eq!(repaired.stage, Stage::OutputValidation);
        assert_eq!(repaired.field, "CCY");
        assert_eq!(repaired.kind, "MISSING_REQUIRED");
        assert_eq!(repaired.action, ActionTaken::UsedDefault);
    }

    #[test]
    fn use_default_rejects_when_no_default_exists() {
        let config = config("  validation_failure: LOG_ERROR_USE_DEFAULT");
        let result = Converter::new(&config).convert_record(
            0,
            &record(&[("TXN_ID", "T1"), ("CURRENCY", ""), ("AMOUNT", "10")]),
        );
        assert_eq!(result.state, RecordState::Rejected);
        assert!(result.output.is_none());
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].field, "CCY");
        assert_eq!(result.violations[0].kind, ViolationKind::MissingRequired);
        let last = result.events.last().expect("output validation event");
        assert_eq!(last.stage, Stage::OutputValidation);
        assert_eq!(last.action, ActionTaken::MarkedInvalid);
    }

    #[test]
    fn transformation_error_falls_back_to_column_default() {
        let input = format!("{INPUT}  - name: DIVISOR\n    data_type: integer\n");
        let output = format!(
            "{OUTPUT}  - name: RATIO\n    data_type: decimal\n    transformation_applied: true\n    default: \"0\"\n"
        );
        let rules = rules("  transformation_error: LOG_ERROR_USE_DEFAULT")
            .replace("error_handling:", &format!("{RATIO_RULE}error_handling:"));
        let config = config_from(&input, &output, &rules);

        let outcome = Converter::new(&config).convert(vec![record(&[
            ("TXN_ID", "T1"),
            ("CURRENCY", "JPY"),
            ("VALUE_DATE", "2024-01-15"),
            ("AMOUNT", "10"),
            ("DIVISOR", "0"),
        ])]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].get("RATIO"), Some(&Value::Decimal(Decimal::ZERO)));

        let entry = &outcome.report.entries[0];
        assert_eq!(entry.outcome, RecordState::Emitted);
        assert_eq!(entry.events.len(), 1);
        let event = &entry.events[0];
        assert_eq!(event.stage, Stage::Transformation);
        assert_eq!(event.category, FailureCategory::TransformationError);
        assert_eq!(event.kind, "TRANSFORMATION_ERROR");
        assert_eq!(event.field, "RATIO");
        assert_eq!(event.action, ActionTaken::UsedDefault);
        assert!(event.message.contains("division by zero"));
    }
}
