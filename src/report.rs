//! Diagnostics report: one entry per record that reached a policy branch.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{convert::RecordState, policy::FailureCategory, policy::Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InputValidation,
    Transformation,
    OutputValidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionTaken {
    ContinuedWithNull,
    Continued,
    UsedDefault,
    SkippedRecord,
    MarkedInvalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub stage: Stage,
    pub category: FailureCategory,
    pub kind: String,
    pub field: String,
    pub message: String,
    pub strategy: Strategy,
    pub action: ActionTaken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    /// Zero-based position in the input sequence.
    pub record_index: usize,
    pub record_id: String,
    pub outcome: RecordState,
    pub events: Vec<DiagnosticEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub received: usize,
    pub emitted: usize,
    pub rejected: usize,
    pub skipped: usize,
}

impl ConversionSummary {
    pub fn record(&mut self, outcome: RecordState) {
        self.received += 1;
        match outcome {
            RecordState::Emitted => self.emitted += 1,
            RecordState::Rejected => self.rejected += 1,
            RecordState::Skipped => self.skipped += 1,
            _ => {}
        }
    }

    fn absorb(&mut self, other: &ConversionSummary) {
        self.received += other.received;
        self.emitted += other.emitted;
        self.rejected += other.rejected;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub processing_name: String,
    pub config_fingerprint: String,
    pub summary: ConversionSummary,
    pub entries: Vec<DiagnosticEntry>,
}

impl DiagnosticsReport {
    pub fn new(processing_name: impl Into<String>, config_fingerprint: impl Into<String>) -> Self {
        Self {
            processing_name: processing_name.into(),
            config_fingerprint: config_fingerprint.into(),
            summary: ConversionSummary::default(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: DiagnosticEntry) {
        self.entries.push(entry);
    }

    /// Appends another partial report produced from the same configuration.
    /// Combined with [`sort_by_record`](Self::sort_by_record) the result does
    /// not depend on the order partial reports were merged in.
    pub fn merge(&mut self, other: DiagnosticsReport) {
        self.summary.absorb(&other.summary);
        self.entries.extend(other.entries);
    }

    pub fn sort_by_record(&mut self) {
        self.entries.sort_by_key(|entry| entry.record_index);
    }

    pub fn event_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.events.len()).sum()
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Serializing diagnostics report as JSON")
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing diagnostics report as YAML")
    }

    /// Writes YAML for `.yaml`/`.yml` paths and JSON otherwise.
    pub fn save(&self, path: &Path) -> Result<()> {
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        let body = if is_yaml {
            self.to_yaml_string()?
        } else {
            self.to_json_string()?
        };
        fs::write(path, body).with_context(|| format!("Writing diagnostics report to {path:?}"))
    }
}
