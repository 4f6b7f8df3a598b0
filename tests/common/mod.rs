#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_convert::{ConversionConfig, Record, data::default_date_formats, io_utils};
use encoding_rs::UTF_8;
use tempfile::{TempDir, tempdir};

pub const INPUT_SCHEMA: &str = "input_schema.yaml";
pub const OUTPUT_SCHEMA: &str = "output_schema.yaml";
pub const RULES: &str = "processing_rules.yaml";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn fixture_text(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("read fixture")
}

/// Loads the FLEX PP balance configuration bundle from the fixtures.
pub fn fixture_config() -> ConversionConfig {
    ConversionConfig::load(
        &fixture_path(INPUT_SCHEMA),
        &fixture_path(OUTPUT_SCHEMA),
        &fixture_path(RULES),
    )
    .expect("fixture configuration loads")
}

/// Builds a configuration with the fixture schemas and a custom rules document.
pub fn config_with_rules(rules: &str) -> ConversionConfig {
    ConversionConfig::from_documents(
        &fixture_text(INPUT_SCHEMA),
        &fixture_text(OUTPUT_SCHEMA),
        rules,
    )
    .expect("configuration loads")
}

pub fn fixture_records(config: &ConversionConfig) -> Vec<Record> {
    io_utils::read_csv_records(
        &fixture_path("sample_input.csv"),
        &config.input_schema,
        b',',
        UTF_8,
        &default_date_formats(),
    )
    .expect("sample input reads")
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.temp_dir.path().join(name)).expect("read workspace file")
    }
}
