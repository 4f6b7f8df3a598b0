use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about = "Convert records between schemas using declarative rules", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Convert an input file to the output schema using processing rules
    Convert(ConvertArgs),
    /// Load and cross-validate a configuration bundle without reading data
    Check(CheckArgs),
    /// Validate records in a file against a single schema
    Validate(ValidateArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// Fixed width for `.dat` paths, delimited otherwise
    Auto,
    Csv,
    FixedWidth,
}

impl InputFormat {
    pub fn is_fixed_width(self, path: &Path) -> bool {
        match self {
            InputFormat::Auto => crate::io_utils::is_fixed_width_path(path),
            InputFormat::Csv => false,
            InputFormat::FixedWidth => true,
        }
    }
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Input schema document (YAML or JSON)
    #[arg(long = "input-schema")]
    pub input_schema: PathBuf,
    /// Output schema document (YAML or JSON)
    #[arg(long = "output-schema")]
    pub output_schema: PathBuf,
    /// Processing rules document (YAML or JSON)
    #[arg(long = "rules")]
    pub rules: PathBuf,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Input file to convert (`-` for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Output CSV file (stdout if omitted or `-`)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Diagnostics report destination (`.json`, `.yaml` or `.yml`)
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// CSV file receiving rejected input records
    #[arg(long)]
    pub rejected: Option<PathBuf>,
    /// Input layout
    #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
    pub format: InputFormat,
    /// Input delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Output delimiter character (defaults to the input delimiter)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Character encoding for output files (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Input file to validate (`-` for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Schema document describing the file
    #[arg(short = 's', long = "schema")]
    pub schema: PathBuf,
    /// Input layout
    #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
    pub format: InputFormat,
    /// Input delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
