pub mod cli;
pub mod config;
pub mod convert;
pub mod data;
pub mod error;
pub mod expr;
pub mod io_utils;
pub mod policy;
pub mod process;
pub mod report;
pub mod resolve;
pub mod rows;
pub mod rules;
pub mod schema;
pub mod validate;
pub mod verify;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, info};

use crate::cli::{Cli, Commands};

pub use crate::config::ConversionConfig;
pub use crate::convert::{ConversionResult, Converter, RecordState, convert};
pub use crate::data::{Record, Value};
pub use crate::error::{ExpressionError, FieldFailure, SchemaError};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_convert", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Convert(args) => process::execute(&args),
        Commands::Check(args) => handle_check(&args),
        Commands::Validate(args) => verify::execute(&args),
    }
}

fn handle_check(args: &cli::CheckArgs) -> Result<()> {
    let config = ConversionConfig::load(
        &args.config.input_schema,
        &args.config.output_schema,
        &args.config.rules,
    )?;
    info!(
        "Configuration '{}' is valid ({} output column(s))",
        config.rules.processing_name,
        config.column_plans().len()
    );
    println!("{}", config.fingerprint());
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
