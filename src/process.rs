use std::path::Path;

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use log::{info, warn};

use crate::{
    cli::{ConvertArgs, InputFormat},
    config::ConversionConfig,
    convert::{Converter, RejectedRecord},
    data::{Record, Value},
    io_utils,
    schema::InputSchema,
};

/// Column appended to rejected-record files.
pub const REJECTION_COLUMN: &str = "REJECTION_REASONS";

pub fn execute(args: &ConvertArgs) -> Result<()> {
    let config = ConversionConfig::load(
        &args.config.input_schema,
        &args.config.output_schema,
        &args.config.rules,
    )?;
    let input_encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let output_encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let output_path = args.output.as_deref();
    let output_delimiter =
        io_utils::resolve_output_delimiter(output_path, args.output_delimiter, delimiter);

    info!(
        "Converting '{}' -> {} (delimiter '{}', output '{}')",
        args.input.display(),
        output_path
            .filter(|p| !io_utils::is_dash(p))
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdout".into()),
        crate::printable_delimiter(delimiter),
        crate::printable_delimiter(output_delimiter)
    );

    let records = read_input(
        &args.input,
        args.format,
        &config.input_schema,
        delimiter,
        input_encoding,
        &config.rules.date_formats,
    )?;
    info!("Read {} record(s) from {:?}", records.len(), args.input);

    let result = Converter::new(&config).convert(records);

    let headers = config.output_headers();
    let written = io_utils::write_records(
        output_path,
        &headers,
        &result.records,
        output_delimiter,
        output_encoding,
    )
    .with_context(|| format!("Writing converted records for {:?}", args.input))?;
    info!("Wrote {written} converted record(s)");

    if let Some(path) = args.rejected.as_deref() {
        write_rejected(
            path,
            &config.input_schema,
            &result.rejected,
            output_delimiter,
            output_encoding,
        )?;
        info!("Wrote {} rejected record(s) to {path:?}", result.rejected.len());
    } else if !result.rejected.is_empty() {
        warn!(
            "{} record(s) rejected; pass --rejected to keep them",
            result.rejected.len()
        );
    }

    if let Some(path) = args.report.as_deref() {
        result.report.save(path)?;
        info!(
            "Diagnostics report with {} entr{} ({} event(s)) written to {path:?}",
            result.report.entries.len(),
            if result.report.entries.len() == 1 { "y" } else { "ies" },
            result.report.event_count()
        );
    }
    Ok(())
}

pub fn read_input(
    path: &Path,
    format: InputFormat,
    schema: &InputSchema,
    delimiter: u8,
    encoding: &'static Encoding,
    date_formats: &[String],
) -> Result<Vec<Record>> {
    if format.is_fixed_width(path) {
        io_utils::read_fixed_width_records(path, schema, encoding, date_formats)
    } else {
        io_utils::read_csv_records(path, schema, delimiter, encoding, date_formats)
    }
}

fn write_rejected(
    path: &Path,
    schema: &InputSchema,
    rejected: &[RejectedRecord],
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<()> {
    let mut headers = schema.headers();
    headers.push(REJECTION_COLUMN.to_string());
    let rows: Vec<Record> = rejected
        .iter()
        .map(|entry| {
            let mut row = entry.input.clone();
            let reasons = entry
                .violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            row.insert(REJECTION_COLUMN, Value::String(reasons));
            row
        })
        .collect();
    io_utils::write_records(Some(path), &headers, &rows, delimiter, encoding)
        .with_context(|| format!("Writing rejected records to {path:?}"))?;
    Ok(())
}
