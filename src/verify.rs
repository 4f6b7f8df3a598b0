use anyhow::{Context, Result, bail};
use log::info;

use crate::{
    cli::ValidateArgs, data::default_date_formats, io_utils, process::read_input,
    schema::InputSchema, validate::validate,
};

pub fn execute(args: &ValidateArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let schema = InputSchema::load(&args.schema)
        .with_context(|| format!("Loading schema from {:?}", args.schema))?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let records = read_input(
        &args.input,
        args.format,
        &schema,
        delimiter,
        encoding,
        &default_date_formats(),
    )?;

    let mut failing = 0usize;
    let mut total = 0usize;
    for (idx, record) in records.iter().enumerate() {
        let violations = validate(record, &schema);
        if violations.is_empty() {
            continue;
        }
        failing += 1;
        total += violations.len();
        for violation in &violations {
            println!("record {}: {violation}", idx + 1);
        }
    }

    if total > 0 {
        bail!(
            "{total} violation(s) in {failing} of {} record(s) in {:?}",
            records.len(),
            args.input
        );
    }
    info!(
        "✓ {} record(s) in {:?} match schema '{}'",
        records.len(),
        args.input,
        schema.schema_name
    );
    Ok(())
}
