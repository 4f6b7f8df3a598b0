//! I/O collaborators: delimited and fixed-width readers, the CSV writer and
//! encoding support.
//!
//! - **Delimiter resolution**: `.tsv` → tab, everything else comma, unless
//!   overridden.
//! - **Encoding**: input decoding and output transcoding via `encoding_rs`,
//!   defaulting to UTF-8.
//! - **stdin/stdout**: the `-` path routes through the standard streams.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::{
    data::Record,
    rows::{record_from_fixed_width, record_from_row},
    schema::InputSchema,
};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn is_fixed_width_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dat"))
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn resolve_output_delimiter(path: Option<&Path>, provided: Option<u8>, fallback: u8) -> u8 {
    if let Some(delim) = provided {
        return delim;
    }
    match path.and_then(|p| p.extension()).and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        Some(ext) if ext.eq_ignore_ascii_case("csv") => DEFAULT_CSV_DELIMITER,
        _ => fallback,
    }
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    Ok(if is_dash(path) {
        Box::new(io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        ))
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_writer(
    path: Option<&Path>,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(io::stdout()),
    };

    let writer: Box<dyn Write> = if encoding == UTF_8 {
        base
    } else {
        Box::new(TranscodingWriter::new(base, encoding))
    };

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Reads a headed delimited file into records typed by the input schema.
pub fn read_csv_records(
    path: &Path,
    schema: &InputSchema,
    delimiter: u8,
    encoding: &'static Encoding,
    date_formats: &[String],
) -> Result<Vec<Record>> {
    let mut reader = open_csv_reader(open_input(path)?, delimiter);
    let headers = decode_record(
        &reader
            .byte_headers()
            .with_context(|| format!("Reading headers from {path:?}"))?
            .clone(),
        encoding,
    )?;
    debug!("Input headers for {path:?}: {headers:?}");

    let mut records = Vec::new();
    for (row_idx, result) in reader.byte_records().enumerate() {
        let row = result.with_context(|| format!("Reading row {} in {path:?}", row_idx + 2))?;
        let raw = decode_record(&row, encoding)
            .with_context(|| format!("Decoding row {} in {path:?}", row_idx + 2))?;
        records.push(record_from_row(schema, &headers, &raw, date_formats));
    }
    Ok(records)
}

/// Reads a fixed-width file. Blank lines are skipped.
pub fn read_fixed_width_records(
    path: &Path,
    schema: &InputSchema,
    encoding: &'static Encoding,
    date_formats: &[String],
) -> Result<Vec<Record>> {
    let mut bytes = Vec::new();
    open_input(path)?
        .read_to_end(&mut bytes)
        .with_context(|| format!("Reading fixed-width input {path:?}"))?;
    let text = decode_bytes(&bytes, encoding).with_context(|| format!("Decoding {path:?}"))?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| record_from_fixed_width(schema, line, date_formats))
        .collect())
}

pub fn write_records<'r, I>(
    path: Option<&Path>,
    headers: &[String],
    records: I,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<usize>
where
    I: IntoIterator<Item = &'r Record>,
{
    let mut writer = open_csv_writer(path, delimiter, encoding)?;
    writer
        .write_record(headers)
        .context("Writing output headers")?;
    let mut written = 0;
    for record in records {
        writer
            .write_record(record.render_row(headers))
            .with_context(|| format!("Writing output row {}", written + 2))?;
        written += 1;
    }
    writer.flush().context("Flushing output")?;
    Ok(written)
}

struct TranscodingWriter<W: Write> {
    inner: W,
    encoding: &'static Encoding,
    buffer: Vec<u8>,
}

impl<W: Write> TranscodingWriter<W> {
    fn new(inner: W, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            encoding,
            buffer: Vec::new(),
        }
    }

    /// Encodes every complete UTF-8 sequence in the buffer. A trailing partial
    /// sequence is kept for the next write unless `force` is set.
    fn flush_buffer(&mut self, force: bool) -> io::Result<()> {
        let valid_up_to = match std::str::from_utf8(&self.buffer) {
            Ok(_) => self.buffer.len(),
            Err(err) => {
                if let Some(error_len) = err.error_len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Invalid UTF-8 sequence in output stream ({error_len} bytes)"),
                    ));
                }
                err.valid_up_to()
            }
        };
        if valid_up_to > 0 {
            let pending: Vec<u8> = self.buffer.drain(..valid_up_to).collect();
            let text = String::from_utf8(pending)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.encode_and_write(&text)?;
        }
        if force && !self.buffer.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Incomplete UTF-8 sequence at end of output stream",
            ));
        }
        Ok(())
    }

    fn encode_and_write(&mut self, text: &str) -> io::Result<()> {
        let (encoded, _, had_errors) = self.encoding.encode(text);
        if had_errors {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to encode text using {}", self.encoding.name()),
            ));
        }
        self.inner.write_all(encoded.as_ref())
    }
}

impl<W: Write> Write for TranscodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.flush_buffer(false)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer(true)?;
        self.inner.flush()
    }
}
