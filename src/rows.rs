//! Raw row to [`Record`] conversion for delimited and fixed-width input.
//!
//! Cells are typed with [`type_raw_value`]; text that does not parse as the
//! declared type is kept as a string so the validator can report it.

use crate::{
    data::{Record, Value, type_raw_value},
    schema::InputSchema,
};

/// Builds a record from a delimited row. Every header becomes a field; a
/// schema column missing from the header stays absent.
pub fn record_from_row(
    schema: &InputSchema,
    headers: &[String],
    raw: &[String],
    date_formats: &[String],
) -> Record {
    let mut record = Record::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        let cell = raw.get(idx).map(|s| s.as_str()).unwrap_or("");
        let value = match schema.column(header) {
            Some(column) => type_raw_value(cell, &column.data_type, date_formats),
            None if cell.is_empty() => Value::Null,
            None => Value::String(cell.to_string()),
        };
        record.insert(header.as_str(), value);
    }
    record
}

/// Slices a fixed-width line by the schema's column lengths (default 1).
/// Values are trimmed; a line that ends early yields empty values.
pub fn record_from_fixed_width(schema: &InputSchema, line: &str, date_formats: &[String]) -> Record {
    let mut record = Record::with_capacity(schema.columns().len());
    let mut chars = line.chars();
    for column in schema.columns() {
        let width = column.length.unwrap_or(1);
        let cell: String = chars.by_ref().take(width).collect();
        let value = type_raw_value(cell.trim(), &column.data_type, date_formats);
        record.insert(column.name.as_str(), value);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::default_date_formats, schema::Schema};
    use crate::schema::{ColumnSpec, ColumnType};
    use rust_decimal::Decimal;

    fn schema() -> InputSchema {
        Schema::new(
            "in",
            vec![
                ColumnSpec::new("RECORD_TYPE", ColumnType::String).with_length(1),
                ColumnSpec::new("CURRENCY", ColumnType::String).with_length(3),
                ColumnSpec::new("FACE_VALUE", ColumnType::Decimal).with_length(10),
            ],
        )
        .finalize()
        .unwrap()
    }

    #[test]
    fn delimited_rows_keep_header_order_and_types() {
        let headers = vec!["CURRENCY".to_string(), "FACE_VALUE".to_string(), "EXTRA".to_string()];
        let raw = vec!["JPY".to_string(), "12x".to_string()];
        let record = record_from_row(&schema(), &headers, &raw, &default_date_formats());
        assert_eq!(record.names().collect::<Vec<_>>(), vec!["CURRENCY", "FACE_VALUE", "EXTRA"]);
        assert_eq!(record.get("FACE_VALUE"), Some(&Value::from("12x")));
        assert_eq!(record.get("EXTRA"), Some(&Value::Null));
        assert!(!record.contains("RECORD_TYPE"));
    }

    #[test]
    fn fixed_width_lines_are_sliced_and_trimmed() {
        let record = record_from_fixed_width(&schema(), "1JPY    200000", &default_date_formats());
        assert_eq!(record.get("RECORD_TYPE"), Some(&Value::from("1")));
        assert_eq!(record.get("CURRENCY"), Some(&Value::from("JPY")));
        assert_eq!(record.get("FACE_VALUE"), Some(&Value::Decimal(Decimal::from(200000))));

        let short = record_from_fixed_width(&schema(), "1US", &default_date_formats());
        assert_eq!(short.get("CURRENCY"), Some(&Value::from("US")));
        assert_eq!(short.get("FACE_VALUE"), Some(&Value::Null));
    }
}
