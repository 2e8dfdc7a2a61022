#![forbid(unsafe_code)]

use std::io::Read;
use std::path::Path;

use csv::{Reader, ReaderBuilder, WriterBuilder};
use sift_table::{Column, Table, TableError};
use sift_types::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Loads a table from CSV text. The first record names the columns; every
/// later record contributes one row.
pub fn load_csv_str(input: &str) -> Result<Table, LoadError> {
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(input.as_bytes());
    read_table(reader)
}

/// Loads a table from a CSV file on disk.
pub fn load_csv_path(path: impl AsRef<Path>) -> Result<Table, LoadError> {
    let reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    read_table(reader)
}

fn read_table<R: Read>(mut reader: Reader<R>) -> Result<Table, LoadError> {
    let headers = reader.headers().cloned().map_err(LoadError::from)?;

    if headers.is_empty() {
        return Err(LoadError::MissingHeaders);
    }

    let mut raw: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];
    for row in reader.records() {
        let record = row?;
        for (idx, values) in raw.iter_mut().enumerate() {
            let field = record.get(idx).unwrap_or_default();
            values.push(parse_value(field));
        }
    }

    let columns = headers
        .iter()
        .zip(raw)
        .map(|(name, values)| Column::from_values(name, values))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Table::new(columns)?)
}

pub fn write_csv_string(table: &Table) -> Result<String, LoadError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    let headers = table.column_names().collect::<Vec<_>>();
    writer.write_record(&headers)?;

    for row_idx in 0..table.row_count() {
        let row = table
            .columns()
            .iter()
            .map(|column| value_to_csv(&column.values()[row_idx]))
            .collect::<Vec<_>>();
        writer.write_record(&row)?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

fn parse_value(field: &str) -> Value {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }

    if let Ok(value) = trimmed.parse::<i64>() {
        return Value::Int(value);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return Value::Float(value);
    }
    if let Ok(value) = trimmed.parse::<bool>() {
        return Value::Bool(value);
    }

    Value::Text(trimmed.to_owned())
}

fn value_to_csv(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => {
            if v.is_nan() {
                String::new()
            } else {
                v.to_string()
            }
        }
        Value::Text(v) => v.clone(),
    }
}
