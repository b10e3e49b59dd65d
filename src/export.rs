//! Export of loaded tables for downstream dashboards and reports.
//!
//! JSON accepts any table. CSV and Parquet need a "columnar" table: every
//! variable a numeric vector (or scalar) or text, all of one length, which is
//! how well time series and temporal data are laid out.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use crate::data::model::{format_shape, NamedArrayTable, Value};

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Pretty-printed JSON; non-finite numbers become `null`.
pub fn to_json(table: &NamedArrayTable) -> Result<String> {
    serde_json::to_string_pretty(table).context("serializing table to JSON")
}

// ---------------------------------------------------------------------------
// Columnar view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum Column<'a> {
    Numbers(&'a [f64]),
    Text(&'a [String]),
}

impl Column<'_> {
    pub fn len(&self) -> usize {
        match self {
            Column::Numbers(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Columns of equal length, in table order.
pub fn columns(table: &NamedArrayTable) -> Result<Vec<(&str, Column<'_>)>> {
    if table.is_empty() {
        bail!("table has no variables");
    }
    let mut out = Vec::with_capacity(table.len());
    let mut rejected = Vec::new();
    for (name, value) in table {
        match value {
            Value::Numeric(arr) if arr.rank() <= 1 => {
                out.push((name.as_str(), Column::Numbers(arr.data())))
            }
            Value::Text(rows) => out.push((name.as_str(), Column::Text(rows))),
            Value::Numeric(arr) => rejected.push(format!("{name} ({})", format_shape(arr.shape()))),
            other => rejected.push(format!("{name} ({})", other.kind_name())),
        }
    }
    if !rejected.is_empty() {
        bail!(
            "only vectors and text can be exported as columns; offending variables: {}",
            rejected.join(", ")
        );
    }
    let rows = out[0].1.len();
    let ragged: Vec<String> = out
        .iter()
        .filter(|(_, c)| c.len() != rows)
        .map(|(name, c)| format!("{name} ({} rows)", c.len()))
        .collect();
    if !ragged.is_empty() {
        bail!(
            "columns differ in length from '{}' ({rows} rows): {}",
            out[0].0,
            ragged.join(", ")
        );
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

pub fn write_csv(table: &NamedArrayTable, path: &Path) -> Result<()> {
    let cols = columns(table)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating CSV {}", path.display()))?;
    writer
        .write_record(cols.iter().map(|(name, _)| *name))
        .context("writing CSV header")?;
    let rows = cols[0].1.len();
    for row in 0..rows {
        let record = cols.iter().map(|(_, col)| match col {
            Column::Numbers(v) => v[row].to_string(),
            Column::Text(v) => v[row].clone(),
        });
        writer
            .write_record(record)
            .with_context(|| format!("writing CSV row {row}"))?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

pub fn write_parquet(table: &NamedArrayTable, path: &Path) -> Result<()> {
    let cols = columns(table)?;
    let mut fields = Vec::with_capacity(cols.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(cols.len());
    for (name, col) in &cols {
        match col {
            Column::Numbers(v) => {
                fields.push(Field::new(*name, DataType::Float64, false));
                arrays.push(Arc::new(Float64Array::from(v.to_vec())));
            }
            Column::Text(v) => {
                fields.push(Field::new(*name, DataType::Utf8, false));
                arrays.push(Arc::new(StringArray::from(
                    v.iter().map(String::as_str).collect::<Vec<_>>(),
                )));
            }
        }
    }
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays).context("building record batch")?;

    let file =
        File::create(path).with_context(|| format!("creating parquet file {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// One human-readable line per variable.
pub fn summarize(table: &NamedArrayTable) -> Vec<String> {
    let width = table.names().map(str::len).max().unwrap_or(0);
    table
        .iter()
        .map(|(name, value)| {
            let detail = match value {
                Value::Numeric(arr) => match arr.min_max() {
                    Some((lo, hi)) => format!("{:<10} min={lo:.4} max={hi:.4}", format_shape(arr.shape())),
                    None => format_shape(arr.shape()),
                },
                Value::Text(rows) => match rows.as_slice() {
                    [single] => format!("\"{single}\""),
                    _ => format!("{} rows", rows.len()),
                },
                Value::Struct(s) => {
                    let fields: Vec<&str> = s
                        .elements
                        .first()
                        .map(|e| e.names().collect())
                        .unwrap_or_default();
                    format!("{} fields: {}", format_shape(&s.shape), fields.join(", "))
                }
                Value::Cell(c) => format_shape(&c.shape),
            };
            format!("{name:<width$}  {:<8} {detail}", value.kind_name())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::NdArray;

    fn wells() -> NamedArrayTable {
        let mut t = NamedArrayTable::new();
        t.insert("time_days", NdArray::vector(vec![0.0, 30.0, 60.0]));
        t.insert("bhp", NdArray::vector(vec![250.0, 248.5, 247.0]));
        t.insert("phase", Value::Text(vec!["w".into(), "o".into(), "o".into()]));
        t
    }

    #[test]
    fn csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wells.csv");
        write_csv(&wells(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "bhp,phase,time_days");
        assert_eq!(lines[2], "248.5,o,30");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn parquet_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wells.parquet");
        write_parquet(&wells(), &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn matrices_are_not_columnar() {
        let mut t = wells();
        t.insert("pressure", NdArray::new(vec![2, 2], vec![1., 2., 3., 4.]).unwrap());
        let err = columns(&t).unwrap_err();
        assert!(err.to_string().contains("pressure (2x2)"), "{err}");
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let mut t = wells();
        t.insert("qWs", NdArray::vector(vec![1.0]));
        let err = columns(&t).unwrap_err();
        assert!(err.to_string().contains("qWs (1 rows)"), "{err}");
    }

    #[test]
    fn json_tags_value_kinds() {
        let mut t = NamedArrayTable::new();
        t.insert("phi", NdArray::scalar(0.25));
        let json: serde_json::Value = serde_json::from_str(&to_json(&t).unwrap()).unwrap();
        assert_eq!(json["phi"]["kind"], "numeric");
        assert_eq!(json["phi"]["value"]["data"][0], 0.25);
    }

    #[test]
    fn summary_lists_each_variable() {
        let lines = summarize(&wells());
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("bhp"));
        assert!(lines[0].contains("min=247.0000 max=250.0000"));
        assert!(lines[1].contains("3 rows"));
    }
}
