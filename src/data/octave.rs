//! Octave plain-text matrix format (`save -text`).
//!
//! ```text
//! # Created by Octave 8.4.0
//! # name: phi
//! # type: matrix
//! # rows: 2
//! # columns: 2
//!  0.1 0.2
//!  0.3 0.4
//! ```
//!
//! Also handled: `scalar`, `bool`/`bool matrix`, N-d matrices (`# ndims:`),
//! `string`/`sq_string`, and a `scalar struct` wrapper whose fields are read as
//! top-level variables. A malformed block fails the whole file.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::{debug, info};

use super::alias::apply_field_aliases;
use super::error::{LoadError, ParseError, WriteError};
use super::model::{element_count, NamedArrayTable, NdArray, Value};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Read and parse an Octave text file, applying field aliases.
pub fn load_octave_text(path: &Path) -> Result<NamedArrayTable, LoadError> {
    let bytes = fs::read(path).map_err(|e| LoadError::from_io(path, e))?;
    let text = std::str::from_utf8(&bytes).map_err(|e| {
        let line = bytes[..e.valid_up_to()].iter().filter(|&&b| b == b'\n').count() + 1;
        LoadError::Text {
            path: path.to_path_buf(),
            source: ParseError::new(None, line, "file is not valid UTF-8 text"),
        }
    })?;
    let table = parse_octave_text(text).map_err(|source| LoadError::Text {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "loaded {} variables from Octave text {}",
        table.len(),
        path.display()
    );
    Ok(apply_field_aliases(table))
}

/// Parse Octave text content into a table. Pure; no partial results on error.
pub fn parse_octave_text(text: &str) -> Result<NamedArrayTable, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    Parser::new(&lines).run()
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// `# type: matrix` seen, waiting for `# rows:` or `# ndims:`.
    Matrix,
    /// `# rows:` seen, waiting for `# columns:`.
    Rows(usize),
}

struct Parser<'a> {
    lines: &'a [&'a str],
    /// Index of the next unread line.
    pos: usize,
    name: Option<String>,
    /// Line on which `name` was declared.
    name_line: usize,
    pending: Option<Pending>,
    table: NamedArrayTable,
}

impl<'a> Parser<'a> {
    fn new(lines: &'a [&'a str]) -> Self {
        Self {
            lines,
            pos: 0,
            name: None,
            name_line: 0,
            pending: None,
            table: NamedArrayTable::new(),
        }
    }

    fn run(mut self) -> Result<NamedArrayTable, ParseError> {
        while let Some(line) = self.next_line() {
            let Some((key, value)) = directive(line) else {
                // Stray data or blank line outside a block.
                continue;
            };
            match key {
                "name" => self.start_variable(value)?,
                "type" => self.on_type(value)?,
                "rows" => self.on_rows(value)?,
                "columns" => self.on_columns(value)?,
                "ndims" => self.on_ndims(value)?,
                _ => {}
            }
        }
        self.finish_pending()?;
        if self.table.is_empty() {
            return Err(ParseError::new(
                None,
                self.lines.len().max(1),
                "no variables found",
            ));
        }
        Ok(self.table)
    }

    /// 1-based number of the line most recently returned by `next_line`.
    fn line_no(&self) -> usize {
        self.pos
    }

    fn next_line(&mut self) -> Option<&'a str> {
        let line = *self.lines.get(self.pos)?;
        self.pos += 1;
        Some(line)
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.name.as_deref(), self.line_no(), message)
    }

    fn start_variable(&mut self, value: &str) -> Result<(), ParseError> {
        self.finish_pending()?;
        let name = value.trim();
        if name.is_empty() {
            return Err(self.err("empty variable name"));
        }
        self.name = Some(name.to_string());
        self.name_line = self.line_no();
        Ok(())
    }

    fn finish_pending(&self) -> Result<(), ParseError> {
        match self.pending {
            Some(_) => Err(ParseError::new(
                self.name.as_deref(),
                self.name_line,
                "matrix declared but no data follows",
            )),
            None => Ok(()),
        }
    }

    fn current_name(&self) -> Result<String, ParseError> {
        self.name
            .clone()
            .ok_or_else(|| self.err("type directive without a preceding '# name:'"))
    }

    fn on_type(&mut self, value: &str) -> Result<(), ParseError> {
        match value.trim() {
            "matrix" | "bool matrix" => {
                self.current_name()?;
                self.pending = Some(Pending::Matrix);
            }
            "scalar" | "bool" => {
                let name = self.current_name()?;
                let line = self
                    .next_data_line()
                    .ok_or_else(|| self.err("scalar value missing"))?;
                let values = parse_row(line).map_err(|tok| self.err(bad_float(tok)))?;
                if values.len() != 1 {
                    return Err(self.err(format!(
                        "expected 1 scalar value, found {}",
                        values.len()
                    )));
                }
                self.store(name, Value::Numeric(NdArray::scalar(values[0])))?;
            }
            "string" | "sq_string" => {
                let name = self.current_name()?;
                let rows = self.read_strings()?;
                self.store(name, Value::Text(rows))?;
            }
            "scalar struct" => {
                // Fields follow as ordinary `# name:` blocks and land at top level.
                debug!(
                    "flattening Octave struct '{}'",
                    self.name.as_deref().unwrap_or("?")
                );
                self.name = None;
            }
            other => {
                return Err(self.err(format!("unsupported variable type '{other}'")));
            }
        }
        Ok(())
    }

    fn on_rows(&mut self, value: &str) -> Result<(), ParseError> {
        if self.pending != Some(Pending::Matrix) {
            return Err(self.err("'# rows:' outside a matrix block"));
        }
        let rows = self.positive_int(value, "rows")?;
        self.pending = Some(Pending::Rows(rows));
        Ok(())
    }

    fn on_columns(&mut self, value: &str) -> Result<(), ParseError> {
        let Some(Pending::Rows(rows)) = self.pending else {
            return Err(self.err("'# columns:' without a preceding '# rows:'"));
        };
        let columns = self.positive_int(value, "columns")?;
        let name = self.current_name()?;

        if rows.checked_mul(columns).is_none() {
            return Err(self.err(format!("{rows}x{columns} matrix has too many elements")));
        }
        let mut data = Vec::new();
        for read in 0..rows {
            let line = self.next_data_line().ok_or_else(|| {
                self.err(format!("expected {rows} data rows, found {read}"))
            })?;
            let values = parse_row(line).map_err(|tok| self.err(bad_float(tok)))?;
            if values.len() != columns {
                return Err(self.err(format!(
                    "expected {columns} values, found {}",
                    values.len()
                )));
            }
            data.extend(values);
        }

        let arr = NdArray::new(vec![rows, columns], data)
            .map_err(|e| self.err(e.to_string()))?
            .squeeze();
        self.pending = None;
        self.store(name, Value::Numeric(arr))
    }

    fn on_ndims(&mut self, value: &str) -> Result<(), ParseError> {
        if self.pending != Some(Pending::Matrix) {
            // `# ndims:` also heads struct blocks; nothing to read there.
            return Ok(());
        }
        let ndims = self.positive_int(value, "ndims")?;
        let name = self.current_name()?;

        let dims_line = self
            .next_data_line()
            .ok_or_else(|| self.err("dimension line missing"))?;
        let dims = dims_line
            .split_whitespace()
            .map(|tok| match tok.parse::<usize>() {
                Ok(d) if d > 0 => Ok(d),
                _ => Err(self.err(format!("invalid dimension '{tok}'"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if dims.len() != ndims {
            return Err(self.err(format!(
                "expected {ndims} dimensions, found {}",
                dims.len()
            )));
        }

        let count = element_count(&dims)
            .ok_or_else(|| self.err(format!("dimensions {dims_line} have too many elements")))?;
        let mut data = Vec::new();
        while data.len() < count {
            let line = self.next_data_line().ok_or_else(|| {
                self.err(format!("expected {count} values, found {}", data.len()))
            })?;
            data.extend(parse_row(line).map_err(|tok| self.err(bad_float(tok)))?);
        }
        if data.len() != count {
            return Err(self.err(format!(
                "expected {count} values, found {}",
                data.len()
            )));
        }

        let arr = NdArray::from_column_major(dims, data)
            .map_err(|e| self.err(e.to_string()))?
            .squeeze();
        self.pending = None;
        self.store(name, Value::Numeric(arr))
    }

    fn read_strings(&mut self) -> Result<Vec<String>, ParseError> {
        let elements = match self.next_line().and_then(directive) {
            Some(("elements", v)) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| self.err(format!("malformed integer '{}' in elements", v.trim())))?,
            _ => return Err(self.err("expected '# elements:'")),
        };
        let mut rows = Vec::new();
        for _ in 0..elements {
            let length = match self.next_line().and_then(directive) {
                Some(("length", v)) => v
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| self.err(format!("malformed integer '{}' in length", v.trim())))?,
                _ => return Err(self.err("expected '# length:'")),
            };
            let mut text = String::new();
            let mut chars = 0;
            // Embedded newlines spill the string over several lines.
            loop {
                let line = self
                    .next_line()
                    .ok_or_else(|| self.err("string content missing"))?;
                text.push_str(line);
                chars += line.chars().count();
                if chars >= length {
                    break;
                }
                text.push('\n');
                chars += 1;
            }
            if chars != length {
                return Err(self.err(format!(
                    "string length {chars} does not match declared {length}"
                )));
            }
            rows.push(text);
        }
        Ok(rows)
    }

    /// Next line that is not a directive, failing (returning `None`) at a directive or EOF.
    fn next_data_line(&mut self) -> Option<&'a str> {
        let line = *self.lines.get(self.pos)?;
        if line.trim_start().starts_with('#') {
            return None;
        }
        self.pos += 1;
        Some(line)
    }

    fn positive_int(&self, value: &str, what: &str) -> Result<usize, ParseError> {
        let value = value.trim();
        match value.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            Ok(_) => Err(self.err(format!("{what} must be positive"))),
            Err(_) => Err(self.err(format!("malformed integer '{value}' in {what}"))),
        }
    }

    fn store(&mut self, name: String, value: Value) -> Result<(), ParseError> {
        if self.table.contains(&name) {
            return Err(self.err(format!("duplicate variable '{name}'")));
        }
        self.table.insert(name, value);
        self.name = None;
        Ok(())
    }
}

/// Split `# key: value` into its parts. Plain comments yield `None`.
fn directive(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix('#')?;
    let (key, value) = rest.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value))
}

/// Parse whitespace-separated floats, returning the first bad token on failure.
fn parse_row(line: &str) -> Result<Vec<f64>, &str> {
    line.split_whitespace()
        .map(|tok| parse_float(tok).ok_or(tok))
        .collect()
}

fn parse_float(tok: &str) -> Option<f64> {
    match tok {
        // Octave's missing-value marker
        "NA" => Some(f64::NAN),
        _ => tok.parse::<f64>().ok(),
    }
}

fn bad_float(tok: &str) -> String {
    format!("'{tok}' is not a number")
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Serialize a table in the format [`parse_octave_text`] reads.
///
/// Vectors are written as `1×N` matrices and re-read as vectors, so explicit
/// `[1, N]` and `[1, 1]` shapes and one-element vectors come back squeezed.
/// Struct and cell values are rejected.
pub fn to_octave_text(table: &NamedArrayTable) -> Result<String, WriteError> {
    let mut out = String::from("# Created by rusty-reservoir\n");
    for (name, value) in table {
        let fail = |reason: &str| WriteError {
            name: name.clone(),
            reason: reason.to_string(),
        };
        let _ = writeln!(out, "# name: {name}");
        match value {
            Value::Numeric(arr) => write_numeric(&mut out, arr).map_err(fail)?,
            Value::Text(rows) => {
                out.push_str("# type: sq_string\n");
                let _ = writeln!(out, "# elements: {}", rows.len());
                for row in rows {
                    let _ = writeln!(out, "# length: {}", row.chars().count());
                    let _ = writeln!(out, "{row}");
                }
            }
            other => {
                return Err(fail(&format!(
                    "{} values cannot be written as Octave text",
                    other.kind_name()
                )))
            }
        }
        out.push_str("\n\n");
    }
    Ok(out)
}

fn write_numeric(out: &mut String, arr: &NdArray) -> Result<(), &'static str> {
    if arr.is_empty() {
        return Err("empty arrays cannot be written");
    }
    match arr.shape() {
        [] => {
            out.push_str("# type: scalar\n");
            let _ = writeln!(out, "{}", format_float(arr.data()[0]));
        }
        [n] => write_rows(out, 1, *n, arr.data()),
        [rows, columns] => write_rows(out, *rows, *columns, arr.data()),
        shape => {
            out.push_str("# type: matrix\n");
            let _ = writeln!(out, "# ndims: {}", shape.len());
            let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
            let _ = writeln!(out, " {}", dims.join(" "));
            for v in arr.to_column_major() {
                let _ = writeln!(out, " {}", format_float(v));
            }
        }
    }
    Ok(())
}

fn write_rows(out: &mut String, rows: usize, columns: usize, data: &[f64]) {
    out.push_str("# type: matrix\n");
    let _ = writeln!(out, "# rows: {rows}");
    let _ = writeln!(out, "# columns: {columns}");
    for row in data.chunks(columns) {
        for v in row {
            let _ = write!(out, " {}", format_float(*v));
        }
        out.push('\n');
    }
}

/// Shortest representation that parses back to the same bits.
fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}
