//! Level 5 MAT-file decoder.
//!
//! Layout: a 128-byte header (116 bytes of text, subsystem offset, version
//! `0x0100`, endian indicator `IM`/`MI`) followed by data elements. Each element
//! has an 8-byte tag (type, byte count) and is padded to 8 bytes, except the
//! "small data element" form that packs up to 4 bytes into the tag itself.

use std::io::Read;

use flate2::read::ZlibDecoder;
use log::debug;

use crate::data::error::MatError;
use crate::data::model::{
    column_major_to_row_major, element_count, CellArray, NamedArrayTable, NdArray, StructArray,
    Value,
};

pub(crate) const HEADER_LEN: usize = 128;
pub(crate) const HEADER_TEXT_LEN: usize = 116;
pub(crate) const VERSION: u16 = 0x0100;

// Data types
pub(crate) const MI_INT8: u32 = 1;
pub(crate) const MI_UINT8: u32 = 2;
pub(crate) const MI_INT16: u32 = 3;
pub(crate) const MI_UINT16: u32 = 4;
pub(crate) const MI_INT32: u32 = 5;
pub(crate) const MI_UINT32: u32 = 6;
pub(crate) const MI_SINGLE: u32 = 7;
pub(crate) const MI_DOUBLE: u32 = 9;
pub(crate) const MI_INT64: u32 = 12;
pub(crate) const MI_UINT64: u32 = 13;
pub(crate) const MI_MATRIX: u32 = 14;
pub(crate) const MI_COMPRESSED: u32 = 15;
pub(crate) const MI_UTF8: u32 = 16;
pub(crate) const MI_UTF16: u32 = 17;
pub(crate) const MI_UTF32: u32 = 18;

// Array classes
pub(crate) const MX_CELL: u8 = 1;
pub(crate) const MX_STRUCT: u8 = 2;
pub(crate) const MX_CHAR: u8 = 4;
pub(crate) const MX_DOUBLE: u8 = 6;

pub(crate) const FLAG_COMPLEX: u32 = 0x0800;

/// Deepest chain of nested cells, structs and compressed elements accepted.
pub(crate) const MAX_DEPTH: usize = 64;

/// Fieldless struct elements occupy no bytes, so their count is capped instead.
const MAX_FIELDLESS_ELEMENTS: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u16(self, b: [u8; 2]) -> u16 {
        match self {
            Endian::Little => u16::from_le_bytes(b),
            Endian::Big => u16::from_be_bytes(b),
        }
    }

    fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        }
    }

    fn u64(self, b: [u8; 8]) -> u64 {
        match self {
            Endian::Little => u64::from_le_bytes(b),
            Endian::Big => u64::from_be_bytes(b),
        }
    }
}

fn arr2(c: &[u8]) -> [u8; 2] {
    [c[0], c[1]]
}

fn arr4(c: &[u8]) -> [u8; 4] {
    [c[0], c[1], c[2], c[3]]
}

fn arr8(c: &[u8]) -> [u8; 8] {
    [c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]
}

/// Decode every top-level variable, in file order.
///
/// Variables whose name starts with `__` are bookkeeping and are skipped.
pub fn decode_mat(bytes: &[u8]) -> Result<Vec<(String, Value)>, MatError> {
    let endian = check_header(bytes)?;
    let mut cursor = Cursor {
        buf: &bytes[HEADER_LEN..],
        pos: 0,
        endian,
        origin: HEADER_LEN as u64,
        inflated: false,
        depth: 0,
    };
    let mut vars = Vec::new();
    cursor.read_variables(&mut vars)?;
    Ok(vars)
}

fn check_header(bytes: &[u8]) -> Result<Endian, MatError> {
    let not_mat5 = |reason: &str| MatError::NotMat5 {
        reason: reason.to_string(),
    };
    if bytes.starts_with(b"MATLAB 7.3") {
        return Err(not_mat5("MATLAB 7.3 (HDF5) files are not supported"));
    }
    if bytes.len() < HEADER_LEN {
        return Err(not_mat5("file is shorter than the 128-byte header"));
    }
    let endian = match &bytes[126..128] {
        b"IM" => Endian::Little,
        b"MI" => Endian::Big,
        _ => return Err(not_mat5("missing endian indicator")),
    };
    let version = endian.u16(arr2(&bytes[124..126]));
    if version != VERSION {
        return Err(not_mat5(&format!("unsupported version 0x{version:04x}")));
    }
    Ok(endian)
}

struct Element<'a> {
    ty: u32,
    data: &'a [u8],
    /// Offset of the tag within the cursor buffer.
    at: usize,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    endian: Endian,
    /// Absolute file offset used in error reports.
    origin: u64,
    /// Buffer is the output of a compressed element; offsets are not file offsets.
    inflated: bool,
    depth: usize,
}

impl<'a> Cursor<'a> {
    /// Cursor over the body of the element tagged at `at`, one level deeper.
    fn sub(&self, buf: &'a [u8], at: usize) -> Result<Cursor<'a>, MatError> {
        let depth = self.deeper(at)?;
        Ok(Cursor {
            buf,
            pos: 0,
            endian: self.endian,
            origin: if self.inflated {
                self.origin
            } else {
                self.origin + at as u64 + 8
            },
            inflated: self.inflated,
            depth,
        })
    }

    fn deeper(&self, at: usize) -> Result<usize, MatError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.malformed(at, format!("elements nested deeper than {MAX_DEPTH} levels")));
        }
        Ok(self.depth + 1)
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn count_of(&self, dims: &[usize]) -> Result<usize, MatError> {
        element_count(dims)
            .ok_or_else(|| self.malformed(self.pos, format!("dimensions {dims:?} overflow")))
    }

    fn malformed(&self, at: usize, message: impl Into<String>) -> MatError {
        let message = message.into();
        if self.inflated {
            MatError::Malformed {
                offset: self.origin,
                message: format!("{message} (inside compressed element, +{at})"),
            }
        } else {
            MatError::Malformed {
                offset: self.origin + at as u64,
                message,
            }
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn next_element(&mut self) -> Result<Element<'a>, MatError> {
        let at = self.pos;
        let buf = self.buf;
        if buf.len() < at + 8 {
            // A small element only needs its 8-byte slot too.
            return Err(self.malformed(at, "truncated element tag"));
        }
        let first = self.endian.u32(arr4(&buf[at..at + 4]));
        let small_len = (first >> 16) as usize;
        if small_len != 0 {
            if small_len > 4 {
                return Err(self.malformed(at, format!("small element claims {small_len} bytes")));
            }
            self.pos = at + 8;
            return Ok(Element {
                ty: first & 0xFFFF,
                data: &buf[at + 4..at + 4 + small_len],
                at,
            });
        }
        let len = self.endian.u32(arr4(&buf[at + 4..at + 8])) as usize;
        let start = at + 8;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| self.malformed(at, format!("element of {len} bytes runs past end of data")))?;
        // Compressed elements are not padded, and the last element may lack padding.
        let next = if first == MI_COMPRESSED {
            end
        } else {
            (end + 7) / 8 * 8
        };
        self.pos = next.min(buf.len());
        Ok(Element {
            ty: first,
            data: &buf[start..end],
            at,
        })
    }

    fn expect_element(&mut self, what: &str) -> Result<Element<'a>, MatError> {
        if self.at_end() {
            return Err(self.malformed(self.pos, format!("missing {what}")));
        }
        self.next_element()
    }

    fn read_variables(&mut self, vars: &mut Vec<(String, Value)>) -> Result<(), MatError> {
        while !self.at_end() {
            let el = self.next_element()?;
            match el.ty {
                MI_MATRIX => {
                    let mut sub = self.sub(el.data, el.at)?;
                    if let Some((name, value)) = sub.read_matrix(true)? {
                        vars.push((name, value));
                    }
                }
                MI_COMPRESSED => {
                    let depth = self.deeper(el.at)?;
                    let mut inflated = Vec::new();
                    ZlibDecoder::new(el.data)
                        .read_to_end(&mut inflated)
                        .map_err(|e| self.malformed(el.at, format!("inflating element: {e}")))?;
                    let mut inner = Cursor {
                        buf: &inflated,
                        pos: 0,
                        endian: self.endian,
                        origin: if self.inflated {
                            self.origin
                        } else {
                            self.origin + el.at as u64
                        },
                        inflated: true,
                        depth,
                    };
                    inner.read_variables(vars)?;
                }
                other => {
                    debug!("skipping top-level element of type {other}");
                }
            }
        }
        Ok(())
    }

    /// Decode the body of an `miMATRIX` element.
    ///
    /// Returns `None` for skipped top-level bookkeeping variables.
    fn read_matrix(&mut self, top_level: bool) -> Result<Option<(String, Value)>, MatError> {
        if self.buf.is_empty() {
            // Empty placeholder, e.g. an unset struct field.
            let empty = NdArray::new(vec![0, 0], Vec::new())
                .map_err(|e| self.malformed(0, e.to_string()))?;
            return Ok(Some((String::new(), Value::Numeric(empty))));
        }

        let flags_el = self.expect_element("array flags")?;
        if flags_el.data.len() < 8 {
            return Err(self.malformed(flags_el.at, "array flags too short"));
        }
        let flags = self.endian.u32(arr4(&flags_el.data[0..4]));
        let class = (flags & 0xFF) as u8;

        let dims_el = self.expect_element("dimensions")?;
        let dims = self.read_dims(&dims_el)?;

        let name_el = self.expect_element("array name")?;
        let name = String::from_utf8_lossy(name_el.data)
            .trim_end_matches('\0')
            .to_string();

        if top_level && name.starts_with("__") {
            debug!("skipping bookkeeping variable '{name}'");
            return Ok(None);
        }

        let value = match class {
            MX_CELL => self.read_cell(dims)?,
            MX_STRUCT => self.read_struct(dims)?,
            MX_CHAR => self.read_char(dims)?,
            6..=15 => {
                if flags & FLAG_COMPLEX != 0 {
                    return Err(MatError::UnsupportedClass {
                        variable: name,
                        class: "complex".to_string(),
                    });
                }
                self.read_numeric(dims)?
            }
            other => {
                return Err(MatError::UnsupportedClass {
                    variable: name,
                    class: class_name(other).to_string(),
                })
            }
        };
        Ok(Some((name, value)))
    }

    fn read_dims(&self, el: &Element<'_>) -> Result<Vec<usize>, MatError> {
        if el.ty != MI_INT32 || el.data.len() % 4 != 0 || el.data.len() < 8 {
            return Err(self.malformed(el.at, "dimensions must be at least two int32 values"));
        }
        el.data
            .chunks_exact(4)
            .map(|c| {
                let d = self.endian.u32(arr4(c)) as i32;
                usize::try_from(d).map_err(|_| self.malformed(el.at, format!("negative dimension {d}")))
            })
            .collect()
    }

    fn read_numeric(&mut self, dims: Vec<usize>) -> Result<Value, MatError> {
        let real = self.expect_element("real part")?;
        let data = decode_numbers(real.ty, real.data, self.endian)
            .ok_or_else(|| self.malformed(real.at, format!("data type {} is not numeric", real.ty)))?;
        let arr = NdArray::from_column_major(dims, data)
            .map_err(|e| self.malformed(real.at, e.to_string()))?;
        Ok(Value::Numeric(arr.squeeze()))
    }

    fn read_char(&mut self, dims: Vec<usize>) -> Result<Value, MatError> {
        let count = self.count_of(&dims)?;
        if count == 0 {
            if !self.at_end() {
                self.next_element()?;
            }
            return Ok(Value::Text(Vec::new()));
        }
        let el = self.expect_element("character data")?;
        let chars: Vec<char> = match el.ty {
            MI_UTF8 | MI_UINT8 | MI_INT8 => match std::str::from_utf8(el.data) {
                Ok(s) => s.chars().collect(),
                // Legacy 8-bit text
                Err(_) => el.data.iter().map(|&b| char::from(b)).collect(),
            },
            MI_UTF16 | MI_UINT16 | MI_INT16 => {
                let units: Vec<u16> = el
                    .data
                    .chunks_exact(2)
                    .map(|c| self.endian.u16(arr2(c)))
                    .collect();
                char::decode_utf16(units)
                    .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect()
            }
            MI_UTF32 | MI_UINT32 | MI_INT32 => el
                .data
                .chunks_exact(4)
                .map(|c| char::from_u32(self.endian.u32(arr4(c))).unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect(),
            other => return Err(self.malformed(el.at, format!("data type {other} is not text"))),
        };
        if chars.len() != count {
            return Err(self.malformed(
                el.at,
                format!("char array holds {} characters, dimensions imply {count}", chars.len()),
            ));
        }
        let rows = dims[0];
        let chars = column_major_to_row_major(&dims, chars);
        Ok(Value::Text(
            chars
                .chunks(count / rows)
                .map(|row| row.iter().collect())
                .collect(),
        ))
    }

    fn read_struct(&mut self, dims: Vec<usize>) -> Result<Value, MatError> {
        let len_el = self.expect_element("field name length")?;
        if len_el.data.len() < 4 {
            return Err(self.malformed(len_el.at, "field name length too short"));
        }
        let name_len = self.endian.u32(arr4(&len_el.data[0..4])) as usize;
        let names_el = self.expect_element("field names")?;
        let fields: Vec<String> = if names_el.data.is_empty() {
            Vec::new()
        } else if name_len == 0 || names_el.data.len() % name_len != 0 {
            return Err(self.malformed(
                names_el.at,
                "field name block is not a multiple of the name length",
            ));
        } else {
            names_el
                .data
                .chunks(name_len)
                .map(|c| String::from_utf8_lossy(c).trim_end_matches('\0').to_string())
                .collect()
        };

        let count = self.count_of(&dims)?;
        // Every field value is an element with at least an 8-byte tag.
        let fits = if fields.is_empty() {
            count <= MAX_FIELDLESS_ELEMENTS
        } else {
            count
                .checked_mul(fields.len())
                .is_some_and(|n| n <= self.remaining() / 8)
        };
        if !fits {
            return Err(self.malformed(
                names_el.at,
                format!("struct dimensions {dims:?} exceed the data that follows"),
            ));
        }
        let mut elements = Vec::new();
        for _ in 0..count {
            let mut record = NamedArrayTable::new();
            for field in &fields {
                let value = self.read_nested(field)?;
                record.insert(field.clone(), value);
            }
            elements.push(record);
        }
        let elements = column_major_to_row_major(&dims, elements);
        Ok(Value::Struct(StructArray {
            shape: dims,
            elements,
        }))
    }

    fn read_cell(&mut self, dims: Vec<usize>) -> Result<Value, MatError> {
        let count = self.count_of(&dims)?;
        if count > self.remaining() / 8 {
            return Err(self.malformed(
                self.pos,
                format!("cell dimensions {dims:?} exceed the data that follows"),
            ));
        }
        let mut items = Vec::new();
        for i in 0..count {
            items.push(self.read_nested(&format!("cell {i}"))?);
        }
        let items = column_major_to_row_major(&dims, items);
        Ok(Value::Cell(CellArray { shape: dims, items }))
    }

    fn read_nested(&mut self, what: &str) -> Result<Value, MatError> {
        let el = self.expect_element(what)?;
        if el.ty != MI_MATRIX {
            return Err(self.malformed(el.at, format!("{what}: expected a matrix element, found type {}", el.ty)));
        }
        let mut sub = self.sub(el.data, el.at)?;
        match sub.read_matrix(false)? {
            Some((_, value)) => Ok(value),
            None => Err(self.malformed(el.at, format!("{what}: empty element"))),
        }
    }
}

fn decode_numbers(ty: u32, data: &[u8], endian: Endian) -> Option<Vec<f64>> {
    let values = match ty {
        MI_INT8 => data.iter().map(|&b| f64::from(b as i8)).collect(),
        MI_UINT8 => data.iter().map(|&b| f64::from(b)).collect(),
        MI_INT16 => data
            .chunks_exact(2)
            .map(|c| f64::from(endian.u16(arr2(c)) as i16))
            .collect(),
        MI_UINT16 => data
            .chunks_exact(2)
            .map(|c| f64::from(endian.u16(arr2(c))))
            .collect(),
        MI_INT32 => data
            .chunks_exact(4)
            .map(|c| f64::from(endian.u32(arr4(c)) as i32))
            .collect(),
        MI_UINT32 => data
            .chunks_exact(4)
            .map(|c| f64::from(endian.u32(arr4(c))))
            .collect(),
        MI_SINGLE => data
            .chunks_exact(4)
            .map(|c| f64::from(f32::from_bits(endian.u32(arr4(c)))))
            .collect(),
        MI_DOUBLE => data
            .chunks_exact(8)
            .map(|c| f64::from_bits(endian.u64(arr8(c))))
            .collect(),
        MI_INT64 => data
            .chunks_exact(8)
            .map(|c| endian.u64(arr8(c)) as i64 as f64)
            .collect(),
        MI_UINT64 => data
            .chunks_exact(8)
            .map(|c| endian.u64(arr8(c)) as f64)
            .collect(),
        _ => return None,
    };
    Some(values)
}

fn class_name(class: u8) -> &'static str {
    match class {
        3 => "object",
        5 => "sparse",
        16 => "function handle",
        17 => "opaque",
        _ => "unknown",
    }
}
