//! Level 5 MAT-file encoder (little-endian).

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::reader::{
    HEADER_TEXT_LEN, MI_COMPRESSED, MI_DOUBLE, MI_INT32, MI_INT8, MI_MATRIX, MI_UINT32, MI_UTF8,
    MX_CELL, MX_CHAR, MX_DOUBLE, MX_STRUCT, VERSION,
};
use crate::data::error::WriteError;
use crate::data::model::{row_major_to_column_major, NamedArrayTable, NdArray, Value};

const FIELD_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct MatWriteOptions {
    /// Wrap every variable in a zlib `miCOMPRESSED` element.
    pub compress: bool,
}

/// Encode a table as a complete MAT-file.
pub fn encode_mat(table: &NamedArrayTable, options: MatWriteOptions) -> Result<Vec<u8>, WriteError> {
    let mut out = header();
    for (name, value) in table {
        let element = encode_matrix(name, value).map_err(|reason| WriteError {
            name: name.clone(),
            reason,
        })?;
        if options.compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            let compressed = encoder
                .write_all(&element)
                .and_then(|_| encoder.finish())
                .map_err(|e| WriteError {
                    name: name.clone(),
                    reason: format!("compressing: {e}"),
                })?;
            let len = tag_len(compressed.len()).map_err(|reason| WriteError {
                name: name.clone(),
                reason,
            })?;
            out.extend_from_slice(&MI_COMPRESSED.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&compressed);
        } else {
            out.extend_from_slice(&element);
        }
    }
    Ok(out)
}

fn header() -> Vec<u8> {
    let text = b"MATLAB 5.0 MAT-file, Platform: rusty-reservoir";
    let mut out = vec![b' '; HEADER_TEXT_LEN];
    out[..text.len()].copy_from_slice(text);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(b"IM");
    out
}

/// A full `miMATRIX` element, tag included.
fn encode_matrix(name: &str, value: &Value) -> Result<Vec<u8>, String> {
    let mut body = Vec::new();
    match value {
        Value::Numeric(arr) => {
            let dims = matlab_dims(arr);
            push_header(&mut body, MX_DOUBLE, &dims, name)?;
            let data: Vec<u8> = arr
                .to_column_major()
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect();
            push_element(&mut body, MI_DOUBLE, &data)?;
        }
        Value::Text(rows) => {
            let width = rows.iter().map(|r| r.chars().count()).max().unwrap_or(0);
            if rows.iter().any(|r| r.chars().count() != width) {
                return Err("char matrix rows must all have the same length".to_string());
            }
            let dims = if rows.is_empty() {
                vec![0, 0]
            } else {
                vec![rows.len(), width]
            };
            push_header(&mut body, MX_CHAR, &dims, name)?;
            let chars: Vec<char> = rows.iter().flat_map(|r| r.chars()).collect();
            let text: String = row_major_to_column_major(&dims, &chars).into_iter().collect();
            push_element(&mut body, MI_UTF8, text.as_bytes())?;
        }
        Value::Struct(s) => {
            let fields: Vec<&str> = s
                .elements
                .first()
                .map(|first| first.names().collect())
                .unwrap_or_default();
            for element in &s.elements {
                if !element.names().eq(fields.iter().copied()) {
                    return Err("struct elements have different fields".to_string());
                }
            }
            push_header(&mut body, MX_STRUCT, &s.shape, name)?;
            push_element(&mut body, MI_INT32, &(FIELD_NAME_LEN as i32).to_le_bytes())?;
            let mut names = Vec::with_capacity(fields.len() * FIELD_NAME_LEN);
            for field in &fields {
                if field.len() >= FIELD_NAME_LEN {
                    return Err(format!("field name '{field}' is too long"));
                }
                let mut padded = field.as_bytes().to_vec();
                padded.resize(FIELD_NAME_LEN, 0);
                names.extend_from_slice(&padded);
            }
            push_element(&mut body, MI_INT8, &names)?;
            for element in row_major_to_column_major(&s.shape, &s.elements) {
                for (_, field_value) in &element {
                    body.extend_from_slice(&encode_matrix("", field_value)?);
                }
            }
        }
        Value::Cell(c) => {
            push_header(&mut body, MX_CELL, &c.shape, name)?;
            for item in row_major_to_column_major(&c.shape, &c.items) {
                body.extend_from_slice(&encode_matrix("", &item)?);
            }
        }
    }
    let len = tag_len(body.len())?;
    let mut element = Vec::with_capacity(body.len() + 8);
    element.extend_from_slice(&MI_MATRIX.to_le_bytes());
    element.extend_from_slice(&len.to_le_bytes());
    element.extend_from_slice(&body);
    Ok(element)
}

/// Scalars are `1×1` and vectors `1×N`, as MATLAB stores them.
fn matlab_dims(arr: &NdArray) -> Vec<usize> {
    match arr.shape() {
        [] => vec![1, 1],
        [n] => vec![1, *n],
        shape => shape.to_vec(),
    }
}

fn push_header(body: &mut Vec<u8>, class: u8, dims: &[usize], name: &str) -> Result<(), String> {
    let mut flags = Vec::with_capacity(8);
    flags.extend_from_slice(&u32::from(class).to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    push_element(body, MI_UINT32, &flags)?;

    let mut dim_bytes = Vec::with_capacity(dims.len().max(2) * 4);
    for &d in dims {
        let d = i32::try_from(d).map_err(|_| format!("dimension {d} exceeds int32"))?;
        dim_bytes.extend_from_slice(&d.to_le_bytes());
    }
    push_element(body, MI_INT32, &dim_bytes)?;
    push_element(body, MI_INT8, name.as_bytes())
}

/// Byte count for a tag; elements are limited to `u32::MAX` bytes.
fn tag_len(len: usize) -> Result<u32, String> {
    u32::try_from(len).map_err(|_| format!("element of {len} bytes exceeds the 4 GiB tag limit"))
}

/// Tag + data + padding, using the small element form for 1–4 bytes.
fn push_element(out: &mut Vec<u8>, ty: u32, data: &[u8]) -> Result<(), String> {
    let len = tag_len(data.len())?;
    if (1..=4).contains(&len) {
        out.extend_from_slice(&((len << 16) | ty).to_le_bytes());
        out.extend_from_slice(data);
        out.resize(out.len() + 4 - data.len(), 0);
        return Ok(());
    }
    out.extend_from_slice(&ty.to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    let padding = (8 - data.len() % 8) % 8;
    out.resize(out.len() + padding, 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mat::reader::decode_mat;
    use crate::data::model::{CellArray, StructArray};

    fn decode_table(bytes: &[u8]) -> NamedArrayTable {
        decode_mat(bytes).unwrap().into_iter().collect()
    }

    fn sample() -> NamedArrayTable {
        let mut well = NamedArrayTable::new();
        well.insert("name", Value::Text(vec!["PROD1".into()]));
        well.insert("cells", NdArray::vector(vec![4.0, 8.0]));

        let mut table = NamedArrayTable::new();
        table.insert("rock_id", NdArray::new(vec![2, 3], vec![1., 2., 3., 4., 5., 6.]).unwrap());
        table.insert("grid_x", NdArray::vector(vec![0.0, 10.0, 20.0]));
        table.insert("nx", NdArray::scalar(3.0));
        table.insert("wells", Value::Struct(StructArray::scalar(well)));
        table.insert(
            "labels",
            Value::Cell(CellArray {
                shape: vec![1, 2],
                items: vec![Value::Text(vec!["ab".into()]), NdArray::scalar(7.0).into()],
            }),
        );
        table.insert("well_names", Value::Text(vec!["INJ1 ".into(), "PROD1".into()]));
        table
    }

    #[test]
    fn uncompressed_round_trip() {
        let table = sample();
        let bytes = encode_mat(&table, MatWriteOptions::default()).unwrap();
        assert_eq!(decode_table(&bytes), table);
    }

    #[test]
    fn compressed_round_trip() {
        let table = sample();
        let bytes = encode_mat(&table, MatWriteOptions { compress: true }).unwrap();
        assert_eq!(decode_table(&bytes), table);
    }

    #[test]
    fn three_dimensional_field_keeps_shape() {
        let data: Vec<f64> = (0..12).map(f64::from).collect();
        let mut table = NamedArrayTable::new();
        table.insert("pressure", NdArray::new(vec![3, 2, 2], data).unwrap());
        let bytes = encode_mat(&table, MatWriteOptions::default()).unwrap();
        assert_eq!(decode_table(&bytes), table);
    }

    #[test]
    fn ragged_text_is_rejected() {
        let mut table = NamedArrayTable::new();
        table.insert("names", Value::Text(vec!["a".into(), "bcd".into()]));
        let err = encode_mat(&table, MatWriteOptions::default()).unwrap_err();
        assert_eq!(err.name, "names");
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn lengths_beyond_u32_are_rejected() {
        assert_eq!(tag_len(u32::MAX as usize), Ok(u32::MAX));
        let err = tag_len(u32::MAX as usize + 1).unwrap_err();
        assert!(err.contains("4294967296 bytes"), "{err}");
    }

    #[test]
    fn small_elements_pack_into_the_tag() {
        let mut out = Vec::new();
        push_element(&mut out, MI_INT8, b"ab").unwrap();
        assert_eq!(out, [1, 0, 2, 0, b'a', b'b', 0, 0]);

        out.clear();
        push_element(&mut out, MI_INT8, b"abcde").unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[4..8], &5u32.to_le_bytes());
    }
}
