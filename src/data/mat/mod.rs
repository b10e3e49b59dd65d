//! Binary MAT-file loading.
//!
//! MRST exports usually hold a single `1×1` struct whose fields are the real
//! data. [`load_mat`] drops `__`-prefixed bookkeeping entries, unwraps that one
//! struct level and maps legacy field names.

pub mod reader;
pub mod writer;

use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use super::alias::apply_field_aliases;
use super::error::{LoadError, MatError};
use super::model::{NamedArrayTable, StructArray, Value};

pub use reader::decode_mat;
pub use writer::{encode_mat, MatWriteOptions};

/// Load a level 5 MAT-file as a table.
///
/// A file that is not MAT v5 fails with an error of kind
/// [`ErrorKind::Unsupported`](super::error::ErrorKind::Unsupported), which the
/// accessor treats as "try the text parser".
pub fn load_mat(path: &Path) -> Result<NamedArrayTable, LoadError> {
    let bytes = fs::read(path).map_err(|e| LoadError::from_io(path, e))?;
    let table = decode_table(&bytes).map_err(|source| LoadError::Binary {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "loaded {} variables from MAT-file {}",
        table.len(),
        path.display()
    );
    Ok(apply_field_aliases(table))
}

/// Decode MAT-file bytes and unwrap a single struct wrapper. No aliasing.
pub fn decode_table(bytes: &[u8]) -> Result<NamedArrayTable, MatError> {
    let mut table = NamedArrayTable::new();
    for (name, value) in decode_mat(bytes)? {
        if table.insert(name.clone(), value).is_some() {
            return Err(MatError::Malformed {
                offset: 0,
                message: format!("duplicate variable '{name}'"),
            });
        }
    }
    Ok(unwrap_single_struct(table))
}

/// If the only entry is a one-element struct, return its fields instead.
///
/// Exactly one level is removed. A second wrapper is reported and left in place.
pub fn unwrap_single_struct(table: NamedArrayTable) -> NamedArrayTable {
    if table.len() != 1 {
        return table;
    }
    match table.into_iter().next() {
        Some((name, Value::Struct(s))) if s.is_scalar() => {
            let fields = s.into_single().unwrap_or_default();
            debug!("unwrapped struct '{name}' with {} fields", fields.len());
            if fields.len() == 1
                && fields
                    .iter()
                    .all(|(_, v)| v.as_struct().is_some_and(StructArray::is_scalar))
            {
                warn!("struct '{name}' wraps another single struct; only one level is unwrapped");
            }
            fields
        }
        other => other.into_iter().collect(),
    }
}

/// Inverse of [`unwrap_single_struct`]: nest a table under `name` as a `1×1` struct.
pub fn wrap_in_struct(name: &str, table: NamedArrayTable) -> NamedArrayTable {
    let mut out = NamedArrayTable::new();
    out.insert(name, Value::Struct(StructArray::scalar(table)));
    out
}
