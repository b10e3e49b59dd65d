use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::error::ShapeError;

// ---------------------------------------------------------------------------
// NdArray – a dense numeric array of arbitrary rank
// ---------------------------------------------------------------------------

/// Dense `f64` array stored in row-major order.
///
/// Rank 0 (`shape == []`) is a scalar and holds exactly one value. Every
/// integer, logical and single-precision class found in a data file is widened
/// to `f64` on load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NdArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl NdArray {
    /// Build an array from row-major data, checking the element count.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, ShapeError> {
        check_len(&shape, data.len())?;
        Ok(Self { shape, data })
    }

    /// Build an array from column-major (MATLAB / Octave order) data.
    pub fn from_column_major(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, ShapeError> {
        check_len(&shape, data.len())?;
        let data = column_major_to_row_major(&shape, data);
        Ok(Self { shape, data })
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major element buffer.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at a full multi-index, `None` when out of bounds or of the wrong rank.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (&i, &dim) in index.iter().zip(&self.shape) {
            if i >= dim {
                return None;
            }
            offset = offset * dim + i;
        }
        self.data.get(offset).copied()
    }

    /// Data re-ordered into column-major order (for writers).
    pub fn to_column_major(&self) -> Vec<f64> {
        row_major_to_column_major(&self.shape, &self.data)
    }

    /// Smallest and largest finite values, `None` if there are none.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Loader normalisation: `1×N` becomes a vector `[N]`.
    ///
    /// `1×1` goes one step further and becomes a rank-0 scalar rather than
    /// `[1]`, so MATLAB scalars and Octave `# type: scalar` blocks load alike.
    /// Any other shape is returned as is.
    pub fn squeeze(mut self) -> Self {
        let squeezed = match *self.shape.as_slice() {
            [1, 1] => Some(Vec::new()),
            [1, n] => Some(vec![n]),
            _ => None,
        };
        if let Some(shape) = squeezed {
            self.shape = shape;
        }
        self
    }
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_shape(&self.shape))
    }
}

/// `[3, 2, 2]` → `3x2x2`, `[]` → `scalar`.
pub fn format_shape(shape: &[usize]) -> String {
    if shape.is_empty() {
        return "scalar".to_string();
    }
    shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x")
}

/// Product of the dimensions, `None` on overflow.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

fn check_len(shape: &[usize], actual: usize) -> Result<(), ShapeError> {
    match element_count(shape) {
        None => Err(ShapeError::Overflow {
            shape: shape.to_vec(),
        }),
        Some(expected) if expected != actual => Err(ShapeError::Mismatch {
            shape: shape.to_vec(),
            expected,
            actual,
        }),
        Some(_) => Ok(()),
    }
}

/// Re-order a column-major buffer into row-major order for the given shape.
pub(crate) fn column_major_to_row_major<T: Clone>(shape: &[usize], data: Vec<T>) -> Vec<T> {
    if shape.len() < 2 {
        return data;
    }
    let col_strides = column_major_strides(shape);
    (0..data.len())
        .map(|row_major| {
            let mut rem = row_major;
            let mut offset = 0;
            for (k, &dim) in shape.iter().enumerate().rev() {
                offset += (rem % dim) * col_strides[k];
                rem /= dim;
            }
            data[offset].clone()
        })
        .collect()
}

pub(crate) fn row_major_to_column_major<T: Clone>(shape: &[usize], data: &[T]) -> Vec<T> {
    if shape.len() < 2 {
        return data.to_vec();
    }
    let mut out = data.to_vec();
    let col_strides = column_major_strides(shape);
    for (row_major, value) in data.iter().enumerate() {
        let mut rem = row_major;
        let mut offset = 0;
        for (k, &dim) in shape.iter().enumerate().rev() {
            offset += (rem % dim) * col_strides[k];
            rem /= dim;
        }
        out[offset] = value.clone();
    }
    out
}

fn column_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut acc = 1;
    for &dim in shape {
        strides.push(acc);
        acc *= dim;
    }
    strides
}

// ---------------------------------------------------------------------------
// Value – one named entry of a data file
// ---------------------------------------------------------------------------

/// A variable as stored in a MAT-file or Octave text file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Numeric(NdArray),
    /// Char matrix, one string per row.
    Text(Vec<String>),
    Struct(StructArray),
    Cell(CellArray),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Struct(_) => "struct",
            Value::Cell(_) => "cell",
        }
    }

    pub fn as_numeric(&self) -> Option<&NdArray> {
        match self {
            Value::Numeric(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&[String]> {
        match self {
            Value::Text(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructArray> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }
}

impl From<NdArray> for Value {
    fn from(arr: NdArray) -> Self {
        Value::Numeric(arr)
    }
}

/// MATLAB struct array: every element carries the same field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructArray {
    pub shape: Vec<usize>,
    /// Elements in row-major order.
    pub elements: Vec<NamedArrayTable>,
}

impl StructArray {
    /// Wrap a single record as a `1×1` struct.
    pub fn scalar(fields: NamedArrayTable) -> Self {
        Self {
            shape: vec![1, 1],
            elements: vec![fields],
        }
    }

    /// A struct holding exactly one record (`1×1`, or any shape with one element).
    pub fn is_scalar(&self) -> bool {
        self.elements.len() == 1
    }

    pub fn into_single(mut self) -> Option<NamedArrayTable> {
        if self.elements.len() == 1 {
            self.elements.pop()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellArray {
    pub shape: Vec<usize>,
    /// Items in row-major order.
    pub items: Vec<Value>,
}

// ---------------------------------------------------------------------------
// NamedArrayTable – variable name → value
// ---------------------------------------------------------------------------

/// The result of loading one data file: unique variable names mapped to values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NamedArrayTable {
    entries: BTreeMap<String, Value>,
}

impl NamedArrayTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, returning the previous value under `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn get_numeric(&self, name: &str) -> Option<&NdArray> {
        self.get(name).and_then(Value::as_numeric)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for NamedArrayTable {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a NamedArrayTable {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for NamedArrayTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
