//! Loading of MRST reservoir-simulation exports.
//!
//! Each export directory is split into dataset categories (initial
//! conditions, static grid/rock data, dynamic field arrays, well time series,
//! temporal data and metadata) stored either as level 5 MAT-files or as Octave
//! text. [`DatasetAccessor`] resolves, loads, normalises and caches them.

pub mod data;
pub mod export;

pub use data::accessor::{load_with_fallback, DatasetAccessor, FileLoader, TableLoader};
pub use data::error::{ErrorKind, LoadError, MatError, ParseError, WriteError};
pub use data::layout::{AccessorConfig, DataLayout, DatasetCategory, DatasetHandle};
pub use data::model::{CellArray, NamedArrayTable, NdArray, StructArray, Value};
