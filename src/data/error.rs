use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::layout::DatasetCategory;

/// A shape that cannot describe the data supplied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("shape {shape:?} holds {expected} elements but {actual} values were supplied")]
    Mismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("shape {shape:?} has more elements than can be addressed")]
    Overflow { shape: Vec<usize> },
}

/// Malformed Octave text content. `line` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}{}: {message}", variable_suffix(.variable))]
pub struct ParseError {
    pub variable: Option<String>,
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(variable: Option<&str>, line: usize, message: impl Into<String>) -> Self {
        Self {
            variable: variable.map(str::to_string),
            line,
            message: message.into(),
        }
    }
}

fn variable_suffix(variable: &Option<String>) -> String {
    match variable {
        Some(name) => format!(" (variable '{name}')"),
        None => String::new(),
    }
}

/// Failure to decode a binary MAT-file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatError {
    /// Not a level 5 MAT-file at all (text, v4, v7.3/HDF5 ...).
    #[error("not a level 5 MAT-file: {reason}")]
    NotMat5 { reason: String },

    #[error("malformed MAT-file at byte {offset}: {message}")]
    Malformed { offset: u64, message: String },

    #[error("variable '{variable}' has unsupported array class {class}")]
    UnsupportedClass { variable: String, class: String },
}

/// A value that the Octave text writer cannot represent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("variable '{name}': {reason}")]
pub struct WriteError {
    pub name: String,
    pub reason: String,
}

/// The coarse error taxonomy callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Parse,
    SchemaMismatch,
    /// File exists but is in a format the loader does not handle.
    Unsupported,
    Io,
}

/// Error returned by the file loaders and [`DatasetAccessor`](super::accessor::DatasetAccessor).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no data file found; tried: {}", join_paths(.tried))]
    NotFound { tried: Vec<PathBuf> },

    #[error("{}: {source}", .path.display())]
    Text {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("{}: {source}", .path.display())]
    Binary {
        path: PathBuf,
        #[source]
        source: MatError,
    },

    #[error("{}: {category} data is missing required fields: {}", .path.display(), .missing.join(", "))]
    SchemaMismatch {
        category: DatasetCategory,
        path: PathBuf,
        missing: Vec<String>,
    },

    #[error("reading {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::NotFound { .. } => ErrorKind::NotFound,
            LoadError::Text { .. } => ErrorKind::Parse,
            LoadError::Binary { source, .. } => match source {
                MatError::NotMat5 { .. } => ErrorKind::Unsupported,
                MatError::Malformed { .. } | MatError::UnsupportedClass { .. } => ErrorKind::Parse,
            },
            LoadError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            LoadError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Map an I/O failure on `path`, turning a missing file into `NotFound`.
    pub(crate) fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            LoadError::NotFound {
                tried: vec![path.to_path_buf()],
            }
        } else {
            LoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_variable_and_line() {
        let err = ParseError::new(Some("phi"), 7, "expected 2 values, found 1");
        assert_eq!(
            err.to_string(),
            "line 7 (variable 'phi'): expected 2 values, found 1"
        );
        let err = ParseError::new(None, 1, "no variables found");
        assert_eq!(err.to_string(), "line 1: no variables found");
    }

    #[test]
    fn not_found_lists_every_candidate() {
        let err = LoadError::NotFound {
            tried: vec![PathBuf::from("a/x.mat"), PathBuf::from("a/x.txt")],
        };
        assert_eq!(err.to_string(), "no data file found; tried: a/x.mat, a/x.txt");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn binary_errors_map_onto_taxonomy() {
        let unsupported = LoadError::Binary {
            path: PathBuf::from("f.mat"),
            source: MatError::NotMat5 {
                reason: "bad version".into(),
            },
        };
        assert_eq!(unsupported.kind(), ErrorKind::Unsupported);

        let malformed = LoadError::Binary {
            path: PathBuf::from("f.mat"),
            source: MatError::Malformed {
                offset: 128,
                message: "truncated".into(),
            },
        };
        assert_eq!(malformed.kind(), ErrorKind::Parse);
    }

    #[test]
    fn missing_file_io_becomes_not_found() {
        let err = LoadError::from_io(
            Path::new("gone.mat"),
            io::Error::new(io::ErrorKind::NotFound, "nope"),
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = LoadError::from_io(
            Path::new("locked.mat"),
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
