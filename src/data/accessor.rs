use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use super::alias::{apply_aliases, category_aliases};
use super::cache::{Cache, FileStamp};
use super::error::{ErrorKind, LoadError};
use super::layout::{AccessorConfig, DatasetCategory, DatasetHandle};
use super::mat::load_mat;
use super::model::NamedArrayTable;
use super::octave::load_octave_text;

// ---------------------------------------------------------------------------
// Loader seam
// ---------------------------------------------------------------------------

/// The two file loaders the accessor chains. Swappable so tests can count calls.
pub trait TableLoader {
    fn load_binary(&self, path: &Path) -> Result<NamedArrayTable, LoadError>;
    fn load_text(&self, path: &Path) -> Result<NamedArrayTable, LoadError>;
}

/// MAT v5 reader followed by the Octave text parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl TableLoader for FileLoader {
    fn load_binary(&self, path: &Path) -> Result<NamedArrayTable, LoadError> {
        load_mat(path)
    }

    fn load_text(&self, path: &Path) -> Result<NamedArrayTable, LoadError> {
        load_octave_text(path)
    }
}

/// Try the binary loader, then the text loader on the same path.
///
/// When both fail the binary error wins if it is a parse or schema failure
/// (the file really was a MAT-file); otherwise the text error is returned.
pub fn load_with_fallback<L: TableLoader + ?Sized>(
    loader: &L,
    path: &Path,
) -> Result<NamedArrayTable, LoadError> {
    let binary_err = match loader.load_binary(path) {
        Ok(table) => return Ok(table),
        Err(e) => e,
    };
    if binary_err.kind() == ErrorKind::Unsupported {
        debug!("{} is not a MAT v5 file, trying Octave text", path.display());
    } else {
        warn!("binary load failed ({binary_err}), trying Octave text");
    }
    match loader.load_text(path) {
        Ok(table) => Ok(table),
        Err(text_err) => match binary_err.kind() {
            ErrorKind::Parse | ErrorKind::SchemaMismatch => Err(binary_err),
            _ => Err(text_err),
        },
    }
}

// ---------------------------------------------------------------------------
// DatasetAccessor
// ---------------------------------------------------------------------------

/// Entry point for reading an MRST export directory.
///
/// Results are cached per category until the resolved file's mtime or size
/// changes, or [`clear_cache`](Self::clear_cache) is called. Methods take
/// `&mut self`; sharing an accessor across threads needs external locking.
pub struct DatasetAccessor<L = FileLoader> {
    config: AccessorConfig,
    loader: L,
    cache: Cache,
}

impl DatasetAccessor<FileLoader> {
    pub fn new(config: AccessorConfig) -> Self {
        Self::with_loader(config, FileLoader)
    }
}

impl<L: TableLoader> DatasetAccessor<L> {
    pub fn with_loader(config: AccessorConfig, loader: L) -> Self {
        Self {
            config,
            loader,
            cache: Cache::new(),
        }
    }

    pub fn config(&self) -> &AccessorConfig {
        &self.config
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn handle(&self, category: DatasetCategory) -> DatasetHandle {
        self.config.layout.handle(&self.config.data_root, category)
    }

    /// The file a category would be loaded from.
    pub fn resolve(&self, category: DatasetCategory) -> Result<PathBuf, LoadError> {
        self.handle(category).resolve()
    }

    /// Load (or return the cached) table for a category.
    pub fn get(&mut self, category: DatasetCategory) -> Result<Arc<NamedArrayTable>, LoadError> {
        let path = self.resolve(category)?;
        let stamp = FileStamp::of(&path).map_err(|e| LoadError::from_io(&path, e))?;
        if let Some(table) = self.cache.get(category, &path, stamp) {
            debug!("cache hit for {category} ({})", path.display());
            return Ok(table);
        }

        debug!("loading {category} from {}", path.display());
        // Stale entry; a failed reload must not leave it behind.
        self.cache.invalidate(category);
        let table = load_with_fallback(&self.loader, &path)?;
        let table = apply_aliases(table, category_aliases(category));
        check_required(category, &path, &table)?;
        info!("{category}: {} variables from {}", table.len(), path.display());
        Ok(self.cache.insert(category, path, stamp, table))
    }

    pub fn get_initial(&mut self) -> Result<Arc<NamedArrayTable>, LoadError> {
        self.get(DatasetCategory::Initial)
    }

    pub fn get_static(&mut self) -> Result<Arc<NamedArrayTable>, LoadError> {
        self.get(DatasetCategory::Static)
    }

    pub fn get_dynamic_fields(&mut self) -> Result<Arc<NamedArrayTable>, LoadError> {
        self.get(DatasetCategory::DynamicFields)
    }

    pub fn get_well_data(&mut self) -> Result<Arc<NamedArrayTable>, LoadError> {
        self.get(DatasetCategory::WellData)
    }

    pub fn get_temporal(&mut self) -> Result<Arc<NamedArrayTable>, LoadError> {
        self.get(DatasetCategory::Temporal)
    }

    pub fn get_metadata(&mut self) -> Result<Arc<NamedArrayTable>, LoadError> {
        self.get(DatasetCategory::Metadata)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

fn check_required(
    category: DatasetCategory,
    path: &Path,
    table: &NamedArrayTable,
) -> Result<(), LoadError> {
    let missing: Vec<String> = category
        .required_fields()
        .iter()
        .filter(|f| !table.contains(f))
        .map(|f| f.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LoadError::SchemaMismatch {
            category,
            path: path.to_path_buf(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::error::{MatError, ParseError};
    use crate::data::model::NdArray;

    /// Loader returning canned results, for exercising the fallback rules.
    struct Canned {
        binary: fn() -> Result<NamedArrayTable, LoadError>,
        text: fn() -> Result<NamedArrayTable, LoadError>,
    }

    impl TableLoader for Canned {
        fn load_binary(&self, _: &Path) -> Result<NamedArrayTable, LoadError> {
            (self.binary)()
        }
        fn load_text(&self, _: &Path) -> Result<NamedArrayTable, LoadError> {
            (self.text)()
        }
    }

    fn unsupported() -> Result<NamedArrayTable, LoadError> {
        Err(LoadError::Binary {
            path: "f".into(),
            source: MatError::NotMat5 {
                reason: "text".into(),
            },
        })
    }

    fn malformed() -> Result<NamedArrayTable, LoadError> {
        Err(LoadError::Binary {
            path: "f".into(),
            source: MatError::Malformed {
                offset: 200,
                message: "truncated".into(),
            },
        })
    }

    fn bad_text() -> Result<NamedArrayTable, LoadError> {
        Err(LoadError::Text {
            path: "f".into(),
            source: ParseError::new(Some("phi"), 3, "bad"),
        })
    }

    fn good() -> Result<NamedArrayTable, LoadError> {
        Ok([("phi", NdArray::scalar(0.3))].into_iter().collect())
    }

    #[test]
    fn text_result_used_when_binary_unsupported() {
        let loader = Canned {
            binary: unsupported,
            text: good,
        };
        assert!(load_with_fallback(&loader, Path::new("f")).is_ok());
    }

    #[test]
    fn text_error_reported_when_binary_unsupported() {
        let loader = Canned {
            binary: unsupported,
            text: bad_text,
        };
        let err = load_with_fallback(&loader, Path::new("f")).unwrap_err();
        assert!(matches!(err, LoadError::Text { .. }));
    }

    #[test]
    fn binary_parse_error_preferred_over_text_error() {
        let loader = Canned {
            binary: malformed,
            text: bad_text,
        };
        let err = load_with_fallback(&loader, Path::new("f")).unwrap_err();
        assert!(matches!(err, LoadError::Binary { .. }));
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn required_fields_are_enforced() {
        let table: NamedArrayTable = [("pressure", NdArray::scalar(1.0))].into_iter().collect();
        let err = check_required(DatasetCategory::Initial, Path::new("i.mat"), &table).unwrap_err();
        match err {
            LoadError::SchemaMismatch { missing, .. } => assert_eq!(missing, vec!["sw"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_required(DatasetCategory::Metadata, Path::new("m.txt"), &table).is_ok());
    }
}
