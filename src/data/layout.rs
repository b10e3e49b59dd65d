use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::error::LoadError;

// ---------------------------------------------------------------------------
// DatasetCategory
// ---------------------------------------------------------------------------

/// The logical groupings an MRST export is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetCategory {
    Initial,
    Static,
    DynamicFields,
    WellData,
    Temporal,
    Metadata,
}

impl DatasetCategory {
    pub const ALL: [DatasetCategory; 6] = [
        DatasetCategory::Initial,
        DatasetCategory::Static,
        DatasetCategory::DynamicFields,
        DatasetCategory::WellData,
        DatasetCategory::Temporal,
        DatasetCategory::Metadata,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetCategory::Initial => "initial",
            DatasetCategory::Static => "static",
            DatasetCategory::DynamicFields => "dynamic_fields",
            DatasetCategory::WellData => "well_data",
            DatasetCategory::Temporal => "temporal",
            DatasetCategory::Metadata => "metadata",
        }
    }

    /// Fields that must be present (after aliasing) for a load to succeed.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            DatasetCategory::Initial => &["pressure", "sw"],
            DatasetCategory::Static => &["rock_id", "grid_x", "grid_y"],
            DatasetCategory::DynamicFields => &["pressure"],
            DatasetCategory::WellData => &["time_days"],
            DatasetCategory::Temporal => &["time_days"],
            DatasetCategory::Metadata => &[],
        }
    }

    /// Conventional locations relative to the data root, in priority order.
    pub fn default_candidates(self) -> Vec<PathBuf> {
        let stems: &[&str] = match self {
            DatasetCategory::Initial => &["initial/initial_conditions", "initial/initial_setup"],
            DatasetCategory::Static => &["static/static_data"],
            DatasetCategory::DynamicFields => &["dynamic/fields/field_arrays"],
            DatasetCategory::WellData => &["dynamic/wells/well_data"],
            DatasetCategory::Temporal => &["temporal/time_data"],
            DatasetCategory::Metadata => &["metadata/metadata"],
        };
        stems
            .iter()
            .flat_map(|stem| [format!("{stem}.mat"), format!("{stem}.txt")])
            .map(PathBuf::from)
            .collect()
    }
}

impl fmt::Display for DatasetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DatasetCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        DatasetCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                let known: Vec<_> = DatasetCategory::ALL.iter().map(|c| c.as_str()).collect();
                format!("unknown dataset category '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

// ---------------------------------------------------------------------------
// DatasetHandle – a category bound to concrete candidate paths
// ---------------------------------------------------------------------------

/// A dataset category together with its absolute candidate paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    pub category: DatasetCategory,
    pub candidates: Vec<PathBuf>,
}

impl DatasetHandle {
    /// First candidate that exists as a file; `NotFound` lists every path tried.
    pub fn resolve(&self) -> Result<PathBuf, LoadError> {
        self.candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                tried: self.candidates.clone(),
            })
    }
}

// ---------------------------------------------------------------------------
// DataLayout – where each category lives under the data root
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    candidates: BTreeMap<DatasetCategory, Vec<PathBuf>>,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self {
            candidates: DatasetCategory::ALL
                .into_iter()
                .map(|c| (c, c.default_candidates()))
                .collect(),
        }
    }
}

impl DataLayout {
    /// Load overrides from a JSON object mapping category names to path lists:
    ///
    /// ```json
    /// { "initial": ["setup/init.mat", "setup/init.txt"] }
    /// ```
    ///
    /// Categories not mentioned keep their default candidates.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading layout file {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parsing layout file {}", path.display()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<PathBuf>> =
            serde_json::from_str(text).context("expected an object of category → path list")?;
        let mut layout = Self::default();
        for (key, paths) in raw {
            let category: DatasetCategory = key.parse().map_err(anyhow::Error::msg)?;
            if paths.is_empty() {
                bail!("category '{category}' has an empty path list");
            }
            layout.set_candidates(category, paths);
        }
        Ok(layout)
    }

    pub fn set_candidates(&mut self, category: DatasetCategory, paths: Vec<PathBuf>) {
        self.candidates.insert(category, paths);
    }

    /// Relative candidates for a category.
    pub fn candidates(&self, category: DatasetCategory) -> &[PathBuf] {
        self.candidates
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn handle(&self, root: &Path, category: DatasetCategory) -> DatasetHandle {
        DatasetHandle {
            category,
            candidates: self
                .candidates(category)
                .iter()
                .map(|rel| root.join(rel))
                .collect(),
        }
    }
}

/// Everything a [`DatasetAccessor`](super::accessor::DatasetAccessor) needs to find files.
#[derive(Debug, Clone)]
pub struct AccessorConfig {
    pub data_root: PathBuf,
    pub layout: DataLayout,
}

impl AccessorConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            layout: DataLayout::default(),
        }
    }

    pub fn with_layout(mut self, layout: DataLayout) -> Self {
        self.layout = layout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_parse_from_cli_spellings() {
        assert_eq!("dynamic-fields".parse(), Ok(DatasetCategory::DynamicFields));
        assert_eq!("Well_Data".parse(), Ok(DatasetCategory::WellData));
        assert!("wells".parse::<DatasetCategory>().is_err());
    }

    #[test]
    fn initial_candidates_prefer_current_names() {
        let names: Vec<_> = DatasetCategory::Initial
            .default_candidates()
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "initial/initial_conditions.mat",
                "initial/initial_conditions.txt",
                "initial/initial_setup.mat",
                "initial/initial_setup.txt",
            ]
        );
    }

    #[test]
    fn handle_resolves_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("initial")).unwrap();
        std::fs::write(dir.path().join("initial/initial_setup.txt"), "x").unwrap();

        let handle = DataLayout::default().handle(dir.path(), DatasetCategory::Initial);
        assert_eq!(
            handle.resolve().unwrap(),
            dir.path().join("initial/initial_setup.txt")
        );
    }

    #[test]
    fn unresolved_handle_lists_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let handle = DataLayout::default().handle(dir.path(), DatasetCategory::Temporal);
        match handle.resolve().unwrap_err() {
            LoadError::NotFound { tried } => {
                assert_eq!(tried.len(), 2);
                assert!(tried[0].ends_with("temporal/time_data.mat"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn json_layout_overrides_listed_categories() {
        let layout = DataLayout::from_json_str(r#"{ "metadata": ["meta.txt"] }"#).unwrap();
        assert_eq!(
            layout.candidates(DatasetCategory::Metadata),
            &[PathBuf::from("meta.txt")]
        );
        assert_eq!(
            layout.candidates(DatasetCategory::Static),
            DatasetCategory::Static.default_candidates().as_slice()
        );
    }

    #[test]
    fn json_layout_rejects_unknown_categories() {
        let err = DataLayout::from_json_str(r#"{ "wells": ["w.mat"] }"#).unwrap_err();
        assert!(err.to_string().contains("unknown dataset category 'wells'"));
    }
}
