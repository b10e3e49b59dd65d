use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use rusty_reservoir::data::mat::{encode_mat, wrap_in_struct, MatWriteOptions};
use rusty_reservoir::{
    AccessorConfig, DataLayout, DatasetAccessor, DatasetCategory, ErrorKind, FileLoader,
    LoadError, NamedArrayTable, NdArray, TableLoader, Value,
};

/// Counts calls on the way through to the real file loaders.
#[derive(Default)]
struct Spy {
    binary: Cell<usize>,
    text: Cell<usize>,
}

impl TableLoader for Spy {
    fn load_binary(&self, path: &Path) -> Result<NamedArrayTable, LoadError> {
        self.binary.set(self.binary.get() + 1);
        FileLoader.load_binary(path)
    }

    fn load_text(&self, path: &Path) -> Result<NamedArrayTable, LoadError> {
        self.text.set(self.text.get() + 1);
        FileLoader.load_text(path)
    }
}

fn write(root: &Path, rel: &str, bytes: &[u8]) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, bytes).unwrap();
    path
}

fn mat_bytes(table: &NamedArrayTable, compress: bool) -> Vec<u8> {
    encode_mat(table, MatWriteOptions { compress }).unwrap()
}

/// pressure[t][i][j] = 100 t + 10 i + j on a 3x2x2 grid.
fn pressure_3x2x2() -> NdArray {
    let data = (0..3)
        .flat_map(|t| (0..2).flat_map(move |i| (0..2).map(move |j| (100 * t + 10 * i + j) as f64)))
        .collect();
    NdArray::new(vec![3, 2, 2], data).unwrap()
}

fn pressure_3x2x2_text() -> String {
    let mut values = Vec::new();
    for j in 0..2 {
        for i in 0..2 {
            for t in 0..3 {
                values.push((100 * t + 10 * i + j).to_string());
            }
        }
    }
    format!(
        "# Created by Octave\n# name: pressure\n# type: matrix\n# ndims: 3\n 3 2 2\n {}\n",
        values.join("\n ")
    )
}

fn initial_table() -> NamedArrayTable {
    [
        ("pressure_init", NdArray::vector(vec![200.0, 201.0])),
        ("sw_init", NdArray::vector(vec![0.2, 0.25])),
    ]
    .into_iter()
    .collect()
}

#[test]
fn dynamic_fields_from_wrapped_binary() {
    let dir = tempfile::tempdir().unwrap();
    let fields: NamedArrayTable = [("pressure", pressure_3x2x2())].into_iter().collect();
    write(
        dir.path(),
        "dynamic/fields/field_arrays.mat",
        &mat_bytes(&wrap_in_struct("fields", fields), true),
    );

    let mut accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()));
    let table = accessor.get_dynamic_fields().unwrap();
    let pressure = table.get_numeric("pressure").unwrap();
    assert_eq!(pressure.shape(), &[3, 2, 2]);
    assert_eq!(pressure.get(&[2, 1, 0]), Some(210.0));
    assert_eq!(pressure, &pressure_3x2x2());
}

#[test]
fn dynamic_fields_from_text_with_mat_extension() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "dynamic/fields/field_arrays.mat",
        pressure_3x2x2_text().as_bytes(),
    );

    let mut accessor = DatasetAccessor::with_loader(AccessorConfig::new(dir.path()), Spy::default());
    let table = accessor.get_dynamic_fields().unwrap();
    assert_eq!(table.get_numeric("pressure"), Some(&pressure_3x2x2()));
    assert_eq!(accessor.loader().binary.get(), 1);
    assert_eq!(accessor.loader().text.get(), 1);
}

#[test]
fn text_candidate_used_when_no_mat_file() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "dynamic/fields/field_arrays.txt",
        pressure_3x2x2_text().as_bytes(),
    );

    let mut accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()));
    let path = accessor.resolve(DatasetCategory::DynamicFields).unwrap();
    assert!(path.ends_with("dynamic/fields/field_arrays.txt"));
    assert!(accessor.get_dynamic_fields().unwrap().contains("pressure"));
}

#[test]
fn legacy_initial_setup_is_found_and_aliased() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "initial/initial_setup.mat",
        &mat_bytes(&initial_table(), false),
    );

    let mut accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()));
    let table = accessor.get_initial().unwrap();
    assert_eq!(table.get_numeric("pressure").unwrap().data(), &[200.0, 201.0]);
    assert_eq!(table.get_numeric("sw").unwrap().data(), &[0.2, 0.25]);
    assert!(!table.contains("pressure_init"));
    assert!(!table.contains("sw_init"));
}

#[test]
fn repeated_get_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "initial/initial_conditions.mat",
        &mat_bytes(&initial_table(), false),
    );

    let mut accessor = DatasetAccessor::with_loader(AccessorConfig::new(dir.path()), Spy::default());
    let first = accessor.get_initial().unwrap();
    let second = accessor.get_initial().unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(accessor.loader().binary.get(), 1);
    assert_eq!(accessor.loader().text.get(), 0);
    assert_eq!(accessor.cached_len(), 1);
}

#[test]
fn changed_mtime_forces_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "initial/initial_conditions.mat",
        &mat_bytes(&initial_table(), false),
    );

    let mut accessor = DatasetAccessor::with_loader(AccessorConfig::new(dir.path()), Spy::default());
    accessor.get_initial().unwrap();

    let later = SystemTime::now() + Duration::from_secs(120);
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    accessor.get_initial().unwrap();
    assert_eq!(accessor.loader().binary.get(), 2);
}

#[test]
fn rewritten_file_is_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    let rel = "temporal/time_data.txt";
    write(dir.path(), rel, b"# name: time_days\n# type: scalar\n30\n");

    let mut accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()));
    let before = accessor.get_temporal().unwrap();
    assert_eq!(before.get_numeric("time_days").unwrap().data(), &[30.0]);

    write(
        dir.path(),
        rel,
        b"# name: time_days\n# type: matrix\n# rows: 1\n# columns: 2\n 30 60\n",
    );
    let after = accessor.get_temporal().unwrap();
    assert_eq!(after.get_numeric("time_days").unwrap().data(), &[30.0, 60.0]);
}

#[test]
fn failed_reload_drops_the_stale_entry() {
    let dir = tempfile::tempdir().unwrap();
    let rel = "temporal/time_data.txt";
    write(dir.path(), rel, b"# name: time_days\n# type: scalar\n30\n");

    let mut accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()));
    accessor.get_temporal().unwrap();
    assert_eq!(accessor.cached_len(), 1);

    write(
        dir.path(),
        rel,
        b"# name: time_days\n# type: matrix\n# rows: 2\n# columns: 2\n 30 60\n",
    );
    let err = accessor.get_temporal().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(accessor.cached_len(), 0);
}

#[test]
fn config_reports_the_data_root() {
    let dir = tempfile::tempdir().unwrap();
    let accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()));
    assert_eq!(accessor.config().data_root, dir.path());
    assert_eq!(
        accessor.handle(DatasetCategory::Metadata).candidates[0],
        dir.path().join("metadata/metadata.mat")
    );
}

#[test]
fn clear_cache_reloads_everything() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "initial/initial_conditions.mat",
        &mat_bytes(&initial_table(), false),
    );
    write(dir.path(), "metadata/metadata.txt", b"# name: nx\n# type: scalar\n4\n");

    let mut accessor = DatasetAccessor::with_loader(AccessorConfig::new(dir.path()), Spy::default());
    accessor.get_initial().unwrap();
    accessor.get_metadata().unwrap();
    assert_eq!(accessor.cached_len(), 2);

    accessor.clear_cache();
    assert_eq!(accessor.cached_len(), 0);
    accessor.get_initial().unwrap();
    assert_eq!(accessor.loader().binary.get(), 3);
}

#[test]
fn missing_dataset_lists_every_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let mut accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()));

    let err = accessor.get_initial().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    match err {
        LoadError::NotFound { tried } => {
            assert_eq!(tried.len(), 4);
            assert!(tried[0].ends_with("initial/initial_conditions.mat"));
            assert!(tried[3].ends_with("initial/initial_setup.txt"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn missing_required_field_is_a_schema_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let table: NamedArrayTable = [("grid_x", NdArray::vector(vec![0.0, 10.0]))]
        .into_iter()
        .collect();
    write(dir.path(), "static/static_data.mat", &mat_bytes(&table, false));

    let mut accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()));
    let err = accessor.get_static().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    match err {
        LoadError::SchemaMismatch { missing, .. } => assert_eq!(missing, vec!["rock_id", "grid_y"]),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(accessor.cached_len(), 0);
}

#[test]
fn short_text_matrix_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "dynamic/fields/field_arrays.txt",
        b"# name: pressure\n# type: matrix\n# rows: 3\n# columns: 2\n1 2\n3 4\n",
    );

    let mut accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()));
    let err = accessor.get_dynamic_fields().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(matches!(err, LoadError::Text { .. }), "{err:?}");
}

#[test]
fn truncated_mat_file_reports_binary_error() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = mat_bytes(&initial_table(), false);
    write(dir.path(), "initial/initial_conditions.mat", &bytes[..bytes.len() - 5]);

    let mut accessor = DatasetAccessor::with_loader(AccessorConfig::new(dir.path()), Spy::default());
    let err = accessor.get_initial().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(matches!(err, LoadError::Binary { .. }), "{err:?}");
    assert_eq!(accessor.loader().text.get(), 1);
}

#[test]
fn well_data_time_alias_and_text_columns() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = NamedArrayTable::new();
    table.insert("time", NdArray::vector(vec![30.0, 60.0]));
    table.insert("well_names", Value::Text(vec!["INJ1".into(), "PRD1".into()]));
    write(dir.path(), "dynamic/wells/well_data.mat", &mat_bytes(&table, false));

    let mut accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()));
    let wells = accessor.get_well_data().unwrap();
    assert_eq!(wells.get_numeric("time_days").unwrap().data(), &[30.0, 60.0]);
    assert_eq!(wells.get("well_names").and_then(Value::as_text).unwrap(), ["INJ1", "PRD1"]);
}

#[test]
fn custom_layout_overrides_candidates() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "custom/meta.txt", b"# name: case\n# type: string\n# elements: 1\n# length: 4\ndemo\n");

    let layout = DataLayout::from_json_str(r#"{ "metadata": ["custom/meta.txt"] }"#).unwrap();
    let mut accessor = DatasetAccessor::new(AccessorConfig::new(dir.path()).with_layout(layout));
    let meta = accessor.get_metadata().unwrap();
    assert_eq!(meta.get("case").and_then(Value::as_text).unwrap(), ["demo"]);
}
