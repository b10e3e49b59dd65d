use std::collections::BTreeSet;

use log::debug;

use super::layout::DatasetCategory;
use super::model::NamedArrayTable;

/// Legacy field name → canonical name, applied by both file loaders.
pub const FIELD_ALIASES: &[(&str, &str)] = &[("pressure_init", "pressure"), ("sw_init", "sw")];

const WELL_ALIASES: &[(&str, &str)] = &[("time", "time_days")];
const TEMPORAL_ALIASES: &[(&str, &str)] = &[("time", "time_days"), ("dt", "dt_days")];

/// Renames introduced when a whole dataset category was re-exported under new names.
pub fn category_aliases(category: DatasetCategory) -> &'static [(&'static str, &'static str)] {
    match category {
        DatasetCategory::WellData => WELL_ALIASES,
        DatasetCategory::Temporal => TEMPORAL_ALIASES,
        _ => &[],
    }
}

/// Rename legacy keys in a single pass.
///
/// Each key is looked up once against the original names, so a renamed key is
/// never renamed again. When the canonical name already exists the legacy entry
/// keeps its own name.
pub fn apply_aliases(table: NamedArrayTable, aliases: &[(&str, &str)]) -> NamedArrayTable {
    if aliases.is_empty() {
        return table;
    }
    let original: BTreeSet<String> = table.names().map(str::to_string).collect();
    let mut out = NamedArrayTable::new();
    for (name, value) in table {
        let target = aliases
            .iter()
            .find(|(legacy, _)| *legacy == name)
            .map(|(_, canonical)| *canonical);
        match target {
            Some(canonical) if !original.contains(canonical) && !out.contains(canonical) => {
                debug!("renaming legacy field '{name}' to '{canonical}'");
                out.insert(canonical, value);
            }
            Some(canonical) => {
                debug!("keeping legacy field '{name}': '{canonical}' already present");
                out.insert(name, value);
            }
            None => {
                out.insert(name, value);
            }
        }
    }
    out
}

pub fn apply_field_aliases(table: NamedArrayTable) -> NamedArrayTable {
    apply_aliases(table, FIELD_ALIASES)
}
