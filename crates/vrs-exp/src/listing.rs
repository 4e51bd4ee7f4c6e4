//! Listing of stored results, including the results they were computed from.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;
use vrs_core::{Metadata, VrsError};

use crate::store::ResultStore;

/// One listed result and the stored results its metadata refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingEntry {
    /// Result directory name.
    pub instance_id: String,
    /// Persisted metadata of the result.
    pub metadata: Metadata,
    /// Stored results referenced by the metadata.
    pub inputs: Vec<ListingEntry>,
}

/// Lists every stored instance of `title`.
///
/// A result directory whose name appears among an entry's metadata values
/// is listed beneath it. A reference back to a result already on the current
/// path is not followed again.
pub fn list_results(store: &ResultStore, title: &str) -> Result<Vec<ListingEntry>, VrsError> {
    let directories = store.entries()?;
    let mut listed = Vec::new();
    for instance_id in store.instances(title)? {
        let mut path = BTreeSet::new();
        match build_entry(store, &directories, &instance_id, &mut path) {
            Ok(entry) => listed.push(entry),
            Err(VrsError::NotFound(info)) => {
                warn!("skipping {instance_id}: {info}");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(listed)
}

fn build_entry(
    store: &ResultStore,
    directories: &[String],
    instance_id: &str,
    path: &mut BTreeSet<String>,
) -> Result<ListingEntry, VrsError> {
    let metadata = store.load_metadata(instance_id)?;
    path.insert(instance_id.to_string());
    let referenced: BTreeSet<&str> = metadata.values().collect();
    let mut inputs = Vec::new();
    for directory in directories {
        if !referenced.contains(directory.as_str()) || path.contains(directory) {
            continue;
        }
        match build_entry(store, directories, directory, path) {
            Ok(entry) => inputs.push(entry),
            Err(VrsError::NotFound(_)) => {}
            Err(err) => {
                path.remove(instance_id);
                return Err(err);
            }
        }
    }
    path.remove(instance_id);
    Ok(ListingEntry {
        instance_id: instance_id.to_string(),
        metadata,
        inputs,
    })
}

/// Renders entries as an indented tree:
///
/// ```text
/// +Sweep-3f2a...
/// | date: 2024-01-01 10:00:00.000000
/// | seed: 7
/// +---Prepare-91bc...
/// |    date: ...
/// ```
pub fn render(entries: &[ListingEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        render_entry(entry, 0, &mut out);
    }
    out
}

fn render_entry(entry: &ListingEntry, indent: usize, out: &mut String) {
    out.push('+');
    out.push_str(&"-".repeat(indent));
    out.push_str(&entry.instance_id);
    out.push('\n');
    let pad = " ".repeat(indent + 1);
    for (key, value) in entry.metadata.iter() {
        out.push('|');
        out.push_str(&pad);
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    for input in &entry.inputs {
        render_entry(input, indent + 3, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(store: &ResultStore, id: &str, pairs: &[(&str, &str)]) {
        let dir = store.allocate(id).expect("allocate");
        let metadata: Metadata = pairs.iter().copied().collect();
        store
            .persist_metadata(&dir, &metadata, id.split('-').next().unwrap_or(id), 1)
            .expect("persist");
    }

    #[test]
    fn referenced_results_are_nested_and_cycles_cut() {
        let dir = tempfile::tempdir().expect("dir");
        let store = ResultStore::new(dir.path());
        result(&store, "Prepare-1", &[("source", "Sweep-1")]);
        result(&store, "Sweep-1", &[("Prepare", "Prepare-1"), ("seed", "7")]);

        let listed = list_results(&store, "Sweep").expect("list");
        assert_eq!(listed.len(), 1);
        let sweep = &listed[0];
        assert_eq!(sweep.instance_id, "Sweep-1");
        assert_eq!(sweep.inputs.len(), 1);
        assert_eq!(sweep.inputs[0].instance_id, "Prepare-1");
        assert!(sweep.inputs[0].inputs.is_empty());

        let text = render(&listed);
        assert!(text.starts_with("+Sweep-1\n"));
        assert!(text.contains("| seed: 7\n"));
        assert!(text.contains("+---Prepare-1\n|    date: "));
        assert!(text.contains("|    source: Sweep-1\n"));
    }
}
