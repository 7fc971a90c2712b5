use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::record::{ComponentRow, PathRow, VariantRow};
use super::IndexStore;
use crate::storage;

/// A path index row together with the keys and file locations derived from it
#[derive(Debug, Clone, PartialEq)]
pub struct PathEntry<R> {
    pub row: R,
    pub sort_key: String,
    pub cif_path: PathBuf,
    pub cif_mapped_path: PathBuf,
    pub mol2_path: PathBuf,
    pub mol_path: PathBuf,
}

impl<R: PathRow> PathEntry<R> {
    fn derive(row: R, base: &Path) -> Self {
        let dir = base.join(row.cc_id());
        let id = row.entry_id().to_string();
        Self {
            sort_key: row.sort_key(),
            cif_path: dir.join(format!("{}.cif", id)),
            cif_mapped_path: dir.join(format!("{}-mapped.cif", id)),
            mol2_path: dir.join(format!("{}.mol2", id)),
            mol_path: dir.join(format!("{}.sdf", id)),
            row,
        }
    }

    pub fn cc_id(&self) -> &str {
        self.row.cc_id()
    }

    pub fn id(&self) -> &str {
        self.row.entry_id()
    }
}

/// `(id, mapped definition path, title)` used by depiction tooling
pub type DepictionItem = (String, PathBuf, String);

/// Groups in priority order plus the number of rows removed by the filter list
#[derive(Debug, Clone)]
pub struct PriorityList<R> {
    pub entries: Vec<(String, PathEntry<R>)>,
    pub filtered: usize,
}

/// Corpus-wide index of definition files grouped by parent component
#[derive(Debug, Clone)]
pub struct PathIndex<R> {
    store: IndexStore<R>,
    base: PathBuf,
}

/// Index of plain chemical components, sorted by id within a group
pub type ComponentIndex = PathIndex<ComponentRow>;

/// Index of protomer/tautomer variants, sorted protomer first within a group
pub type VariantIndex = PathIndex<VariantRow>;

impl<R> PathIndex<R>
where
    R: PathRow + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
{
    /// Opens the index file; a missing file gives an empty index.
    ///
    /// Derived paths are resolved relative to the directory holding the file.
    pub fn open(index_path: impl Into<PathBuf>) -> Self {
        let store = IndexStore::open(index_path);
        let base = store
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        info!("Path index {} length {}", store.path().display(), store.len());
        Self { store, base }
    }

    pub fn store(&self) -> &IndexStore<R> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut IndexStore<R> {
        &mut self.store
    }

    /// Rows grouped by parent id in first-seen order
    fn groups(&self) -> Vec<(String, Vec<R>)> {
        let mut order: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<R>)> = Vec::new();
        for row in self.store.forward() {
            let key = row.cc_id().to_string();
            let slot = *order.entry(key.clone()).or_insert_with(|| {
                groups.push((key, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(row.clone());
        }
        groups
    }

    fn sorted_entries(&self, rows: Vec<R>) -> Vec<PathEntry<R>> {
        let mut entries: Vec<PathEntry<R>> = rows
            .into_iter()
            .map(|row| PathEntry::derive(row, &self.base))
            .collect();
        entries.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));
        entries
    }

    /// Parent id to its entries sorted by sort key
    pub fn make_path_index(&self) -> BTreeMap<String, Vec<PathEntry<R>>> {
        self.groups()
            .into_iter()
            .map(|(key, rows)| (key, self.sorted_entries(rows)))
            .collect()
    }

    /// Flat `(parent id, entry)` list, groups in first-seen order
    pub fn make_path_list(&self) -> Vec<(String, PathEntry<R>)> {
        let mut list = Vec::new();
        for (key, rows) in self.groups() {
            for entry in self.sorted_entries(rows) {
                list.push((key.clone(), entry));
            }
        }
        list
    }

    /// Flat list with groups ordered by the ids in `priority_path`.
    ///
    /// Parent ids missing from the priority list are dropped; a repeated id
    /// emits its group once per occurrence. Rows whose id appears in
    /// `filter_path` are excluded and counted; a missing or unreadable filter
    /// file means no filtering.
    pub fn make_priority_list(
        &self,
        priority_path: &Path,
        filter_path: Option<&Path>,
    ) -> PriorityList<R> {
        let priority = read_id_list(priority_path);
        info!("Priority list length {}", priority.len());

        let filter: HashSet<String> = match filter_path {
            Some(path) if storage::exists(path) => {
                let ids = read_id_list(path);
                info!("Filter list length {}", ids.len());
                ids.into_iter().collect()
            }
            _ => {
                info!("No filter list");
                HashSet::new()
            }
        };

        let mut filtered = 0;
        let mut groups: HashMap<String, Vec<R>> = HashMap::new();
        for (key, rows) in self.groups() {
            let kept: Vec<R> = rows
                .into_iter()
                .filter(|row| {
                    let drop = filter.contains(row.entry_id());
                    if drop {
                        filtered += 1;
                    }
                    !drop
                })
                .collect();
            groups.insert(key, kept);
        }

        let mut entries = Vec::new();
        // A repeated priority id emits its group again
        for key in priority {
            let Some(rows) = groups.get(&key) else {
                continue;
            };
            for entry in self.sorted_entries(rows.clone()) {
                entries.push((key.clone(), entry));
            }
        }

        info!("Filtered length {}", filtered);
        PriorityList { entries, filtered }
    }

    /// Parent id to `(id, mapped definition path, id)` for depiction
    pub fn make_depiction_list(&self) -> BTreeMap<String, Vec<DepictionItem>> {
        self.make_path_index()
            .into_iter()
            .map(|(key, entries)| {
                let items = entries
                    .into_iter()
                    .map(|e| {
                        let id = e.id().to_string();
                        (id.clone(), e.cif_mapped_path, id)
                    })
                    .collect();
                (key, items)
            })
            .collect()
    }
}

fn read_id_list(path: &Path) -> Vec<String> {
    storage::import_list(path).unwrap_or_else(|e| {
        warn!("Cannot read id list {}: {}", path.display(), e);
        Vec::new()
    })
}
