use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::info;

use crate::data::model::BiomarkerDataset;
use crate::error::QueryError;

// ---------------------------------------------------------------------------
// Dataset lookup seam
// ---------------------------------------------------------------------------

/// Resolves dataset names to immutable snapshots.
///
/// A returned `Arc` stays valid for the whole query even if the name is
/// deleted or re-uploaded meanwhile.
pub trait DatasetStore {
    fn get(&self, name: &str) -> Option<Arc<BiomarkerDataset>>;
}

impl<T: DatasetStore + ?Sized> DatasetStore for &T {
    fn get(&self, name: &str) -> Option<Arc<BiomarkerDataset>> {
        (**self).get(name)
    }
}

impl<T: DatasetStore + ?Sized> DatasetStore for Arc<T> {
    fn get(&self, name: &str) -> Option<Arc<BiomarkerDataset>> {
        (**self).get(name)
    }
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

/// Datasets uploaded during one session, keyed by name.
#[derive(Debug, Default)]
pub struct SessionStore {
    datasets: RwLock<BTreeMap<String, Arc<BiomarkerDataset>>>,
}

/// Dataset names are restricted to ASCII letters, digits and underscores.
pub fn is_valid_dataset_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dataset, replacing any previous one with the same name.
    pub fn insert(&self, name: &str, dataset: BiomarkerDataset) -> Result<(), QueryError> {
        if !is_valid_dataset_name(name) {
            return Err(QueryError::InvalidDatasetName(name.to_string()));
        }
        info!("storing dataset '{name}' ({} rows)", dataset.len());
        let mut map = self.datasets.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(name.to_string(), Arc::new(dataset));
        Ok(())
    }

    /// Delete a dataset. Queries already holding its snapshot are unaffected.
    pub fn remove(&self, name: &str) -> Result<Arc<BiomarkerDataset>, QueryError> {
        let mut map = self.datasets.write().unwrap_or_else(PoisonError::into_inner);
        let removed = map
            .remove(name)
            .ok_or_else(|| QueryError::DatasetNotFound(name.to_string()))?;
        info!("deleted dataset '{name}'");
        Ok(removed)
    }

    /// Names of all stored datasets, sorted.
    pub fn names(&self) -> Vec<String> {
        let map = self.datasets.read().unwrap_or_else(PoisonError::into_inner);
        map.keys().cloned().collect()
    }

    /// Drop every dataset (end of session).
    pub fn clear(&self) {
        let mut map = self.datasets.write().unwrap_or_else(PoisonError::into_inner);
        info!("ending session, clearing {} dataset(s)", map.len());
        map.clear();
    }

    pub fn len(&self) -> usize {
        self.datasets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DatasetStore for SessionStore {
    fn get(&self, name: &str) -> Option<Arc<BiomarkerDataset>> {
        let map = self.datasets.read().unwrap_or_else(PoisonError::into_inner);
        map.get(name).cloned()
    }
}
