//! File-backed record store for queues and clusters.
//!
//! A store is a YAML mapping of `name -> record`, saved after every
//! mutation. Insertion order is preserved: the FIFO schedulers offer
//! jobs in exactly the order they were added.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug)]
pub struct Store<T> {
    path: PathBuf,
    records: IndexMap<String, T>,
}

impl<T> Store<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Open a store, loading existing records if the file is present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                IndexMap::new()
            } else {
                serde_yaml::from_str(&content)?
            }
        } else {
            IndexMap::new()
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Insert or replace a record and persist.
    pub fn set(&mut self, name: &str, record: T) -> Result<()> {
        self.records.insert(name.to_string(), record);
        self.save()
    }

    /// Remove a record (preserving the order of the rest) and persist.
    pub fn delete(&mut self, name: &str) -> Result<Option<T>> {
        let removed = self.records.shift_remove(name);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.records.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_yaml::to_string(&self.records)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Re-read the records from disk, dropping in-memory state.
    pub fn load(&mut self) -> Result<()> {
        let content = std::fs::read_to_string(&self.path)?;
        self.records = serde_yaml::from_str(&content)?;
        Ok(())
    }
}
