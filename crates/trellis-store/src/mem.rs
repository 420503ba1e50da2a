//! In-memory store, used by tests and short-lived embedders.

use crate::{Prefix, Store, StoreError};
use std::collections::HashMap;

/// Store backend over a plain map. Translated records are kept under a
/// `(prefix, key, lang)` triple and preferred on read, mirroring
/// [`crate::FsStore`] lookup order.
#[derive(Debug, Default)]
pub struct MemStore {
    records: HashMap<(u8, Vec<u8>, Option<String>), Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, translations counted separately.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Store for MemStore {
    fn get(&self, prefix: Prefix, key: &[u8], lang: Option<&str>) -> Result<Vec<u8>, StoreError> {
        let raw = lang
            .and_then(|lang| {
                self.records
                    .get(&(prefix as u8, key.to_vec(), Some(lang.to_string())))
            })
            .or_else(|| self.records.get(&(prefix as u8, key.to_vec(), None)))
            .cloned()
            .ok_or_else(|| StoreError::not_found(prefix, key))?;
        if prefix == Prefix::Bin {
            return crate::open_bin(raw);
        }
        Ok(raw)
    }

    fn put(
        &mut self,
        prefix: Prefix,
        key: &[u8],
        value: &[u8],
        lang: Option<&str>,
    ) -> Result<(), StoreError> {
        let record = if prefix == Prefix::Bin {
            crate::seal_bin(value)
        } else {
            value.to_vec()
        };
        if let Some(lang) = lang {
            self.records.insert(
                (prefix as u8, key.to_vec(), Some(lang.to_string())),
                record.clone(),
            );
        }
        self.records
            .insert((prefix as u8, key.to_vec(), None), record);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.records.clear();
        Ok(())
    }
}
