//! In-memory record store

use super::error::StorageResult;
use super::{MetadataStore, StoredRecord};
use crate::error::RecordError;
use crate::record::{MetadataRecord, RecordFields};

/// Keeps records in insertion order; saving an existing id replaces it in
/// place
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<RecordFields>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with raw field maps, valid or not
    pub fn with_fields<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = RecordFields>,
    {
        Self {
            records: fields.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Raw fields of the record for `bid`
    pub fn get(&self, bid: &str) -> Option<&RecordFields> {
        self.records
            .iter()
            .find(|r| r.get("bid").and_then(|v| v.as_str()) == Some(bid))
    }
}

impl MetadataStore for MemoryStore {
    fn load_all(&self) -> StorageResult<Vec<Result<StoredRecord, RecordError>>> {
        Ok(self
            .records
            .iter()
            .enumerate()
            .map(|(i, fields)| {
                Ok(StoredRecord {
                    origin: format!("memory #{}", i),
                    fields: fields.clone(),
                })
            })
            .collect())
    }

    fn save(&mut self, record: &MetadataRecord) -> StorageResult<()> {
        let fields = record.to_fields();
        let bid = record.bid.as_str();
        match self
            .records
            .iter_mut()
            .find(|r| r.get("bid").and_then(|v| v.as_str()) == Some(bid))
        {
            Some(existing) => *existing = fields,
            None => self.records.push(fields),
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
