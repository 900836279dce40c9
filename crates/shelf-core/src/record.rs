//! Persisted metadata records
//!
//! A record is the flat, string-keyed field map a [`MetadataStore`] keeps for
//! one tracked book. It always carries `vid` and `bid`; every other field is
//! optional and unknown fields survive a load/save cycle untouched.
//!
//! [`MetadataStore`]: crate::storage::MetadataStore

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::RecordError;
use crate::models::{BookId, BookMeta};
use crate::tree::normalize_entry_path;

/// Raw field map as produced by a metadata store
pub type RecordFields = Map<String, Value>;

/// Field names with a fixed meaning
pub mod fields {
    pub const VID: &str = "vid";
    pub const BID: &str = "bid";
    pub const PATH: &str = "path";
    pub const NAME: &str = "name";
    pub const EXT: &str = "ext";
}

/// A validated metadata record
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub vid: String,
    pub bid: BookId,
    /// Vault-relative path, normalized to start with `/`
    pub path: String,
    pub name: Option<String>,
    pub ext: Option<String>,
    pub meta: BookMeta,
}

impl MetadataRecord {
    /// Validate a raw field map
    ///
    /// `origin` names the stored item in error messages (a file name, a row
    /// id). Only a missing `vid` or `bid` rejects the record. A record without
    /// a usable `path` is placed at the vault root under its name, or its id
    /// when it has no name either. Other fields with unexpected values are
    /// kept as they are and logged.
    pub fn from_fields(origin: &str, mut fields: RecordFields) -> Result<Self, RecordError> {
        let vid = take_string(origin, &mut fields, fields::VID)?
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| RecordError::MissingField {
                origin: origin.to_string(),
                field: fields::VID,
            })?;

        let bid = take_string(origin, &mut fields, fields::BID)?
            .and_then(|b| BookId::parse(&b))
            .ok_or_else(|| RecordError::MissingField {
                origin: origin.to_string(),
                field: fields::BID,
            })?;

        let name = take_optional(origin, &mut fields, fields::NAME);
        let ext = take_optional(origin, &mut fields, fields::EXT);
        let path = take_optional(origin, &mut fields, fields::PATH)
            .map(|p| normalize_entry_path(&p))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| {
                let stem = name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| bid.to_string());
                let file = match ext.as_deref() {
                    Some(e) if !e.is_empty() => format!("{}.{}", stem, e),
                    _ => stem,
                };
                normalize_entry_path(&file)
            });

        let (meta, rejected) = BookMeta::from_map_lenient(fields);
        for (key, reason) in rejected {
            warn!("Record {} keeps unparsed '{}' as is: {}", origin, key, reason);
        }

        Ok(Self {
            vid: vid.trim().to_string(),
            bid,
            path,
            name,
            ext,
            meta,
        })
    }

    /// Flatten back into a field map for storage
    pub fn to_fields(&self) -> RecordFields {
        let mut out = Map::new();
        out.insert(fields::VID.into(), Value::String(self.vid.clone()));
        out.insert(fields::BID.into(), Value::String(self.bid.to_string()));
        out.insert(fields::PATH.into(), Value::String(self.path.clone()));
        if let Some(name) = &self.name {
            out.insert(fields::NAME.into(), Value::String(name.clone()));
        }
        if let Some(ext) = &self.ext {
            out.insert(fields::EXT.into(), Value::String(ext.clone()));
        }
        if let Ok(Value::Object(meta)) = serde_json::to_value(&self.meta) {
            for (key, value) in meta {
                out.entry(key).or_insert(value);
            }
        }
        out
    }
}

/// Remove an optional string field, ignoring values of any other shape
fn take_optional(origin: &str, fields: &mut RecordFields, key: &'static str) -> Option<String> {
    take_string(origin, fields, key).unwrap_or_else(|e| {
        warn!("{}", e);
        None
    })
}

/// Remove a string field, accepting numbers for robustness
fn take_string(
    origin: &str,
    fields: &mut RecordFields,
    key: &'static str,
) -> Result<Option<String>, RecordError> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(RecordError::Malformed {
            origin: origin.to_string(),
            reason: format!("field '{}' must be a string, found {}", key, other),
        }),
    }
}
