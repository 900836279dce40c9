//! Data models for Shelf
//!
//! Defines the book-level value types: the stable [`BookId`], reading
//! [`BookStatus`] and the editable [`BookMeta`] carried by every book.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Length of generated book identifiers
pub const BOOK_ID_LEN: usize = 16;

/// Stable identifier of a book, assigned once and never reused
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    /// Generate a fresh identifier from a random UUID
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..BOOK_ID_LEN].to_string())
    }

    /// Wrap an identifier read from storage
    ///
    /// Returns `None` for empty strings.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Whether the value looks like an identifier this crate generates
    pub fn looks_generated(value: &str) -> bool {
        value.len() == BOOK_ID_LEN && value.chars().all(|c| c.is_ascii_alphanumeric())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reading progress of a book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    #[default]
    Unread,
    Reading,
    Finished,
}

impl BookStatus {
    /// Parse a stored status; unknown values read as `Unread`
    pub fn parse_lossy(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Unread => "unread",
            BookStatus::Reading => "reading",
            BookStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unread" => Ok(BookStatus::Unread),
            "reading" => Ok(BookStatus::Reading),
            "finished" | "read" => Ok(BookStatus::Finished),
            other => Err(format!(
                "unknown status '{}' (expected unread, reading or finished)",
                other
            )),
        }
    }
}

/// Editable metadata of a book
///
/// Known fields are typed; anything else found in a stored record is kept in
/// `extra` so that saving a record never drops fields written by other tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookMeta {
    /// Display title, falls back to the file name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_status"
    )]
    pub status: Option<BookStatus>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub tags: Vec<String>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub authors: Vec<String>,
    #[serde(
        default,
        rename = "publishYear",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_year"
    )]
    pub publish_year: Option<i32>,
    /// Entry without a backing file of its own
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub visual: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keys of the typed fields of [`BookMeta`]
const KNOWN_KEYS: [&str; 6] = ["title", "status", "tags", "authors", "publishYear", "visual"];

impl BookMeta {
    /// Build from a stored field map without rejecting it
    ///
    /// A known field whose value does not fit its type is moved into `extra`
    /// unchanged, so it is written back on the next save. Returns the
    /// rejected keys with the reason each one failed.
    pub fn from_map_lenient(mut fields: Map<String, Value>) -> (Self, Vec<(String, String)>) {
        let mut rejected = Map::new();
        let mut reasons = Vec::new();
        for key in KNOWN_KEYS {
            let Some(value) = fields.get(key) else {
                continue;
            };
            let mut single = Map::new();
            single.insert(key.to_string(), value.clone());
            if let Err(e) = serde_json::from_value::<BookMeta>(Value::Object(single)) {
                if let Some(value) = fields.remove(key) {
                    rejected.insert(key.to_string(), value);
                    reasons.push((key.to_string(), e.to_string()));
                }
            }
        }

        let mut meta: BookMeta = match serde_json::from_value(Value::Object(fields.clone())) {
            Ok(meta) => meta,
            // Only unknown keys are left once the known ones parsed on their own
            Err(_) => BookMeta {
                extra: fields,
                ..BookMeta::default()
            },
        };
        meta.extra.extend(rejected);
        (meta, reasons)
    }

    /// Effective status (unset reads as unread)
    pub fn status(&self) -> BookStatus {
        self.status.unwrap_or_default()
    }

    /// Add a tag
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if tag.trim().is_empty() || self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    /// Remove a tag
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        if let Some(pos) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(pos);
            true
        } else {
            false
        }
    }

    /// Set all tags (replacing existing, duplicates dropped)
    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags.clear();
        for tag in tags {
            self.add_tag(tag);
        }
    }
}

/// A batch of metadata changes for one book
///
/// `None` leaves a field as it is. Tag removals apply after `set_tags` and
/// before `add_tags`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookEdit {
    pub status: Option<BookStatus>,
    /// `Some(None)` clears the title
    pub title: Option<Option<String>>,
    pub set_tags: Option<Vec<String>>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub authors: Option<Vec<String>>,
    /// `Some(None)` clears the year
    pub publish_year: Option<Option<i32>>,
}

/// Which fields an edit actually changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditEffect {
    pub status: bool,
    pub title: bool,
    pub tags: bool,
    pub authors: bool,
    pub publish_year: bool,
}

impl EditEffect {
    pub fn any(&self) -> bool {
        self.status || self.title || self.tags || self.authors || self.publish_year
    }
}

impl BookEdit {
    pub fn is_empty(&self) -> bool {
        *self == BookEdit::default()
    }

    /// Apply to `meta`, reporting what changed
    pub fn apply(&self, meta: &mut BookMeta) -> EditEffect {
        let mut effect = EditEffect::default();

        if let Some(status) = self.status {
            meta.extra.remove("status");
            effect.status = meta.status != Some(status);
            meta.status = Some(status);
        }

        if let Some(title) = &self.title {
            meta.extra.remove("title");
            let title = title
                .as_ref()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
            effect.title = meta.title != title;
            meta.title = title;
        }

        let tags_before = meta.tags.clone();
        if self.set_tags.is_some() || !self.add_tags.is_empty() {
            meta.extra.remove("tags");
        }
        if let Some(tags) = &self.set_tags {
            meta.set_tags(tags.clone());
        }
        for tag in &self.remove_tags {
            meta.remove_tag(tag);
        }
        for tag in &self.add_tags {
            meta.add_tag(tag.trim());
        }
        effect.tags = meta.tags != tags_before;

        if let Some(authors) = &self.authors {
            meta.extra.remove("authors");
            let authors: Vec<String> = authors
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            effect.authors = meta.authors != authors;
            meta.authors = authors;
        }

        if let Some(year) = self.publish_year {
            meta.extra.remove("publishYear");
            effect.publish_year = meta.publish_year != year;
            meta.publish_year = year;
        }

        effect
    }
}

fn lenient_status<'de, D>(deserializer: D) -> Result<Option<BookStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(|s| BookStatus::parse_lossy(&s)))
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let values = match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    };
    Ok(values
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn lenient_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Year {
        Number(i64),
        Text(String),
    }

    match Option::<Year>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Year::Number(n)) => i32::try_from(n)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("publishYear {} out of range", n))),
        Some(Year::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Year::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid publishYear '{}'", s))),
    }
}
