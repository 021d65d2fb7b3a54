//! 🪪 Document references: the name tag a record wears while it waits in the queue.
//!
//! 🎬 *[INT. JOB QUEUE, NIGHT. a string sits in a Redis list. it says "Issue 42 issue_42 project_7".]*
//! *[it does not know the issue was deleted five minutes ago. it will find out. gently.]*
//!
//! A [`DocumentReference`] carries exactly enough to find a record again
//! (class + database id) and exactly enough to touch its document in the index
//! without finding it (search id + optional routing id). That second half is what
//! lets a reference to a deleted row still produce a delete operation.
//!
//! Wire form: fields joined by a single space.
//!
//! ```text
//! Issue 42 issue_42 project_7
//! User 5 user_5
//! ```
//!
//! Three fields or four. Anything else is an [`InvalidError`], raised at the door.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

use crate::records::{Record, RecordKind, RecordStore, project_routing};

/// 💀 Everything that can be wrong with a reference before we even touch the network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidError {
    #[error("💀 a document reference needs 3 or 4 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("💀 '{0}' is not a registered indexable class")]
    UnknownClass(String),
    #[error("💀 '{0}' is not a valid database id")]
    InvalidId(String),
    #[error("💀 {0} records cannot be indexed")]
    UnindexableRecord(String),
    #[error("💀 reference field {0:?} is empty or contains whitespace")]
    InvalidField(String),
}

/// 🪪 Identity of one indexable entity, detached from the entity itself.
///
/// Equality is field-by-field: kind, database id, search id, routing id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentReference {
    record_kind: RecordKind,
    database_id: u64,
    search_id: String,
    routing_id: Option<String>,
}

/// 🎁 Everything `serialize` is willing to accept.
#[derive(Debug)]
pub enum Serializable<'a> {
    /// Already serialized. Passed through untouched, so serialize(serialize(x)) is fine.
    Serialized(&'a str),
    Reference(&'a DocumentReference),
    /// Raw positional fields: class, database id, search id, optional routing id.
    Fields(Vec<String>),
    Record(&'a dyn Record),
}

impl<'a> From<&'a str> for Serializable<'a> {
    fn from(value: &'a str) -> Self {
        Serializable::Serialized(value)
    }
}

impl<'a> From<&'a DocumentReference> for Serializable<'a> {
    fn from(value: &'a DocumentReference) -> Self {
        Serializable::Reference(value)
    }
}

impl DocumentReference {
    pub fn new(
        record_kind: RecordKind,
        database_id: u64,
        search_id: impl Into<String>,
        routing_id: Option<String>,
    ) -> Self {
        Self {
            record_kind,
            database_id,
            search_id: search_id.into(),
            routing_id,
        }
    }

    /// 🌳 A repository object: a blob or wiki page by path, a commit by sha.
    ///
    /// The database id is the project id; the key lives in the search id, with
    /// whitespace and `%` escaped so the reference survives the space-joined wire form.
    pub fn repository_object(record_kind: RecordKind, project_id: u64, key: &str) -> Self {
        debug_assert!(record_kind.is_repository_object());
        let prefix = if record_kind == RecordKind::WikiBlob { "wiki_" } else { "" };
        Self {
            record_kind,
            database_id: project_id,
            search_id: format!("{prefix}{project_id}_{}", escape_wire(key)),
            routing_id: Some(project_routing(project_id)),
        }
    }

    /// 🏗️ Build a reference from a live record.
    ///
    /// Fails with [`InvalidError::UnindexableRecord`] when the record's class
    /// is not in the registry.
    pub fn build(record: &dyn Record) -> Result<Self, InvalidError> {
        let Some(record_kind) = RecordKind::from_class_name(record.class_name()) else {
            return Err(InvalidError::UnindexableRecord(
                record.class_name().to_string(),
            ));
        };
        Ok(Self {
            record_kind,
            database_id: record.database_id(),
            search_id: record.search_id(),
            routing_id: record.search_routing_id(),
        })
    }

    /// 🧩 Rebuild from positional fields: `[class, database_id, search_id, routing_id?]`.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self, InvalidError> {
        if !(3..=4).contains(&fields.len()) {
            return Err(InvalidError::WrongFieldCount(fields.len()));
        }
        let class_name = fields[0].as_ref();
        let record_kind = RecordKind::from_class_name(class_name)
            .ok_or_else(|| InvalidError::UnknownClass(class_name.to_string()))?;
        let raw_id = fields[1].as_ref();
        let database_id = raw_id
            .parse::<u64>()
            .map_err(|_| InvalidError::InvalidId(raw_id.to_string()))?;
        Ok(Self {
            record_kind,
            database_id,
            search_id: fields[2].as_ref().to_string(),
            routing_id: fields.get(3).map(|routing| routing.as_ref().to_string()),
        })
    }

    /// 📤 Turn anything reference-shaped into its wire string.
    ///
    /// - strings pass through unchanged
    /// - references and records are joined with single spaces
    /// - raw field arrays must have 3 or 4 elements, none empty, none with whitespace
    pub fn serialize(value: Serializable<'_>) -> Result<String, InvalidError> {
        match value {
            Serializable::Serialized(already) => Ok(already.to_string()),
            Serializable::Reference(reference) => Ok(reference.to_serialized()),
            Serializable::Fields(fields) => {
                if !(3..=4).contains(&fields.len()) {
                    return Err(InvalidError::WrongFieldCount(fields.len()));
                }
                if let Some(bad) = fields
                    .iter()
                    .find(|field| field.is_empty() || field.chars().any(char::is_whitespace))
                {
                    return Err(InvalidError::InvalidField(bad.clone()));
                }
                Ok(fields.join(" "))
            }
            Serializable::Record(record) => Ok(Self::build(record)?.to_serialized()),
        }
    }

    /// 📥 Split on whitespace and rebuild. The class must resolve or we bail.
    pub fn deserialize(serialized: &str) -> Result<Self, InvalidError> {
        let fields: Vec<&str> = serialized.split_whitespace().collect();
        Self::from_fields(&fields)
    }

    /// 📤 This reference, as a wire string.
    pub fn to_serialized(&self) -> String {
        let mut serialized = format!(
            "{} {} {}",
            self.record_kind.class_name(),
            self.database_id,
            self.search_id
        );
        if let Some(routing) = &self.routing_id {
            serialized.push(' ');
            serialized.push_str(routing);
        }
        serialized
    }

    /// 🔎 Find the live record again.
    ///
    /// `Ok(None)` when the row no longer exists. That's a tombstone, not a tragedy.
    pub async fn database_record(&self, store: &dyn RecordStore) -> Result<Option<Arc<dyn Record>>> {
        store.find(self.record_kind, self.database_id).await
    }

    pub fn record_kind(&self) -> RecordKind {
        self.record_kind
    }

    pub fn database_id(&self) -> u64 {
        self.database_id
    }

    pub fn search_id(&self) -> &str {
        &self.search_id
    }

    pub fn routing_id(&self) -> Option<&str> {
        self.routing_id.as_deref()
    }
}

/// `%` and whitespace become `%XX` escapes of their UTF-8 bytes.
fn escape_wire(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        if c == '%' || c.is_whitespace() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push_str(&format!("%{byte:02X}"));
            }
        } else {
            escaped.push(c);
        }
    }
    escaped
}

impl fmt::Display for DocumentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_serialized())
    }
}

impl FromStr for DocumentReference {
    type Err = InvalidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::deserialize(s)
    }
}
