//! # Previously, on srx...
//!
//! 🎬 The domain layer was out to lunch. Somebody still had to hand the indexer
//! some records. So we built a store that lives entirely in RAM, gone the moment
//! you blink, and a record that is just JSON wearing a name tag.
//!
//! [`InMemoryRecordStore`] backs the CLI (records loaded from an NDJSON file) and
//! every test that needs rows to appear, disappear, or misbehave on cue.
//!
//! ⚠️ This is not a database. If you're deploying this as your system of record,
//! please also deploy a therapist.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{Indexable, Record, RecordKind, RecordStore};

/// 📄 A record that is nothing but a class name, an id, and a JSON body.
///
/// One NDJSON line per record:
///
/// ```text
/// {"class":"Issue","id":1,"project_id":7,"document":{"title":"flaky spec","confidential":false}}
/// ```
///
/// `should_delete` and `failure` let fixtures act out the other two endings
/// of `indexed_json`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JsonRecord {
    #[serde(rename = "class")]
    pub class_name: String,
    pub id: u64,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub document: Value,
    #[serde(default)]
    pub should_delete: bool,
    #[serde(default)]
    pub failure: Option<String>,
}

impl JsonRecord {
    /// 🏗️ A plain indexable record.
    pub fn new(kind: RecordKind, id: u64, document: Value) -> Self {
        Self {
            class_name: kind.class_name().to_string(),
            id,
            project_id: None,
            document,
            should_delete: false,
            failure: None,
        }
    }

    /// 📍 Attach the owning project.
    pub fn in_project(mut self, project_id: u64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// 🗑️ This record has decided it no longer belongs in the index.
    pub fn should_delete(mut self) -> Self {
        self.should_delete = true;
        self
    }

    /// 💀 This record cannot produce a document at all.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }
}

impl Record for JsonRecord {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn database_id(&self) -> u64 {
        self.id
    }

    fn project_id(&self) -> Option<u64> {
        // 🪞 a project is its own project. deep, but true.
        if self.class_name == RecordKind::Project.class_name() {
            Some(self.id)
        } else {
            self.project_id
        }
    }

    fn indexed_json(&self) -> Result<Indexable> {
        if let Some(reason) = &self.failure {
            bail!("💀 {} {} refused to become JSON: {}", self.class_name, self.id, reason);
        }
        if self.should_delete {
            return Ok(Indexable::ShouldDelete);
        }
        Ok(Indexable::Document(self.document.clone()))
    }
}

/// 🗄️ A `RecordStore` backed by a concurrent map. Clone-free sharing via `Arc<dyn Record>`.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: DashMap<(RecordKind, u64), Arc<dyn Record>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📥 Store a record. Unregistered classes are rejected, same as the indexer would.
    pub fn insert<R: Record + 'static>(&self, record: R) -> Result<()> {
        let Some(kind) = RecordKind::from_class_name(record.class_name()) else {
            bail!(
                "💀 '{}' is not a registered record class. The store only keeps indexable things.",
                record.class_name()
            );
        };
        self.records
            .insert((kind, record.database_id()), Arc::new(record));
        Ok(())
    }

    /// 🗑️ Delete the row. References to it become tombstones.
    pub fn remove(&self, kind: RecordKind, database_id: u64) -> bool {
        self.records.remove(&(kind, database_id)).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 📖 Parse NDJSON, one [`JsonRecord`] per non-blank line.
    pub fn from_ndjson(text: &str) -> Result<Self> {
        let store = Self::new();
        for (line_number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: JsonRecord = serde_json::from_str(line).with_context(|| {
                format!(
                    "💀 Line {} of the records file is not a record. It might be JSON. It is not OUR JSON.",
                    line_number + 1
                )
            })?;
            store.insert(record)?;
        }
        debug!("📦 loaded {} records into the in-memory store", store.len());
        Ok(store)
    }

    /// 📂 Read and parse an NDJSON records file.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.with_context(|| {
            format!(
                "💀 The records file '{}' would not open. We knocked. Nobody answered.",
                path.display()
            )
        })?;
        Self::from_ndjson(&text)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find(&self, kind: RecordKind, database_id: u64) -> Result<Option<Arc<dyn Record>>> {
        Ok(self
            .records
            .get(&(kind, database_id))
            .map(|entry| Arc::clone(entry.value())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn the_one_where_ndjson_becomes_a_tiny_database() -> Result<()> {
        let store = InMemoryRecordStore::from_ndjson(
            r#"
            {"class":"Project","id":7,"document":{"name":"gitlab"}}
            {"class":"Issue","id":1,"project_id":7,"document":{"title":"flaky spec"}}

            {"class":"Note","id":9,"project_id":7,"should_delete":true}
            "#,
        )?;
        assert_eq!(store.len(), 3);

        let issue = store.find(RecordKind::Issue, 1).await?.expect("issue should exist");
        assert_eq!(issue.search_routing_id().as_deref(), Some("project_7"));
        assert_eq!(
            issue.indexed_json()?,
            Indexable::Document(json!({"title": "flaky spec"}))
        );

        let project = store.find(RecordKind::Project, 7).await?.expect("project should exist");
        assert_eq!(project.project_id(), Some(7));

        let note = store.find(RecordKind::Note, 9).await?.expect("note should exist");
        assert_eq!(note.indexed_json()?, Indexable::ShouldDelete);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_removed_rows_stay_removed() -> Result<()> {
        let store = InMemoryRecordStore::new();
        store.insert(JsonRecord::new(RecordKind::User, 5, json!({"username": "root"})))?;
        assert!(store.remove(RecordKind::User, 5));
        assert!(store.find(RecordKind::User, 5).await?.is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_unregistered_classes_are_turned_away() {
        let result = InMemoryRecordStore::from_ndjson(r#"{"class":"Pipeline","id":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn the_one_where_a_failing_record_says_why() {
        let record = JsonRecord::new(RecordKind::Issue, 2, json!({})).failing("mapping exploded");
        let err = record.indexed_json().expect_err("failure should surface");
        assert!(err.to_string().contains("mapping exploded"));
    }
}
