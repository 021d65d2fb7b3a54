//! 📦 The bulk indexer: many little intents in, a few large `_bulk` writes out.
//!
//! 🎬 *[a reference arrives. then another. then four hundred more.]*
//! *[somewhere, a cluster charges a fixed fee per request and smiles.]*
//!
//! ```text
//!   Idle ──process──▶ Accumulating ──(next op would cross the limit)──▶ Flushing ──▶ Accumulating
//!     ▲                    │
//!     └──────flush─────────┘ (via Flushing)
//! ```
//!
//! - `process(ref)` resolves the reference, decides index-or-delete, and appends
//!   the rendered operation. If the append would push the buffer past
//!   `bulk_limit_bytes`, the buffer is flushed first. An operation that is bigger
//!   than the whole limit on its own is sent by itself, immediately.
//! - `flush()` sends whatever is pending as one request and returns the
//!   references that failed since the last explicit `flush()`: per-item errors,
//!   every pending reference when the transport fails, and records that could not
//!   produce a document.
//! - `failures()` is everything that ever failed on this instance.
//!
//! Nothing retries in here. A failed reference is the caller's cue to requeue it.
//!
//! Single-threaded by contract: `&mut self` everywhere. Want parallelism? Make
//! more indexers. They share nothing but the backend handle.

pub mod bulk_operation;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::backends::{Backend, SearchBackend};
use crate::cache::EnabledCache;
use crate::document_reference::DocumentReference;
use crate::records::{Indexable, Record, RecordKind, RecordStore};

pub use bulk_operation::{BulkAction, BulkItemResult, BulkOperation, BulkResponse};

/// 📏 10 MiB. Big enough to amortize the request, small enough not to get a 413.
pub const DEFAULT_BULK_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// 🔧 Indexer knobs.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    #[serde(default = "default_bulk_limit_bytes")]
    pub bulk_limit_bytes: usize,
    /// Only index records whose project the [`IndexingPolicy`] enables.
    #[serde(default)]
    pub limit_indexing: bool,
}

fn default_bulk_limit_bytes() -> usize {
    DEFAULT_BULK_LIMIT_BYTES
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            bulk_limit_bytes: DEFAULT_BULK_LIMIT_BYTES,
            limit_indexing: false,
        }
    }
}

/// 🚦 Which projects are allowed into the index when indexing is limited.
pub trait IndexingPolicy: std::fmt::Debug + Send + Sync {
    fn project_enabled(&self, project_id: u64) -> bool;
}

/// 🚦 A fixed allowlist of project ids.
#[derive(Debug, Default, Clone)]
pub struct StaticIndexingPolicy {
    enabled: HashSet<u64>,
}

impl StaticIndexingPolicy {
    pub fn new(enabled: impl IntoIterator<Item = u64>) -> Self {
        Self {
            enabled: enabled.into_iter().collect(),
        }
    }
}

impl IndexingPolicy for StaticIndexingPolicy {
    fn project_enabled(&self, project_id: u64) -> bool {
        self.enabled.contains(&project_id)
    }
}

/// 🚦 The policy plus the cache that remembers its answers.
#[derive(Debug, Clone)]
pub struct IndexingLimits {
    policy: Arc<dyn IndexingPolicy>,
    cache: Arc<EnabledCache>,
}

impl IndexingLimits {
    pub fn new(policy: Arc<dyn IndexingPolicy>, cache: Arc<EnabledCache>) -> Self {
        Self { policy, cache }
    }

    /// Records outside any project are always allowed.
    pub fn allows(&self, record: &dyn Record) -> bool {
        match record.project_id() {
            None => true,
            Some(project_id) => self.cache.fetch(RecordKind::Project.doc_type(), project_id, || {
                self.policy.project_enabled(project_id)
            }),
        }
    }

    /// 🧹 A project's indexing setting changed. The next record of that project asks the policy again.
    pub fn project_changed(&self, project_id: u64) {
        self.cache.delete_record(RecordKind::Project.doc_type(), project_id);
    }
}

/// 🚥 Where the indexer is in its little life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    Idle,
    Accumulating,
    Flushing,
}

/// 📦 Buffers bulk operations up to a byte limit and tracks what failed.
#[derive(Debug)]
pub struct BulkIndexer {
    backend: Backend,
    store: Arc<dyn RecordStore>,
    index_name: String,
    bulk_limit_bytes: usize,
    limits: Option<IndexingLimits>,
    pending: Vec<BulkOperation>,
    pending_bytes: usize,
    /// Failed since the last explicit `flush()`, returned by the next one.
    unreported_failures: Vec<DocumentReference>,
    failures: Vec<DocumentReference>,
    state: IndexerState,
}

impl BulkIndexer {
    pub fn new(
        backend: Backend,
        store: Arc<dyn RecordStore>,
        index_name: impl Into<String>,
        config: &IndexerConfig,
    ) -> Self {
        Self {
            backend,
            store,
            index_name: index_name.into(),
            bulk_limit_bytes: config.bulk_limit_bytes.max(1),
            limits: None,
            pending: Vec::new(),
            pending_bytes: 0,
            unreported_failures: Vec::new(),
            failures: Vec::new(),
            state: IndexerState::Idle,
        }
    }

    /// 🚦 Turn on limited indexing. Records of disabled projects become deletes.
    pub fn with_limits(mut self, limits: IndexingLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 📋 Every reference that failed on this instance, across all flushes.
    pub fn failures(&self) -> &[DocumentReference] {
        &self.failures
    }

    /// 🔄 Resolve `reference`, render its operation, buffer it.
    ///
    /// Errors only when the record store itself fails. Everything about the
    /// record (gone, should be deleted, cannot be serialized) is handled here.
    pub async fn process(&mut self, reference: &DocumentReference) -> Result<&mut Self> {
        if let Some(operation) = self.operation_for(reference).await? {
            self.append(operation).await;
        }
        Ok(self)
    }

    /// 📥 Buffer an operation rendered elsewhere (repository objects), under the
    /// same byte limit and failure tracking as [`process`](Self::process).
    pub async fn submit(&mut self, operation: BulkOperation) -> &mut Self {
        self.append(operation).await;
        self
    }

    async fn append(&mut self, operation: BulkOperation) {
        let size = operation.byte_len();

        if !self.pending.is_empty() && self.pending_bytes + size > self.bulk_limit_bytes {
            trace!(pending = self.pending_bytes, incoming = size, "📏 limit reached, flushing before append");
            let failed = self.send_pending().await;
            self.unreported_failures.extend(failed);
        }

        self.pending.push(operation);
        self.pending_bytes += size;
        self.state = IndexerState::Accumulating;

        if self.pending_bytes > self.bulk_limit_bytes {
            warn!(
                bytes = size,
                limit = self.bulk_limit_bytes,
                "🐘 single operation is larger than the bulk limit, sending it alone"
            );
            let failed = self.send_pending().await;
            self.unreported_failures.extend(failed);
        }
    }

    /// 🚽 Send what's pending and report what failed since the last `flush()`.
    pub async fn flush(&mut self) -> Vec<DocumentReference> {
        let mut failed = std::mem::take(&mut self.unreported_failures);
        for reference in self.send_pending().await {
            if !failed.contains(&reference) {
                failed.push(reference);
            }
        }
        failed
    }

    async fn operation_for(&mut self, reference: &DocumentReference) -> Result<Option<BulkOperation>> {
        if reference.record_kind().is_repository_object() {
            self.record_failure(
                reference,
                &anyhow!("repository objects are indexed from their repository, not from the record store"),
            );
            return Ok(None);
        }

        let record = reference
            .database_record(self.store.as_ref())
            .await
            .with_context(|| format!("💀 Record lookup for '{reference}' failed. The store is having a bad day."))?;

        let Some(record) = record else {
            debug!(search_id = reference.search_id(), "🪦 record is gone, deleting its document");
            return BulkOperation::delete(&self.index_name, reference.clone()).map(Some);
        };

        if let Some(limits) = &self.limits
            && !limits.allows(record.as_ref())
        {
            debug!(search_id = reference.search_id(), "🚦 project not enabled for indexing, deleting its document");
            return BulkOperation::delete(&self.index_name, reference.clone()).map(Some);
        }

        match record.indexed_json() {
            Ok(Indexable::Document(document)) => {
                let document = stamp(document, reference, record.as_ref());
                match BulkOperation::index(&self.index_name, reference.clone(), &document) {
                    Ok(operation) => Ok(Some(operation)),
                    Err(err) => {
                        self.record_failure(reference, &err);
                        Ok(None)
                    }
                }
            }
            Ok(Indexable::ShouldDelete) => {
                debug!(search_id = reference.search_id(), "🗑️ record asked to be forgotten");
                BulkOperation::delete(&self.index_name, reference.clone()).map(Some)
            }
            Err(err) => {
                self.record_failure(reference, &err);
                Ok(None)
            }
        }
    }

    fn record_failure(&mut self, reference: &DocumentReference, err: &anyhow::Error) {
        warn!(search_id = reference.search_id(), error = %err, "💀 record could not be turned into a document");
        self.unreported_failures.push(reference.clone());
        self.failures.push(reference.clone());
    }

    /// 📡 One `_bulk` call with everything pending. The buffer is cleared either way.
    async fn send_pending(&mut self) -> Vec<DocumentReference> {
        if self.pending.is_empty() {
            self.state = IndexerState::Idle;
            return Vec::new();
        }

        self.state = IndexerState::Flushing;
        let operations = std::mem::take(&mut self.pending);
        let bytes = std::mem::take(&mut self.pending_bytes);
        let body: String = operations.iter().map(BulkOperation::lines).collect();
        debug!(operations = operations.len(), bytes, "📦 flushing bulk buffer");

        let mut failed = match self.backend.bulk(body).await {
            Ok(response) => response.failed_references(&operations),
            Err(err) => {
                warn!(operations = operations.len(), error = %err, "💀 bulk request failed, every pending reference failed with it");
                operations.into_iter().map(BulkOperation::into_reference).collect()
            }
        };
        dedup(&mut failed);

        self.failures.extend(failed.iter().cloned());
        self.state = IndexerState::Idle;
        failed
    }
}

/// 🏷️ Every document carries its `type`, its `id` and, when it has one, its `project_id`.
fn stamp(document: Value, reference: &DocumentReference, record: &dyn Record) -> Value {
    let Value::Object(mut fields) = document else {
        return document;
    };
    fields
        .entry("type")
        .or_insert_with(|| Value::from(reference.record_kind().doc_type()));
    fields
        .entry("id")
        .or_insert_with(|| Value::from(reference.database_id()));
    if let Some(project_id) = record.project_id() {
        fields.entry("project_id").or_insert_with(|| Value::from(project_id));
    }
    Value::Object(fields)
}

fn dedup(references: &mut Vec<DocumentReference>) {
    let mut seen = HashSet::new();
    references.retain(|reference| seen.insert(reference.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryBackend;
    use crate::records::{InMemoryRecordStore, JsonRecord, RecordKind};
    use serde_json::json;

    const INDEX: &str = "gitlab-test";

    struct Fixture {
        backend: InMemoryBackend,
        store: Arc<InMemoryRecordStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                backend: InMemoryBackend::new(),
                store: Arc::new(InMemoryRecordStore::new()),
            }
        }

        fn issue(&self, id: u64, title: &str) -> DocumentReference {
            let record = JsonRecord::new(RecordKind::Issue, id, json!({ "title": title })).in_project(7);
            let reference = DocumentReference::build(&record).expect("issues are indexable");
            self.store.insert(record).expect("insert");
            reference
        }

        fn indexer(&self, bulk_limit_bytes: usize) -> BulkIndexer {
            let config = IndexerConfig {
                bulk_limit_bytes,
                ..IndexerConfig::default()
            };
            BulkIndexer::new(self.backend.clone().into(), self.store.clone(), INDEX, &config)
        }
    }

    fn operation_size(reference: &DocumentReference, title: &str) -> usize {
        let document = json!({ "title": title, "type": "issue", "id": reference.database_id(), "project_id": 7 });
        BulkOperation::index(INDEX, reference.clone(), &document)
            .expect("renders")
            .byte_len()
    }

    #[tokio::test]
    async fn the_one_where_one_and_a_half_limits_means_one_early_flush() -> Result<()> {
        let fixture = Fixture::new();
        let title = "x".repeat(200);
        let first = fixture.issue(1, &title);
        let second = fixture.issue(2, &title);
        let size = operation_size(&first, &title);
        assert_eq!(size, operation_size(&second, &title));

        // two operations add up to 1.5x the limit
        let mut indexer = fixture.indexer(size * 4 / 3);
        indexer.process(&first).await?;
        assert!(fixture.backend.bulk_bodies().await.is_empty());
        indexer.process(&second).await?;

        let bodies = fixture.backend.bulk_bodies().await;
        assert_eq!(bodies.len(), 1, "exactly one intermediate flush");
        assert!(bodies[0].contains("issue_1") && !bodies[0].contains("issue_2"));
        assert!(indexer.pending_bytes() <= size * 4 / 3);

        assert!(indexer.flush().await.is_empty());
        let bodies = fixture.backend.bulk_bodies().await;
        assert_eq!(bodies.len(), 2);
        assert!(bodies[1].contains("issue_2") && !bodies[1].contains("issue_1"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_bulk_call_explodes_with_two_pending() -> Result<()> {
        let fixture = Fixture::new();
        let first = fixture.issue(1, "one");
        let second = fixture.issue(2, "two");
        let mut indexer = fixture.indexer(DEFAULT_BULK_LIMIT_BYTES);
        indexer.process(&first).await?.process(&second).await?;

        fixture.backend.fail_next_bulk("generic kaboom").await;
        let failed = indexer.flush().await;
        assert_eq!(failed, vec![first.clone(), second.clone()]);
        assert_eq!(indexer.failures(), &[first, second]);
        assert_eq!(indexer.pending_len(), 0);
        assert_eq!(indexer.state(), IndexerState::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_failures_pile_up_across_flushes() -> Result<()> {
        let fixture = Fixture::new();
        let a = fixture.issue(1, "a");
        let b = fixture.issue(2, "b");
        let mut indexer = fixture.indexer(DEFAULT_BULK_LIMIT_BYTES);

        fixture.backend.reject_id("issue_1").await;
        indexer.process(&a).await?;
        assert_eq!(indexer.flush().await, vec![a.clone()]);

        fixture.backend.reject_id("issue_2").await;
        indexer.process(&b).await?;
        assert_eq!(indexer.flush().await, vec![b.clone()], "only this flush's failures");

        let all: HashSet<_> = indexer.failures().iter().cloned().collect();
        assert_eq!(all, HashSet::from([a, b]));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_flush_really_clears_the_buffer() -> Result<()> {
        let fixture = Fixture::new();
        let a = fixture.issue(1, "a");
        let b = fixture.issue(2, "b");
        let mut indexer = fixture.indexer(DEFAULT_BULK_LIMIT_BYTES);

        assert!(indexer.flush().await.is_empty());
        assert!(fixture.backend.bulk_bodies().await.is_empty(), "nothing pending, no call");

        fixture.backend.fail_next_bulk("timeout").await;
        indexer.process(&a).await?;
        indexer.flush().await;

        indexer.process(&b).await?;
        indexer.flush().await;
        let bodies = fixture.backend.bulk_bodies().await;
        assert_eq!(bodies.len(), 2);
        assert!(bodies[1].contains("issue_2") && !bodies[1].contains("issue_1"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_deleted_rows_become_tombstones() -> Result<()> {
        let fixture = Fixture::new();
        let gone = fixture.issue(1, "doomed");
        let mut indexer = fixture.indexer(DEFAULT_BULK_LIMIT_BYTES);
        indexer.process(&gone).await?;
        indexer.flush().await;
        assert!(fixture.backend.document(INDEX, "issue_1").await.is_some());

        fixture.store.remove(RecordKind::Issue, 1);
        indexer.process(&gone).await?;
        assert!(indexer.flush().await.is_empty());
        let bodies = fixture.backend.bulk_bodies().await;
        assert_eq!(
            bodies[1],
            "{\"delete\":{\"_index\":\"gitlab-test\",\"_id\":\"issue_1\",\"routing\":\"project_7\"}}\n"
        );
        assert!(fixture.backend.document(INDEX, "issue_1").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_record_asks_to_be_forgotten() -> Result<()> {
        let fixture = Fixture::new();
        fixture
            .backend
            .index_document(INDEX, "issue_3", Some("project_7"), json!({ "title": "old" }))
            .await;
        let record = JsonRecord::new(RecordKind::Issue, 3, json!({})).in_project(7).should_delete();
        let reference = DocumentReference::build(&record)?;
        fixture.store.insert(record)?;

        let mut indexer = fixture.indexer(DEFAULT_BULK_LIMIT_BYTES);
        indexer.process(&reference).await?;
        indexer.flush().await;
        assert!(fixture.backend.bulk_bodies().await[0].starts_with("{\"delete\""));
        assert!(fixture.backend.document(INDEX, "issue_3").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_broken_record_fails_without_a_request() -> Result<()> {
        let fixture = Fixture::new();
        let record = JsonRecord::new(RecordKind::Issue, 4, json!({})).in_project(7).failing("encoding error");
        let reference = DocumentReference::build(&record)?;
        fixture.store.insert(record)?;

        let mut indexer = fixture.indexer(DEFAULT_BULK_LIMIT_BYTES);
        indexer.process(&reference).await?;
        assert_eq!(indexer.pending_len(), 0);
        assert_eq!(indexer.flush().await, vec![reference.clone()]);
        assert!(fixture.backend.bulk_bodies().await.is_empty());
        assert_eq!(indexer.failures(), &[reference]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_blob_reference_is_not_a_database_row() -> Result<()> {
        let fixture = Fixture::new();
        let reference = DocumentReference::repository_object(RecordKind::Blob, 7, "lib/bulk.rb");
        let mut indexer = fixture.indexer(DEFAULT_BULK_LIMIT_BYTES);
        indexer.process(&reference).await?;
        assert_eq!(indexer.flush().await, vec![reference]);
        assert!(fixture.backend.bulk_bodies().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_submitted_operations_share_the_buffer() -> Result<()> {
        let fixture = Fixture::new();
        let issue = fixture.issue(1, "bulk");
        let blob = DocumentReference::repository_object(RecordKind::Blob, 7, "lib/bulk.rb");
        let mut indexer = fixture.indexer(DEFAULT_BULK_LIMIT_BYTES);
        assert_eq!(indexer.index_name(), INDEX);

        indexer.process(&issue).await?;
        indexer
            .submit(BulkOperation::index(INDEX, blob, &json!({ "type": "blob", "project_id": 7 }))?)
            .await;
        assert_eq!(indexer.pending_len(), 2);
        assert!(indexer.flush().await.is_empty());
        assert_eq!(fixture.backend.bulk_bodies().await.len(), 1, "one request for both");
        assert!(fixture.backend.document(INDEX, "7_lib/bulk.rb").await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_documents_get_their_name_tags() -> Result<()> {
        let fixture = Fixture::new();
        let reference = fixture.issue(5, "stamped");
        let mut indexer = fixture.indexer(DEFAULT_BULK_LIMIT_BYTES);
        indexer.process(&reference).await?;
        indexer.flush().await;
        let stored = fixture.backend.document(INDEX, "issue_5").await.unwrap_or_default();
        assert_eq!(stored["type"], "issue");
        assert_eq!(stored["id"], 5);
        assert_eq!(stored["project_id"], 7);
        assert_eq!(fixture.backend.routing(INDEX, "issue_5").await.as_deref(), Some("project_7"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_elephant_travels_alone() -> Result<()> {
        let fixture = Fixture::new();
        let small = fixture.issue(1, "small");
        let huge = fixture.issue(2, &"x".repeat(4_096));
        let mut indexer = fixture.indexer(1_024);

        indexer.process(&small).await?;
        indexer.process(&huge).await?;
        let bodies = fixture.backend.bulk_bodies().await;
        assert_eq!(bodies.len(), 2, "small flushed first, then the elephant by itself");
        assert!(bodies[1].contains("issue_2") && !bodies[1].contains("issue_1"));
        assert_eq!(indexer.pending_bytes(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_limited_indexing_keeps_out_the_uninvited() -> Result<()> {
        let fixture = Fixture::new();
        let invited = fixture.issue(1, "enabled project");
        let record = JsonRecord::new(RecordKind::Issue, 2, json!({ "title": "elsewhere" })).in_project(8);
        let uninvited = DocumentReference::build(&record)?;
        fixture.store.insert(record)?;

        let cache = Arc::new(EnabledCache::new());
        let limits = IndexingLimits::new(Arc::new(StaticIndexingPolicy::new([7])), cache.clone());
        let mut indexer = fixture.indexer(DEFAULT_BULK_LIMIT_BYTES).with_limits(limits);
        indexer.process(&invited).await?.process(&uninvited).await?;
        indexer.flush().await;

        let body = &fixture.backend.bulk_bodies().await[0];
        assert!(body.contains("{\"index\":{\"_index\":\"gitlab-test\",\"_id\":\"issue_1\""));
        assert!(body.contains("{\"delete\":{\"_index\":\"gitlab-test\",\"_id\":\"issue_2\""));
        assert_eq!(cache.len(), 2, "one cached answer per project");
        Ok(())
    }

    #[test]
    fn the_one_where_the_limits_and_the_cache_agree_on_names() {
        let cache = Arc::new(EnabledCache::new());
        let limits = IndexingLimits::new(Arc::new(StaticIndexingPolicy::new([7])), cache.clone());
        let record = JsonRecord::new(RecordKind::Issue, 1, json!({})).in_project(7);

        assert!(limits.allows(&record));
        assert_eq!(cache.len(), 1);
        cache.delete_record("project", 7);
        assert!(cache.is_empty(), "invalidating \"project\" 7 drops what the limits cached");

        assert!(limits.allows(&record));
        limits.project_changed(7);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_the_buffer_never_outgrows_the_limit() -> Result<()> {
        let fixture = Fixture::new();
        let limit = 700;
        let sizing = DocumentReference::new(RecordKind::Issue, 100, "issue_100", Some("project_7".to_string()));
        let exactly_the_limit = "y".repeat(limit - operation_size(&sizing, ""));
        let twice_the_limit = "z".repeat(limit * 2);

        let mut references = Vec::new();
        for id in 100..160u64 {
            let reference = match id % 6 {
                0 => fixture.issue(id, "tiny"),
                1 => fixture.issue(id, &exactly_the_limit),
                2 => fixture.issue(id, &twice_the_limit),
                3 => {
                    let reference = fixture.issue(id, "soon gone");
                    fixture.store.remove(RecordKind::Issue, id);
                    reference
                }
                4 => {
                    let record = JsonRecord::new(RecordKind::Issue, id, json!({})).in_project(7).should_delete();
                    let reference = DocumentReference::build(&record)?;
                    fixture.store.insert(record)?;
                    reference
                }
                _ => fixture.issue(id, &"m".repeat((id as usize * 37) % (limit / 2))),
            };
            references.push(reference);
        }
        assert_eq!(operation_size(&references[3], &exactly_the_limit), limit);

        let mut indexer = fixture.indexer(limit);
        for reference in &references {
            indexer.process(reference).await?;
            assert!(
                indexer.pending_bytes() <= limit,
                "{} bytes pending after {reference}",
                indexer.pending_bytes()
            );
        }
        assert!(indexer.flush().await.is_empty());

        let bodies = fixture.backend.bulk_bodies().await;
        let mut sent = 0;
        for body in &bodies {
            let operations = body.matches("{\"index\":").count() + body.matches("{\"delete\":").count();
            assert!(
                body.len() <= limit || operations == 1,
                "a {}-byte body carried {operations} operations",
                body.len()
            );
            sent += operations;
        }
        assert_eq!(sent, references.len(), "every reference went out exactly once");
        Ok(())
    }
}
