//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where reference dumps run to millions of lines..."
//! 🎬 "One supervisor dared to index them all." 🦆
//!
//! 📦 The Supervisor wires the indexing pipeline:
//!
//! ```text
//! refs file ──▶ ReferenceReaderWorker ──(async-channel)──▶ IndexerWorker ──▶ BulkIndexer ──▶ backend
//! ```
//!
//! The reader owns the sender, so when the file runs out the channel closes and
//! the indexer does its final flush. If the indexer dies first, the reader notices
//! its sends bouncing and stops reading.
//!
//! ⚠️ Workers stay private. You talk to the supervisor.

mod workers;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::document_reference::DocumentReference;
use crate::indexer::BulkIndexer;
use crate::progress::ProgressMetrics;
use workers::{IndexerWorker, ReferenceReaderWorker, Worker};

/// 📋 What an indexing run did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IndexingSummary {
    /// References that parsed and went through the indexer.
    pub processed: u64,
    /// Lines that were not references at all. They can't be retried, only investigated.
    pub invalid: Vec<String>,
    /// References the backend (or the record) refused. Requeue these.
    pub failed: Vec<DocumentReference>,
}

/// 📦 Owns the config, spawns the workers, collects the outcome.
#[derive(Debug)]
pub(crate) struct Supervisor {
    app_config: AppConfig,
}

impl Supervisor {
    pub(crate) fn new(app_config: AppConfig) -> Self {
        Self { app_config }
    }

    /// 🧵 Stream every reference in `refs_path` (plain or gzipped) through `indexer`.
    pub(crate) async fn run_indexing(
        &self,
        refs_path: &Path,
        indexer: BulkIndexer,
        show_progress: bool,
    ) -> Result<IndexingSummary> {
        let (tx, rx) = async_channel::bounded(self.app_config.runtime.queue_capacity.max(1));

        // a gzipped dump has no meaningful byte total for the bar
        let total_size = match tokio::fs::metadata(refs_path).await {
            Ok(metadata) if !is_gzip_name(refs_path) => metadata.len(),
            _ => 0,
        };
        let label = refs_path.display().to_string();
        let progress = if show_progress {
            ProgressMetrics::new(label, total_size)
        } else {
            ProgressMetrics::hidden(label, total_size)
        };

        let reader = ReferenceReaderWorker::new(refs_path.to_path_buf(), tx).start();
        let indexer = IndexerWorker::new(rx, indexer, progress).start();
        let (read, indexed) = tokio::join!(reader, indexer);

        let summary = indexed
            .context("💀 The indexer worker panicked. It took the summary with it.")?
            .context("💀 The indexer worker gave up mid-run.")?;
        let lines = read
            .context("💀 The reference reader panicked.")?
            .with_context(|| format!("💀 Could not read references from '{}'.", refs_path.display()))?;

        info!(
            lines,
            processed = summary.processed,
            invalid = summary.invalid.len(),
            failed = summary.failed.len(),
            "🏁 indexing run finished"
        );
        Ok(summary)
    }
}

fn is_gzip_name(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension == "gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryBackend;
    use crate::indexer::IndexerConfig;
    use crate::records::{InMemoryRecordStore, JsonRecord, RecordKind};
    use flate2::{Compression, write::GzEncoder};
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;

    const INDEX: &str = "gitlab-test";

    fn store() -> Arc<InMemoryRecordStore> {
        let store = InMemoryRecordStore::new();
        store
            .insert(JsonRecord::new(RecordKind::Project, 7, json!({ "name": "gitlab" })))
            .expect("insert project");
        store
            .insert(JsonRecord::new(RecordKind::Issue, 1, json!({ "title": "flaky spec" })).in_project(7))
            .expect("insert issue");
        store
            .insert(JsonRecord::new(RecordKind::Issue, 2, json!({ "title": "slow spec" })).in_project(7))
            .expect("insert issue");
        Arc::new(store)
    }

    const REFS: &str = "Project 7 project_7\n\
                        Issue 1 issue_1 project_7\n\
                        \n\
                        definitely not a reference\n\
                        Issue 2 issue_2 project_7\n\
                        Issue 404 issue_404 project_7\n";

    fn indexer(backend: &InMemoryBackend, store: Arc<InMemoryRecordStore>) -> BulkIndexer {
        BulkIndexer::new(backend.clone().into(), store, INDEX, &IndexerConfig::default())
    }

    fn supervisor(queue_capacity: usize) -> Supervisor {
        let mut config = AppConfig::default();
        config.runtime.queue_capacity = queue_capacity;
        Supervisor::new(config)
    }

    #[tokio::test]
    async fn the_one_where_a_refs_file_becomes_an_index() -> Result<()> {
        let backend = InMemoryBackend::new();
        backend.index_document(INDEX, "issue_404", Some("project_7"), json!({ "title": "ghost" })).await;
        let mut refs = tempfile::NamedTempFile::new()?;
        refs.write_all(REFS.as_bytes())?;

        let summary = supervisor(2)
            .run_indexing(refs.path(), indexer(&backend, store()), false)
            .await?;

        assert_eq!(summary.processed, 4);
        assert_eq!(summary.invalid, vec!["definitely not a reference".to_string()]);
        assert!(summary.failed.is_empty());
        assert_eq!(backend.document_count().await, 3, "the ghost is gone, three live records indexed");
        assert_eq!(backend.routing(INDEX, "issue_2").await.as_deref(), Some("project_7"));
        assert_eq!(backend.bulk_bodies().await.len(), 1, "everything fit in one request");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_gzip_is_sniffed_and_failures_come_back() -> Result<()> {
        let backend = InMemoryBackend::new();
        backend.reject_id("issue_2").await;

        let refs = tempfile::Builder::new().suffix(".gz").tempfile()?;
        let mut encoder = GzEncoder::new(refs.reopen()?, Compression::default());
        encoder.write_all(REFS.as_bytes())?;
        encoder.finish()?;

        let summary = supervisor(1)
            .run_indexing(refs.path(), indexer(&backend, store()), false)
            .await?;

        assert_eq!(summary.processed, 4);
        let failed: Vec<String> = summary.failed.iter().map(DocumentReference::to_serialized).collect();
        assert_eq!(failed, vec!["Issue 2 issue_2 project_7".to_string()]);
        assert!(backend.document(INDEX, "issue_1").await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_refs_file_does_not_exist() {
        let backend = InMemoryBackend::new();
        let result = supervisor(4)
            .run_indexing(Path::new("/definitely/not/here.refs"), indexer(&backend, store()), false)
            .await;
        let err = result.expect_err("a missing file is an error");
        assert!(format!("{err:#}").contains("/definitely/not/here.refs"));
    }
}
