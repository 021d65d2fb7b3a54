//! 🔍 srx: the search relay.
//!
//! Keeps a search cluster in step with a relational store and reads it back:
//!
//! - [`document_reference`]: the tiny, serializable identity of a record.
//! - [`backends`]: the signed HTTP client for the cluster, and an in-memory stand-in.
//! - [`indexer`]: size-bounded `_bulk` batches with per-item failure tracking.
//! - [`search`]: one query, nine scopes, permission-aware pages and counts.
//! - [`index_status`]: where incremental repository indexing left off.
//! - [`repository`]: files, wiki pages and commits, straight from git.
//!
//! [`run`] is the whole indexing pipeline behind the CLI; [`run_repository`]
//! is its git-shaped sibling.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

pub mod app_config;
pub mod backends;
pub mod cache;
pub mod document_reference;
pub mod index_status;
pub mod indexer;
mod progress;
pub mod records;
pub mod repository;
pub mod search;
mod supervisors;

use app_config::AppConfig;
use backends::{Backend, ElasticsearchConfig, SearchClient};
use cache::EnabledCache;
use indexer::{BulkIndexer, IndexingLimits, IndexingPolicy};
use index_status::InMemoryIndexStatusStore;
use records::{InMemoryRecordStore, RecordStore};
use repository::{GitRepository, RepositoryIndexingSummary, RepositoryKind};
use search::{AccessPolicy, ProjectScope, SearchActor, SearchFilters, SearchResults};
pub use supervisors::IndexingSummary;

/// 📡 A cluster backend from configuration. Signs requests when `aws` is on.
pub async fn connect(config: &ElasticsearchConfig) -> Result<Backend> {
    let client = SearchClient::build(config)
        .await
        .with_context(|| format!("💀 Could not build a client for '{}'.", config.url))?;
    Ok(client.into())
}

/// 🧵 Stream the references in `refs_path` into `backend`.
///
/// With `limit_indexing` on, `policy` decides which projects stay in the index;
/// turning it on without a policy is refused rather than deleting everything.
pub async fn index_references(
    app_config: AppConfig,
    backend: Backend,
    store: Arc<dyn RecordStore>,
    refs_path: &Path,
    policy: Option<Arc<dyn IndexingPolicy>>,
    show_progress: bool,
) -> Result<IndexingSummary> {
    let mut indexer = BulkIndexer::new(
        backend,
        store,
        &app_config.elasticsearch.index_name,
        &app_config.indexer,
    );
    if app_config.indexer.limit_indexing {
        let policy = policy.context(
            "💀 limit_indexing is on but no indexing policy was given. Every document would be deleted.",
        )?;
        indexer = indexer.with_limits(IndexingLimits::new(policy, Arc::new(EnabledCache::new())));
    }
    supervisors::Supervisor::new(app_config)
        .run_indexing(refs_path, indexer, show_progress)
        .await
}

/// 🚀 The CLI's indexing run: connect, load the records, index the references.
pub async fn run(
    app_config: AppConfig,
    records_path: &Path,
    refs_path: &Path,
    policy: Option<Arc<dyn IndexingPolicy>>,
    show_progress: bool,
) -> Result<IndexingSummary> {
    let backend = connect(&app_config.elasticsearch).await?;
    let store = InMemoryRecordStore::load(records_path).await?;
    info!(records = store.len(), "📦 records loaded");
    index_references(app_config, backend, Arc::new(store), refs_path, policy, show_progress).await
}

/// 🌳 The CLI's repository run: bring one project's repository up to date in
/// the index, remembering how far it got in `status_path`.
///
/// The status file is only rewritten when the run recorded progress.
pub async fn run_repository(
    app_config: AppConfig,
    repository_path: &Path,
    status_path: &Path,
    project_id: u64,
    kind: RepositoryKind,
) -> Result<RepositoryIndexingSummary> {
    let backend = connect(&app_config.elasticsearch).await?;
    let repository = Arc::new(GitRepository::open(repository_path)?);
    let statuses = InMemoryIndexStatusStore::load(status_path).await?;
    // repository objects never touch the record store
    let mut indexer = BulkIndexer::new(
        backend,
        Arc::new(InMemoryRecordStore::new()),
        &app_config.elasticsearch.index_name,
        &app_config.indexer,
    );
    let summary =
        repository::index_repository(&mut indexer, repository, &statuses, project_id, kind, Utc::now()).await?;
    if summary.recorded {
        statuses.save(status_path).await?;
    }
    Ok(summary)
}

/// 🔎 Results for `query`, paged the way the configuration says.
pub fn search_results(
    app_config: &AppConfig,
    backend: Backend,
    query: &str,
    actor: &SearchActor,
    project_scope: ProjectScope,
    policy: &dyn AccessPolicy,
    filters: SearchFilters,
) -> SearchResults {
    SearchResults::new(
        backend,
        &app_config.elasticsearch.index_name,
        query,
        actor,
        project_scope,
        policy,
        filters,
    )
    .with_default_per_page(app_config.search.default_per_page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryBackend;
    use crate::indexer::StaticIndexingPolicy;
    use crate::records::{JsonRecord, RecordKind};
    use crate::search::InMemoryAccessPolicy;
    use serde_json::json;
    use std::io::Write;

    fn store() -> Arc<InMemoryRecordStore> {
        let store = InMemoryRecordStore::new();
        for (id, project_id) in [(1, 7), (2, 8)] {
            store
                .insert(JsonRecord::new(RecordKind::Issue, id, json!({ "title": "bulk issue" })).in_project(project_id))
                .expect("insert issue");
        }
        Arc::new(store)
    }

    fn refs() -> tempfile::NamedTempFile {
        let mut refs = tempfile::NamedTempFile::new().expect("temp refs");
        refs.write_all(b"Issue 1 issue_1 project_7\nIssue 2 issue_2 project_8\n")
            .expect("write refs");
        refs
    }

    #[tokio::test]
    async fn the_one_where_limited_indexing_needs_a_policy() {
        let mut config = AppConfig::default();
        config.indexer.limit_indexing = true;
        let refs = refs();
        let result = index_references(config, InMemoryBackend::new().into(), store(), refs.path(), None, false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn the_one_where_only_enabled_projects_are_searchable_afterwards() -> Result<()> {
        let mut config = AppConfig::default();
        config.indexer.limit_indexing = true;
        config.elasticsearch.index_name = "gitlab-test".to_string();
        let backend = InMemoryBackend::new();
        let refs = refs();
        let policy: Arc<dyn IndexingPolicy> = Arc::new(StaticIndexingPolicy::new([7]));

        let summary =
            index_references(config.clone(), backend.clone().into(), store(), refs.path(), Some(policy), false).await?;
        assert_eq!(summary.processed, 2);
        assert!(summary.failed.is_empty());

        let results = search_results(
            &config,
            backend.into(),
            "bulk",
            &SearchActor::Anonymous,
            ProjectScope::All,
            &InMemoryAccessPolicy::new(),
            SearchFilters::default(),
        );
        assert_eq!(results.issues_count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_run_reads_records_from_disk_and_fails_without_a_cluster() -> Result<()> {
        let mut records = tempfile::NamedTempFile::new()?;
        records.write_all(br#"{"class":"Issue","id":1,"project_id":7,"document":{"title":"x"}}"#)?;
        let mut config = AppConfig::default();
        // nothing listens on port 9 locally
        config.elasticsearch.url = "http://127.0.0.1:9".to_string();
        config.elasticsearch.connect_timeout_secs = 1;
        let refs = refs();

        let summary = run(config, records.path(), refs.path(), None, false).await?;
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed.len(), 2, "transport failures fail every pending reference");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_repository_run_without_a_cluster_keeps_its_status_file_clean() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = git2::Repository::init(dir.path().join("repo"))?;
        let signature = git2::Signature::now("Ada Lovelace", "ada@example.com")?;
        let mut tree = repo.treebuilder(None)?;
        tree.insert("bulk.rb", repo.blob(b"def bulk\nend\n")?, 0o100644)?;
        let tree = repo.find_tree(tree.write()?)?;
        repo.commit(Some("HEAD"), &signature, &signature, "Initial commit", &tree, &[])?;

        let mut config = AppConfig::default();
        config.elasticsearch.url = "http://127.0.0.1:9".to_string();
        config.elasticsearch.connect_timeout_secs = 1;
        let status_path = dir.path().join("statuses.json");

        let summary = run_repository(config, &dir.path().join("repo"), &status_path, 7, RepositoryKind::Code).await?;
        assert_eq!(summary.indexed, 2, "one file, one commit");
        assert_eq!(summary.failed.len(), 2);
        assert!(!summary.recorded);
        assert!(!status_path.exists(), "nothing was indexed, nothing is remembered");
        Ok(())
    }
}
