//! 🌳 Repository indexing: files, wiki pages and commits, one history step at a time.
//!
//! 🎬 *[a force push lands at 4:59pm on a friday. the index still believes in the old history.]*
//!
//! Database records travel as references. Repository objects don't: they come
//! straight out of git. One run for one project goes like this:
//!
//! 1. [`plan`](crate::index_status::plan) compares the repository head with the
//!    last indexed commit: up to date, incremental, full, or purge.
//! 2. [`collect_changes`] diffs the last indexed tree against the target tree and
//!    lists the commits that appeared (or, after a rewrite, disappeared).
//! 3. Every change becomes a bulk operation on the shared [`BulkIndexer`].
//! 4. One flush. Only a flush with zero failures moves the index status forward,
//!    so a failed run is simply planned again next time.
//!
//! Code and wiki repositories are indexed separately, each with its own status store.

pub mod git;
pub mod in_mem;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::document_reference::DocumentReference;
use crate::index_status::{CommitGraph, IndexPlan, IndexStatusStore, plan, record_success};
use crate::indexer::{BulkIndexer, BulkOperation};
use crate::records::RecordKind;

pub use git::GitRepository;
pub use in_mem::InMemoryRepository;

/// 🌳 Which of a project's repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryKind {
    Code,
    Wiki,
}

impl RepositoryKind {
    /// 📄 The kind of document each file becomes.
    pub fn file_kind(&self) -> RecordKind {
        match self {
            RepositoryKind::Code => RecordKind::Blob,
            RepositoryKind::Wiki => RecordKind::WikiBlob,
        }
    }

    /// Wiki history is not searchable; code history is.
    pub fn indexes_commits(&self) -> bool {
        matches!(self, RepositoryKind::Code)
    }
}

/// 📜 A commit, as much of it as search cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub committed_at: DateTime<Utc>,
}

/// 🌳 Read access to one git repository.
pub trait Repository: CommitGraph {
    /// The commit the default branch points at. `Ok(None)` for an empty repository.
    fn head(&self) -> Result<Option<String>>;

    /// Every text file at `sha`: path → content.
    fn tree(&self, sha: &str) -> Result<BTreeMap<String, String>>;

    /// Commits reachable from `to` but not from `from`, newest first.
    /// `from = None` means all of `to`'s history.
    fn commits_between(&self, from: Option<&str>, to: &str) -> Result<Vec<CommitInfo>>;
}

/// 📝 Everything one run has to write or remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryChanges {
    /// The commit the files are indexed at. `None` for a purge.
    pub target: Option<String>,
    /// Files to (re)index: path → content.
    pub files: BTreeMap<String, String>,
    pub removed_files: Vec<String>,
    pub commits: Vec<CommitInfo>,
    pub removed_commits: Vec<String>,
}

/// 🔍 Turn a plan into concrete changes.
///
/// `previous` is the last indexed commit. Its tree is the baseline for the diff
/// when the repository still has it; when it doesn't, nothing is removed and a
/// warning says so.
pub fn collect_changes<R: Repository + ?Sized>(
    repository: &R,
    plan: &IndexPlan,
    previous: Option<&str>,
    kind: RepositoryKind,
) -> Result<RepositoryChanges> {
    let mut changes = RepositoryChanges::default();
    let (target, from) = match plan {
        IndexPlan::UpToDate => return Ok(changes),
        IndexPlan::Incremental { from, to } => (Some(to.as_str()), Some(from.as_str())),
        IndexPlan::Full { to } => (Some(to.as_str()), None),
        IndexPlan::Purge => (None, None),
    };
    changes.target = target.map(str::to_string);

    let old_tree = match previous {
        None => BTreeMap::new(),
        Some(sha) => repository.tree(sha).unwrap_or_else(|err| {
            warn!(sha, %err, "🌳 last indexed tree is unreadable, stale files may stay indexed");
            BTreeMap::new()
        }),
    };
    let new_tree = match target {
        Some(sha) => repository
            .tree(sha)
            .with_context(|| format!("💀 Could not read the tree at {sha}."))?,
        None => BTreeMap::new(),
    };

    let reindex_everything = matches!(plan, IndexPlan::Full { .. });
    changes.removed_files = old_tree
        .keys()
        .filter(|path| !new_tree.contains_key(*path))
        .cloned()
        .collect();
    changes.files = new_tree
        .into_iter()
        .filter(|(path, content)| reindex_everything || old_tree.get(path) != Some(content))
        .collect();

    if kind.indexes_commits() {
        if let Some(to) = target {
            changes.commits = repository.commits_between(from, to)?;
        }
        // commits only the old history knew about: rewritten away, or purged
        if let Some(old) = previous
            && !matches!(plan, IndexPlan::Incremental { .. })
        {
            match repository.commits_between(target, old) {
                Ok(gone) => changes.removed_commits = gone.into_iter().map(|commit| commit.sha).collect(),
                Err(err) => warn!(old, %err, "🌳 old history is unreadable, its commits stay indexed"),
            }
        }
    }
    Ok(changes)
}

/// 📋 What a repository run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryIndexingSummary {
    pub plan: IndexPlan,
    pub indexed: usize,
    pub deleted: usize,
    pub failed: Vec<DocumentReference>,
    /// The index status moved forward. Only after a flush without failures.
    pub recorded: bool,
}

/// 🌳 Bring the index in line with `repository`'s head for `project_id`.
///
/// Git work runs on the blocking pool. Errors come from git or the plan itself;
/// bulk failures land in the summary and leave the status untouched.
pub async fn index_repository<R: Repository + 'static>(
    indexer: &mut BulkIndexer,
    repository: Arc<R>,
    statuses: &dyn IndexStatusStore,
    project_id: u64,
    kind: RepositoryKind,
    now: DateTime<Utc>,
) -> Result<RepositoryIndexingSummary> {
    let head = repository.head().context("💀 Could not read the repository head.")?;
    let plan = plan(statuses, repository.as_ref(), project_id, head.as_deref());
    let mut summary = RepositoryIndexingSummary {
        plan: plan.clone(),
        indexed: 0,
        deleted: 0,
        failed: Vec::new(),
        recorded: false,
    };
    if plan == IndexPlan::UpToDate {
        debug!(project_id, "🌳 repository already indexed at its head");
        return Ok(summary);
    }

    let previous = statuses.get(project_id).map(|status| status.last_commit);
    let changes = {
        let repository = repository.clone();
        let plan = plan.clone();
        tokio::task::spawn_blocking(move || collect_changes(repository.as_ref(), &plan, previous.as_deref(), kind))
            .await
            .context("💀 The git worker panicked.")??
    };
    info!(
        project_id,
        ?plan,
        files = changes.files.len(),
        removed_files = changes.removed_files.len(),
        commits = changes.commits.len(),
        removed_commits = changes.removed_commits.len(),
        "🌳 repository changes collected"
    );

    let index = indexer.index_name().to_string();
    let file_kind = kind.file_kind();
    let commit_sha = changes.target.as_deref().unwrap_or_default();
    for (path, content) in &changes.files {
        let reference = DocumentReference::repository_object(file_kind, project_id, path);
        let document = json!({
            "type": file_kind.doc_type(),
            "project_id": project_id,
            "blob": {
                "path": path,
                "file_name": file_name(path),
                "content": content,
                "commit_sha": commit_sha,
            },
        });
        indexer.submit(BulkOperation::index(&index, reference, &document)?).await;
        summary.indexed += 1;
    }
    for commit in &changes.commits {
        let reference = DocumentReference::repository_object(RecordKind::Commit, project_id, &commit.sha);
        let document = json!({
            "type": RecordKind::Commit.doc_type(),
            "project_id": project_id,
            "commit": {
                "sha": commit.sha,
                "message": commit.message,
                "author": { "name": commit.author_name },
                "committed_date": commit.committed_at.to_rfc3339(),
            },
        });
        indexer.submit(BulkOperation::index(&index, reference, &document)?).await;
        summary.indexed += 1;
    }
    let removals = changes
        .removed_files
        .iter()
        .map(|path| DocumentReference::repository_object(file_kind, project_id, path))
        .chain(
            changes
                .removed_commits
                .iter()
                .map(|sha| DocumentReference::repository_object(RecordKind::Commit, project_id, sha)),
        );
    for reference in removals {
        indexer.submit(BulkOperation::delete(&index, reference)?).await;
        summary.deleted += 1;
    }

    summary.failed = indexer.flush().await;
    if summary.failed.is_empty() {
        record_success(statuses, project_id, &plan, now);
        summary.recorded = true;
    } else {
        warn!(
            project_id,
            failed = summary.failed.len(),
            "🌳 some repository documents failed, the index status stays where it was"
        );
    }
    Ok(summary)
}

/// `docs/read me.md` → `read me.md`.
fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
