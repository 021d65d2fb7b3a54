//! 🧭 Index status: how far into a repository's history the index has read.
//!
//! Repositories are indexed incrementally. Each successful run records the commit
//! it indexed up to; the next run only looks at what changed since then. Unless
//! history was rewritten under us (force push), in which case the old commit is
//! no longer an ancestor of the new head and the only honest answer is to start over.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// 📌 The last successful indexing run of one project's repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub project_id: u64,
    pub last_commit: String,
    pub indexed_at: DateTime<Utc>,
}

/// 🗄️ Where index statuses live.
pub trait IndexStatusStore: std::fmt::Debug + Send + Sync {
    fn get(&self, project_id: u64) -> Option<IndexStatus>;

    fn record(&self, status: IndexStatus);

    /// Forget a project, e.g. after its documents were purged. `true` if it was known.
    fn remove(&self, project_id: u64) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryIndexStatusStore {
    statuses: DashMap<u64, IndexStatus>,
}

impl InMemoryIndexStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📥 Statuses written by [`save`](Self::save). No file yet means nothing indexed yet.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("💀 Could not read index statuses from '{}'.", path.display()));
            }
        };
        let statuses: Vec<IndexStatus> = serde_json::from_slice(&bytes)
            .with_context(|| format!("💀 '{}' does not hold index statuses.", path.display()))?;
        let store = Self::new();
        for status in statuses {
            store.record(status);
        }
        Ok(store)
    }

    /// 💾 Write every status to `path` as a JSON array, ordered by project.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let mut statuses: Vec<IndexStatus> = self.statuses.iter().map(|entry| entry.value().clone()).collect();
        statuses.sort_by_key(|status| status.project_id);
        let json = serde_json::to_vec_pretty(&statuses).context("💀 Index statuses refused to become JSON.")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("💀 Could not write index statuses to '{}'.", path.display()))
    }
}

impl IndexStatusStore for InMemoryIndexStatusStore {
    fn get(&self, project_id: u64) -> Option<IndexStatus> {
        self.statuses.get(&project_id).map(|status| status.clone())
    }

    fn record(&self, status: IndexStatus) {
        self.statuses.insert(status.project_id, status);
    }

    fn remove(&self, project_id: u64) -> bool {
        self.statuses.remove(&project_id).is_some()
    }
}

/// 🌳 Just enough of git to ask "is this commit still in the history of that one?"
pub trait CommitGraph: std::fmt::Debug + Send + Sync {
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool;
}

/// 🌳 Commit → parents, for tests and fixtures.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCommitGraph {
    parents: HashMap<String, Vec<String>>,
}

impl InMemoryCommitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commit(mut self, sha: &str, parents: &[&str]) -> Self {
        self.parents
            .insert(sha.to_string(), parents.iter().map(|parent| parent.to_string()).collect());
        self
    }
}

impl CommitGraph for InMemoryCommitGraph {
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([descendant]);
        while let Some(sha) = queue.pop_front() {
            if sha == ancestor {
                return true;
            }
            if !seen.insert(sha) {
                continue;
            }
            if let Some(parents) = self.parents.get(sha) {
                queue.extend(parents.iter().map(String::as_str));
            }
        }
        false
    }
}

/// 🗺️ What the next run has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexPlan {
    /// The index already reflects `head`.
    UpToDate,
    /// Only the changes in `from..to`.
    Incremental { from: String, to: String },
    /// Everything reachable from `to`. First run, or history was rewritten.
    Full { to: String },
    /// The repository is empty now; whatever was indexed should go.
    Purge,
}

/// 🗺️ Decide the next run for `project_id` given the repository's current head.
pub fn plan(
    store: &dyn IndexStatusStore,
    graph: &dyn CommitGraph,
    project_id: u64,
    head: Option<&str>,
) -> IndexPlan {
    let status = store.get(project_id);
    let Some(head) = head else {
        return match status {
            Some(_) => IndexPlan::Purge,
            None => IndexPlan::UpToDate,
        };
    };
    let Some(status) = status else {
        debug!(project_id, head, "🧭 never indexed, starting from scratch");
        return IndexPlan::Full { to: head.to_string() };
    };

    if status.last_commit == head {
        IndexPlan::UpToDate
    } else if graph.is_ancestor(&status.last_commit, head) {
        IndexPlan::Incremental {
            from: status.last_commit,
            to: head.to_string(),
        }
    } else {
        info!(
            project_id,
            last_commit = %status.last_commit,
            head,
            "🧭 last indexed commit is gone from history (force push?), reindexing everything"
        );
        IndexPlan::Full { to: head.to_string() }
    }
}

/// ✅ Remember a successful run. A purge forgets the project instead.
pub fn record_success(store: &dyn IndexStatusStore, project_id: u64, plan: &IndexPlan, at: DateTime<Utc>) {
    match plan {
        IndexPlan::UpToDate => {}
        IndexPlan::Purge => {
            store.remove(project_id);
        }
        IndexPlan::Incremental { to, .. } | IndexPlan::Full { to } => store.record(IndexStatus {
            project_id,
            last_commit: to.clone(),
            indexed_at: at,
        }),
    }
}
