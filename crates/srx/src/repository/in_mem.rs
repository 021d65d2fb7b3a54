//! # Meanwhile, in a repository that fits in a HashMap...
//!
//! 🎬 No disk, no packfiles, no `.git` directory to forget to clean up. Commits
//! are full snapshots of their tree, which is wasteful and exactly what a test wants.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};

use super::{CommitInfo, Repository};
use crate::index_status::{CommitGraph, InMemoryCommitGraph};

const FIRST_COMMIT_AT: i64 = 1_700_000_000;

#[derive(Debug, Clone)]
struct StoredCommit {
    info: CommitInfo,
    parents: Vec<String>,
    tree: BTreeMap<String, String>,
}

/// 🌳 A repository for fixtures: commits by hand, head wherever you point it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    graph: InMemoryCommitGraph,
    commits: HashMap<String, StoredCommit>,
    head: Option<String>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// ➕ Add a commit whose tree is exactly `files`, and move head to it.
    pub fn commit(mut self, sha: &str, parents: &[&str], message: &str, files: &[(&str, &str)]) -> Self {
        let minutes = self.commits.len() as i64;
        let info = CommitInfo {
            sha: sha.to_string(),
            message: message.to_string(),
            author_name: "Ada Lovelace".to_string(),
            committed_at: DateTime::<Utc>::from_timestamp(FIRST_COMMIT_AT + minutes * 60, 0).unwrap_or_default(),
        };
        self.graph = self.graph.with_commit(sha, parents);
        self.commits.insert(
            sha.to_string(),
            StoredCommit {
                info,
                parents: parents.iter().map(|parent| parent.to_string()).collect(),
                tree: files
                    .iter()
                    .map(|(path, content)| (path.to_string(), content.to_string()))
                    .collect(),
            },
        );
        self.head = Some(sha.to_string());
        self
    }

    /// 🎯 Point head somewhere else. `None` is an emptied repository.
    pub fn with_head(mut self, sha: Option<&str>) -> Self {
        self.head = sha.map(str::to_string);
        self
    }

    fn stored(&self, sha: &str) -> Result<&StoredCommit> {
        match self.commits.get(sha) {
            Some(commit) => Ok(commit),
            None => bail!("💀 No commit '{sha}' in this repository."),
        }
    }

    fn reachable(&self, from: &str) -> Result<Vec<&StoredCommit>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        let mut reached = Vec::new();
        while let Some(sha) = queue.pop_front() {
            if !seen.insert(sha) {
                continue;
            }
            let commit = self.stored(sha)?;
            queue.extend(commit.parents.iter().map(String::as_str));
            reached.push(commit);
        }
        Ok(reached)
    }
}

impl CommitGraph for InMemoryRepository {
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        self.graph.is_ancestor(ancestor, descendant)
    }
}

impl Repository for InMemoryRepository {
    fn head(&self) -> Result<Option<String>> {
        Ok(self.head.clone())
    }

    fn tree(&self, sha: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.stored(sha)?.tree.clone())
    }

    fn commits_between(&self, from: Option<&str>, to: &str) -> Result<Vec<CommitInfo>> {
        let hidden: HashSet<&str> = match from {
            Some(from) => self.reachable(from)?.into_iter().map(|commit| commit.info.sha.as_str()).collect(),
            None => HashSet::new(),
        };
        let mut commits: Vec<CommitInfo> = self
            .reachable(to)?
            .into_iter()
            .filter(|commit| !hidden.contains(commit.info.sha.as_str()))
            .map(|commit| commit.info.clone())
            .collect();
        commits.sort_by(|left, right| right.committed_at.cmp(&left.committed_at));
        Ok(commits)
    }
}
