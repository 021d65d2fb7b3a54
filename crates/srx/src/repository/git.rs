//! 🌳 A real git repository on disk, read through libgit2.
//!
//! 🎬 *[somewhere, a `.git` directory. it has seen things. merges. reverts. a 400MB video someone committed in 2016.]*
//!
//! libgit2 handles are `Send` but not `Sync`, so the handle sits behind a mutex.
//! Every call blocks; [`index_repository`](super::index_repository) runs them on
//! tokio's blocking pool. Binary and non UTF-8 files are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use git2::{ErrorCode, ObjectType, Oid, TreeWalkMode, TreeWalkResult};
use tracing::{debug, warn};

use super::{CommitInfo, Repository};
use crate::index_status::CommitGraph;

pub struct GitRepository {
    path: PathBuf,
    repo: Mutex<git2::Repository>,
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository").field("path", &self.path).finish()
    }
}

impl GitRepository {
    /// 📂 Open the repository at `path` (work tree or bare).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let repo = git2::Repository::open(&path)
            .with_context(|| format!("💀 '{}' is not a git repository. Or it is, and libgit2 disagrees.", path.display()))?;
        debug!(path = %path.display(), "🌳 git repository opened");
        Ok(Self {
            path,
            repo: Mutex::new(repo),
        })
    }

    fn with_repo<T>(&self, read: impl FnOnce(&git2::Repository) -> Result<T>) -> Result<T> {
        let repo = self
            .repo
            .lock()
            .map_err(|_| anyhow!("💀 A git reader panicked while holding the repository."))?;
        read(&repo)
    }
}

fn oid(sha: &str) -> Result<Oid> {
    Oid::from_str(sha).with_context(|| format!("💀 '{sha}' is not a commit id."))
}

fn commit_info(commit: &git2::Commit<'_>) -> CommitInfo {
    let author = commit.author();
    CommitInfo {
        sha: commit.id().to_string(),
        message: commit.message().unwrap_or_default().to_string(),
        author_name: author.name().unwrap_or_default().to_string(),
        committed_at: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
    }
}

impl CommitGraph for GitRepository {
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        let answer = self.with_repo(|repo| {
            let (ancestor, descendant) = (oid(ancestor)?, oid(descendant)?);
            Ok(ancestor == descendant || repo.graph_descendant_of(descendant, ancestor)?)
        });
        answer.unwrap_or_else(|err| {
            // an unknown commit is not an ancestor: history was rewritten or gc'd
            debug!(ancestor, descendant, %err, "🌳 ancestry check failed");
            false
        })
    }
}

impl Repository for GitRepository {
    fn head(&self) -> Result<Option<String>> {
        self.with_repo(|repo| match repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?.id().to_string())),
            Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
            Err(err) => Err(err).context("💀 HEAD is unreadable."),
        })
    }

    fn tree(&self, sha: &str) -> Result<BTreeMap<String, String>> {
        self.with_repo(|repo| {
            let tree = repo.find_commit(oid(sha)?)?.tree()?;
            let mut files = BTreeMap::new();
            let mut failure = None;
            let walked = tree.walk(TreeWalkMode::PreOrder, |root, entry| {
                if entry.kind() != Some(ObjectType::Blob) {
                    return TreeWalkResult::Ok;
                }
                let Some(name) = entry.name() else {
                    return TreeWalkResult::Ok;
                };
                let path = format!("{root}{name}");
                match repo.find_blob(entry.id()) {
                    Ok(blob) if blob.is_binary() => {}
                    Ok(blob) => match std::str::from_utf8(blob.content()) {
                        Ok(text) => {
                            files.insert(path, text.to_string());
                        }
                        Err(_) => warn!(path, "🌳 not UTF-8, skipped"),
                    },
                    Err(err) => {
                        failure = Some(err);
                        return TreeWalkResult::Abort;
                    }
                }
                TreeWalkResult::Ok
            });
            if let Some(err) = failure {
                return Err(err).with_context(|| format!("💀 A blob under {sha} is missing."));
            }
            walked?;
            Ok(files)
        })
    }

    fn commits_between(&self, from: Option<&str>, to: &str) -> Result<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            let mut walk = repo.revwalk()?;
            walk.push(oid(to)?)?;
            if let Some(from) = from {
                walk.hide(oid(from)?)?;
            }
            walk.map(|id| -> Result<CommitInfo> { Ok(commit_info(&repo.find_commit(id?)?)) })
                .collect()
        })
    }
}
