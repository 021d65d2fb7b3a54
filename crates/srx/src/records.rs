//! 🗂️ Records: the closed registry of things that are allowed into the index.
//!
//! 🎬 *[a Pipeline walks up to the index. the bouncer checks the list. it is not on the list.]*
//!
//! The domain layer (projects, issues, merge requests, the whole relational circus)
//! lives somewhere else. This module is the narrow doorway it talks to us through:
//!
//! - [`RecordKind`]: the registry. A type tag maps to a class name, a document `type`,
//!   a search id prefix, and whether the document is routed under its project.
//!   Unregistered class names get turned away at the door.
//! - [`Record`]: what a live domain object must be able to tell us about itself.
//! - [`Indexable`]: the answer to "what should the index hold for you?"
//!   Either a document, or a polite request to be forgotten.
//! - [`RecordStore`]: primary-key lookup. Returns `None` when the row is gone,
//!   which is a perfectly normal Tuesday, not an error.
//!
//! 🦆 The duck is registered. The duck is always registered.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub mod in_mem;

pub use in_mem::{InMemoryRecordStore, JsonRecord};

/// 🏷️ Every class the indexing pipeline knows how to handle.
///
/// This is the closed tagged-variant registry. If it's not in here, it can't be
/// serialized into a reference, deserialized out of one, or looked up. No reflection.
/// No "let's just try constantize and see". The compiler is the registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Project,
    Issue,
    MergeRequest,
    Note,
    Milestone,
    Snippet,
    User,
    /// 🌳 Repository objects. Indexed from git by [`crate::repository`], never looked up in the record store.
    Commit,
    Blob,
    WikiBlob,
}

impl RecordKind {
    /// 📋 The full roster, in registry order.
    pub const ALL: [RecordKind; 10] = [
        RecordKind::Project,
        RecordKind::Issue,
        RecordKind::MergeRequest,
        RecordKind::Note,
        RecordKind::Milestone,
        RecordKind::Snippet,
        RecordKind::User,
        RecordKind::Commit,
        RecordKind::Blob,
        RecordKind::WikiBlob,
    ];

    /// 🏷️ The class name as it travels inside a serialized reference.
    pub fn class_name(&self) -> &'static str {
        match self {
            RecordKind::Project => "Project",
            RecordKind::Issue => "Issue",
            RecordKind::MergeRequest => "MergeRequest",
            RecordKind::Note => "Note",
            RecordKind::Milestone => "Milestone",
            RecordKind::Snippet => "Snippet",
            RecordKind::User => "User",
            RecordKind::Commit => "Commit",
            RecordKind::Blob => "Blob",
            RecordKind::WikiBlob => "WikiBlob",
        }
    }

    /// 📄 The `type` stamped on indexed documents. Also the search id prefix.
    pub fn doc_type(&self) -> &'static str {
        match self {
            RecordKind::Project => "project",
            RecordKind::Issue => "issue",
            RecordKind::MergeRequest => "merge_request",
            RecordKind::Note => "note",
            RecordKind::Milestone => "milestone",
            RecordKind::Snippet => "snippet",
            RecordKind::User => "user",
            RecordKind::Commit => "commit",
            RecordKind::Blob => "blob",
            RecordKind::WikiBlob => "wiki_blob",
        }
    }

    /// 🔍 Resolve a class name back to a kind. Case sensitive, like the registry office.
    pub fn from_class_name(class_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.class_name() == class_name)
    }

    /// 🪪 `issue_42`, `merge_request_7`, `project_1`. Derived, never stored.
    pub fn search_id(&self, database_id: u64) -> String {
        format!("{}_{}", self.doc_type(), database_id)
    }

    /// 🧭 Child documents share a shard with their project. Users and snippets roam free.
    pub fn routed_by_project(&self) -> bool {
        matches!(
            self,
            RecordKind::Project
                | RecordKind::Issue
                | RecordKind::MergeRequest
                | RecordKind::Note
                | RecordKind::Milestone
                | RecordKind::Commit
                | RecordKind::Blob
                | RecordKind::WikiBlob
        )
    }

    /// 🌳 Lives in a git repository rather than a database table.
    pub fn is_repository_object(&self) -> bool {
        matches!(self, RecordKind::Commit | RecordKind::Blob | RecordKind::WikiBlob)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

/// 🧭 The routing key a child document uses to sit next to its project.
pub fn project_routing(project_id: u64) -> String {
    format!("project_{project_id}")
}

/// 📦 What a record wants the index to hold.
///
/// Used to be an exception thrown from deep inside document serialization.
/// Now it's a value. Values don't unwind your stack. Values are calm.
#[derive(Debug, Clone, PartialEq)]
pub enum Indexable {
    /// ✅ Index (upsert) this document body.
    Document(Value),
    /// 🗑️ "I have moved to a state that excludes me. Please forget me."
    ShouldDelete,
}

/// 🎭 A live domain object, as far as the indexing pipeline cares.
///
/// `indexed_json` returns the three-way outcome: `Ok(Document)`, `Ok(ShouldDelete)`,
/// or `Err(reason)` when the record could not produce a document at all.
pub trait Record: fmt::Debug + Send + Sync {
    /// 🏷️ The class name. Must be registered in [`RecordKind`] to be indexable.
    fn class_name(&self) -> &str;

    /// 🔢 Primary key.
    fn database_id(&self) -> u64;

    /// 📍 The project this record belongs to, if any. Projects answer with their own id.
    fn project_id(&self) -> Option<u64> {
        None
    }

    /// 🪪 The backend's document id. Defaults to `<underscored class>_<id>`.
    fn search_id(&self) -> String {
        match RecordKind::from_class_name(self.class_name()) {
            Some(kind) => kind.search_id(self.database_id()),
            None => format!("{}_{}", underscore(self.class_name()), self.database_id()),
        }
    }

    /// 🧭 Parent routing key, for documents that live under a project.
    fn search_routing_id(&self) -> Option<String> {
        let routed = RecordKind::from_class_name(self.class_name())
            .map(|kind| kind.routed_by_project())
            .unwrap_or(false);
        if routed {
            self.project_id().map(project_routing)
        } else {
            None
        }
    }

    /// 📄 Produce the document body, or ask to be deleted, or fail trying.
    fn indexed_json(&self) -> Result<Indexable>;
}

/// 🗄️ Primary-key lookup against whatever actually owns the rows.
///
/// `Ok(None)` means "that row is gone" (deleted between enqueue and processing).
/// `Err(..)` means the store itself is having a bad day.
#[async_trait]
pub trait RecordStore: fmt::Debug + Send + Sync {
    async fn find(&self, kind: RecordKind, database_id: u64) -> Result<Option<Arc<dyn Record>>>;
}

/// 🐍 `MergeRequest` → `merge_request`. CamelCase goes in, snake_case comes out.
pub(crate) fn underscore(class_name: &str) -> String {
    let mut snake = String::with_capacity(class_name.len() + 4);
    for (i, c) in class_name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                snake.push('_');
            }
            snake.push(c.to_ascii_lowercase());
        } else {
            snake.push(c);
        }
    }
    snake
}
