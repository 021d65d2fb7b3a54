//! 🗂️ Search scopes: which slice of the index a tab on the results page looks at.

use std::fmt;

/// 🗂️ One result tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Projects,
    Issues,
    MergeRequests,
    Milestones,
    Notes,
    Blobs,
    WikiBlobs,
    Commits,
    Users,
}

impl Scope {
    pub const ALL: [Scope; 9] = [
        Scope::Projects,
        Scope::Issues,
        Scope::MergeRequests,
        Scope::Milestones,
        Scope::Notes,
        Scope::Blobs,
        Scope::WikiBlobs,
        Scope::Commits,
        Scope::Users,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Projects => "projects",
            Scope::Issues => "issues",
            Scope::MergeRequests => "merge_requests",
            Scope::Milestones => "milestones",
            Scope::Notes => "notes",
            Scope::Blobs => "blobs",
            Scope::WikiBlobs => "wiki_blobs",
            Scope::Commits => "commits",
            Scope::Users => "users",
        }
    }

    /// 🔤 `"issues"` → `Scope::Issues`. Unknown names are `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|scope| scope.as_str() == name)
    }

    /// Position in [`Scope::ALL`], for per-scope arrays.
    pub(crate) fn index(&self) -> usize {
        *self as usize
    }

    /// 🏷️ The `type` value documents of this scope are stamped with.
    pub fn doc_type(&self) -> &'static str {
        match self {
            Scope::Projects => "project",
            Scope::Issues => "issue",
            Scope::MergeRequests => "merge_request",
            Scope::Milestones => "milestone",
            Scope::Notes => "note",
            Scope::Blobs => "blob",
            Scope::WikiBlobs => "wiki_blob",
            Scope::Commits => "commit",
            Scope::Users => "user",
        }
    }

    /// 🔍 Fields the free-text query runs against.
    pub fn text_fields(&self) -> &'static [&'static str] {
        match self {
            Scope::Projects => &["name", "path", "description"],
            Scope::Issues | Scope::MergeRequests | Scope::Milestones => &["title", "description"],
            Scope::Notes => &["note"],
            Scope::Blobs | Scope::WikiBlobs => &["blob.content", "blob.path"],
            Scope::Commits => &["commit.message", "commit.sha"],
            Scope::Users => &["username", "name"],
        }
    }

    /// ✨ Fields the backend is asked to mark up. Blobs ask for their content so
    /// the snippet parser can find the matched line.
    pub fn highlight_fields(&self) -> &'static [&'static str] {
        match self {
            Scope::Projects => &["name", "description"],
            Scope::Issues | Scope::MergeRequests | Scope::Milestones => &["title", "description"],
            Scope::Notes => &["note"],
            Scope::Blobs | Scope::WikiBlobs => &["blob.content"],
            Scope::Commits | Scope::Users => &[],
        }
    }

    /// ✨ Whether [`highlight_map`](super::SearchResults::highlight_map) has anything to say.
    pub fn supports_highlight(&self) -> bool {
        matches!(
            self,
            Scope::Projects | Scope::Issues | Scope::MergeRequests | Scope::Milestones | Scope::Notes
        )
    }

    /// 📍 The field holding the owning project, or `None` for global documents.
    pub fn project_field(&self) -> Option<&'static str> {
        match self {
            Scope::Projects => Some("id"),
            Scope::Users => None,
            _ => Some("project_id"),
        }
    }

    /// 🕵️ Scopes whose documents can be confidential.
    pub fn has_confidentiality(&self) -> bool {
        matches!(self, Scope::Issues | Scope::Notes)
    }

    /// 🚦 Scopes that understand the `state` filter.
    pub fn has_state(&self) -> bool {
        matches!(self, Scope::Issues | Scope::MergeRequests | Scope::Milestones)
    }

    /// 📜 Scopes whose hits are files, rendered as snippets.
    pub fn is_blob(&self) -> bool {
        matches!(self, Scope::Blobs | Scope::WikiBlobs)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
