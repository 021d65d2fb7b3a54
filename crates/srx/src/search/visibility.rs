//! 🔒 Visibility: who gets to see what, expressed as a [`Filter`].
//!
//! The permission questions themselves (is this user an admin in admin mode?
//! which projects can they report on?) belong to the domain layer and arrive
//! through [`AccessPolicy`]. This module only turns the answers into
//! predicates, once per result set, so pages and counts see the same rules.
//!
//! Confidential issues are visible to:
//! - the author
//! - an assignee
//! - members of the issue's project with at least reporter access
//! - an administrator with admin mode switched on
//!
//! Nobody else. Not anonymous visitors, not guests, not that one person who
//! swears they had access last week.

use std::collections::{HashMap, HashSet};

use super::query::Filter;

/// 🎚️ Project access levels, in the order that matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    NoAccess,
    Guest,
    Reporter,
    Developer,
    Maintainer,
    Owner,
}

/// 🙋 Who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchActor {
    Anonymous,
    User { id: u64, admin: bool },
}

impl SearchActor {
    pub fn user(id: u64) -> Self {
        SearchActor::User { id, admin: false }
    }

    pub fn admin(id: u64) -> Self {
        SearchActor::User { id, admin: true }
    }

    pub fn user_id(&self) -> Option<u64> {
        match self {
            SearchActor::Anonymous => None,
            SearchActor::User { id, .. } => Some(*id),
        }
    }
}

/// 📍 The project allowlist, or the "every project" sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectScope {
    All,
    Only(Vec<u64>),
}

/// 🏛️ Permission answers supplied by the domain layer.
pub trait AccessPolicy: std::fmt::Debug + Send + Sync {
    /// Is this user an administrator with an elevated admin session right now?
    fn admin_mode_active(&self, user_id: u64) -> bool;

    /// Projects where the user holds at least `level`.
    fn project_ids_with_min_access(&self, user_id: u64, level: AccessLevel) -> Vec<u64>;
}

/// 🏛️ A policy made of hash maps, for the CLI and for tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAccessPolicy {
    memberships: HashMap<(u64, u64), AccessLevel>,
    admin_sessions: HashSet<u64>,
}

impl InMemoryAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// 👥 Grant `user_id` access `level` on `project_id`.
    pub fn with_member(mut self, user_id: u64, project_id: u64, level: AccessLevel) -> Self {
        self.memberships.insert((user_id, project_id), level);
        self
    }

    /// 🛡️ Switch admin mode on for this user.
    pub fn with_admin_session(mut self, user_id: u64) -> Self {
        self.admin_sessions.insert(user_id);
        self
    }
}

impl AccessPolicy for InMemoryAccessPolicy {
    fn admin_mode_active(&self, user_id: u64) -> bool {
        self.admin_sessions.contains(&user_id)
    }

    fn project_ids_with_min_access(&self, user_id: u64, level: AccessLevel) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .memberships
            .iter()
            .filter(|((member, _), granted)| *member == user_id && **granted >= level)
            .map(|((_, project_id), _)| *project_id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfidentialAccess {
    Everything,
    Restricted {
        user_id: Option<u64>,
        reporter_project_ids: Vec<u64>,
    },
}

/// 🔒 The resolved visibility rules for one result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visibility {
    project_scope: ProjectScope,
    confidential: ConfidentialAccess,
}

impl Visibility {
    /// 🧮 Ask the policy everything we need, once.
    pub fn resolve(actor: &SearchActor, project_scope: ProjectScope, policy: &dyn AccessPolicy) -> Self {
        let confidential = match actor {
            SearchActor::User { id, admin: true } if policy.admin_mode_active(*id) => {
                ConfidentialAccess::Everything
            }
            SearchActor::User { id, .. } => ConfidentialAccess::Restricted {
                user_id: Some(*id),
                reporter_project_ids: policy.project_ids_with_min_access(*id, AccessLevel::Reporter),
            },
            SearchActor::Anonymous => ConfidentialAccess::Restricted {
                user_id: None,
                reporter_project_ids: Vec::new(),
            },
        };
        Self {
            project_scope,
            confidential,
        }
    }

    /// 📍 Restrict `field` to the allowlisted projects.
    pub fn project_filter(&self, field: &str) -> Filter {
        match &self.project_scope {
            ProjectScope::All => Filter::MatchAll,
            ProjectScope::Only(ids) if ids.is_empty() => Filter::MatchNone,
            ProjectScope::Only(ids) => Filter::terms(field, ids.iter().copied()),
        }
    }

    /// 🕵️ Hide confidential documents from people who shouldn't see them.
    pub fn confidentiality_filter(&self) -> Filter {
        match &self.confidential {
            ConfidentialAccess::Everything => Filter::MatchAll,
            ConfidentialAccess::Restricted {
                user_id,
                reporter_project_ids,
            } => {
                let mut allowed = vec![Filter::negate(Filter::term("confidential", true))];
                if let Some(user_id) = user_id {
                    allowed.push(Filter::term("author_id", *user_id));
                    allowed.push(Filter::term("assignee_ids", *user_id));
                }
                if !reporter_project_ids.is_empty() {
                    allowed.push(Filter::terms("project_id", reporter_project_ids.iter().copied()));
                }
                Filter::Or(allowed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secret_issue() -> serde_json::Value {
        json!({
            "type": "issue",
            "project_id": 1,
            "author_id": 10,
            "assignee_ids": [11],
            "confidential": true
        })
    }

    fn policy() -> InMemoryAccessPolicy {
        InMemoryAccessPolicy::new()
            .with_member(12, 1, AccessLevel::Reporter)
            .with_member(13, 1, AccessLevel::Guest)
            .with_admin_session(99)
    }

    fn sees(actor: SearchActor) -> bool {
        Visibility::resolve(&actor, ProjectScope::All, &policy())
            .confidentiality_filter()
            .matches(&secret_issue())
    }

    #[test]
    fn the_one_where_the_secret_stays_with_the_right_people() {
        assert!(sees(SearchActor::user(10)), "author");
        assert!(sees(SearchActor::user(11)), "assignee");
        assert!(sees(SearchActor::user(12)), "reporter");
        assert!(sees(SearchActor::admin(99)), "admin in admin mode");

        assert!(!sees(SearchActor::Anonymous), "anonymous");
        assert!(!sees(SearchActor::user(13)), "guest");
        assert!(!sees(SearchActor::user(14)), "non-member");
        assert!(!sees(SearchActor::admin(98)), "admin without admin mode");
    }

    #[test]
    fn the_one_where_public_issues_are_for_everyone() {
        let public = json!({ "type": "issue", "project_id": 1, "confidential": false });
        let filter = Visibility::resolve(&SearchActor::Anonymous, ProjectScope::All, &policy())
            .confidentiality_filter();
        assert!(filter.matches(&public));
    }

    #[test]
    fn the_one_where_an_empty_allowlist_allows_nothing() {
        let visibility =
            Visibility::resolve(&SearchActor::Anonymous, ProjectScope::Only(vec![]), &policy());
        assert_eq!(visibility.project_filter("project_id"), Filter::MatchNone);
        let visibility =
            Visibility::resolve(&SearchActor::Anonymous, ProjectScope::Only(vec![1, 2]), &policy());
        assert!(visibility.project_filter("project_id").matches(&json!({ "project_id": 2 })));
    }
}
