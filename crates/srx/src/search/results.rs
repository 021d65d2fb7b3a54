//! 🔎 Search results: one query, nine tabs, and no counting anything twice.
//!
//! 🎬 *[a user types "bulk" and hits enter. nine tabs light up with numbers.]*
//! *[behind each number, a query. behind each query, a permission check.]*
//!
//! [`SearchResults`] is built per request. Every scope's predicate comes from one
//! place ([`SearchResults::scope_filter`]) so a page and a count for the same scope
//! are the same question asked two ways. Counts are lazy and memoized for the life
//! of the instance; fetching a page also fills in that scope's count for free.
//!
//! A blank query is not an error, it's nine empty tabs and zero round trips.
//! A backend that can't be reached *is* an error: "no results" and "search is down"
//! must never look the same to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::backends::{Backend, SearchBackend};
use crate::progress::format_number;

use super::blob::{FoundBlob, parse_search_result};
use super::highlight::Highlighted;
use super::pagination::{PageRequest, PaginatedCollection};
use super::query::{Filter, HighlightSpec, SearchHit, SearchRequest, SearchResponse, Sort};
use super::scope::Scope;
use super::visibility::{AccessPolicy, ProjectScope, SearchActor, Visibility};

/// 📏 Deepest `from + size` the backend will page to.
pub const MAX_RESULT_WINDOW: usize = 10_000;

/// 🎛️ Optional narrowing applied on top of the query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    /// `opened`, `closed`, `merged`... `all` (or nothing) means no filter.
    pub state: Option<String>,
    /// Issues only.
    pub confidential: Option<bool>,
    pub sort: Option<Sort>,
}

/// 📄 A non-file hit: its parsed `_source` plus identity and score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchDocument {
    pub id: Option<u64>,
    pub search_id: String,
    pub score: Option<f64>,
    pub source: Value,
}

/// 🎯 One item on a results page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SearchObject {
    Document(SearchDocument),
    Blob(FoundBlob),
}

impl SearchObject {
    pub fn id(&self) -> Option<u64> {
        match self {
            SearchObject::Document(document) => document.id,
            SearchObject::Blob(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct PageMemo {
    responses: HashMap<(Scope, PageRequest), Arc<SearchResponse>>,
    last_requested: HashMap<Scope, PageRequest>,
}

/// 🔎 The outcome of one query across every scope.
#[derive(Debug)]
pub struct SearchResults {
    backend: Backend,
    index_name: String,
    query: String,
    visibility: Visibility,
    filters: SearchFilters,
    default_per_page: usize,
    counts: [OnceCell<u64>; Scope::COUNT],
    pages: Mutex<PageMemo>,
}

impl SearchResults {
    /// 🏗️ Resolve visibility once and get ready to answer.
    pub fn new(
        backend: Backend,
        index_name: impl Into<String>,
        query: impl Into<String>,
        actor: &SearchActor,
        project_scope: ProjectScope,
        policy: &dyn AccessPolicy,
        filters: SearchFilters,
    ) -> Self {
        Self {
            backend,
            index_name: index_name.into(),
            query: query.into(),
            visibility: Visibility::resolve(actor, project_scope, policy),
            filters,
            default_per_page: 20,
            counts: std::array::from_fn(|_| OnceCell::new()),
            pages: Mutex::new(PageMemo::default()),
        }
    }

    /// Page size used when a scope is inspected before any page was requested.
    pub fn with_default_per_page(mut self, per_page: usize) -> Self {
        self.default_per_page = per_page;
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    fn is_blank(&self) -> bool {
        self.query.trim().is_empty()
    }

    /// 🧮 The one predicate behind both pages and counts for `scope`.
    pub fn scope_filter(&self, scope: Scope) -> Filter {
        let mut clauses = vec![
            Filter::term("type", scope.doc_type()),
            Filter::text(scope.text_fields(), self.query.trim()),
        ];
        if let Some(field) = scope.project_field() {
            clauses.push(self.visibility.project_filter(field));
        }
        if scope.has_confidentiality() {
            clauses.push(self.visibility.confidentiality_filter());
        }
        if scope.has_state()
            && let Some(state) = self.filters.state.as_deref().filter(|state| !state.is_empty() && *state != "all")
        {
            clauses.push(Filter::term("state", state));
        }
        if scope == Scope::Issues
            && let Some(confidential) = self.filters.confidential
        {
            clauses.push(Filter::term("confidential", confidential));
        }
        Filter::And(clauses)
    }

    fn request(&self, scope: Scope, from: usize, size: usize) -> SearchRequest {
        let highlight_fields = scope.highlight_fields();
        SearchRequest {
            index: self.index_name.clone(),
            filter: self.scope_filter(scope),
            sort: self.filters.sort.clone(),
            from,
            size,
            highlight: (!highlight_fields.is_empty()).then(|| HighlightSpec {
                fields: highlight_fields.iter().map(|field| field.to_string()).collect(),
            }),
        }
    }

    async fn page_response(&self, scope: Scope, page: PageRequest) -> Result<Arc<SearchResponse>> {
        {
            let mut memo = self.pages.lock().await;
            memo.last_requested.insert(scope, page);
            if let Some(response) = memo.responses.get(&(scope, page)) {
                return Ok(response.clone());
            }
        }

        let request = self.request(scope, page.offset(), page.per_page);
        let response = Arc::new(self.backend.search(&request).await?);
        // 🎁 the page already knows the total, the count gets it for free
        let _ = self.counts[scope.index()].set(response.total);
        self.pages
            .lock()
            .await
            .responses
            .insert((scope, page), response.clone());
        Ok(response)
    }

    /// 📚 One page of `scope`. Pages past the end come back empty, with the real total.
    pub async fn objects(&self, scope: Scope, page: PageRequest) -> Result<PaginatedCollection<SearchObject>> {
        if self.is_blank() {
            return Ok(PaginatedCollection::empty(page, 0));
        }
        if page.offset().saturating_add(page.per_page) > MAX_RESULT_WINDOW {
            debug!(%scope, page = page.page, "📏 page is beyond the result window, answering with the total only");
            let total = self.count(scope).await?;
            return Ok(PaginatedCollection::empty(page, total));
        }

        let response = self.page_response(scope, page).await?;
        let items = response
            .hits
            .iter()
            .map(|hit| to_object(scope, hit))
            .collect::<Result<Vec<_>>>()?;
        Ok(PaginatedCollection::new(items, page, response.total))
    }

    /// 🔢 How many documents `scope` matches. Asked at most once per instance.
    pub async fn count(&self, scope: Scope) -> Result<u64> {
        if self.is_blank() {
            return Ok(0);
        }
        let count = self.counts[scope.index()]
            .get_or_try_init(|| async {
                let request = self.request(scope, 0, 0);
                self.backend.count(&request).await
            })
            .await?;
        Ok(*count)
    }

    /// 🔢 Several counts at once, concurrently. Same order as `scopes`.
    pub async fn counts(&self, scopes: &[Scope]) -> Result<Vec<(Scope, u64)>> {
        try_join_all(scopes.iter().map(|&scope| async move {
            let count = self.count(scope).await?;
            Ok::<_, anyhow::Error>((scope, count))
        }))
        .await
    }

    pub async fn projects_count(&self) -> Result<u64> {
        self.count(Scope::Projects).await
    }

    pub async fn issues_count(&self) -> Result<u64> {
        self.count(Scope::Issues).await
    }

    pub async fn merge_requests_count(&self) -> Result<u64> {
        self.count(Scope::MergeRequests).await
    }

    pub async fn milestones_count(&self) -> Result<u64> {
        self.count(Scope::Milestones).await
    }

    pub async fn notes_count(&self) -> Result<u64> {
        self.count(Scope::Notes).await
    }

    pub async fn blobs_count(&self) -> Result<u64> {
        self.count(Scope::Blobs).await
    }

    pub async fn wiki_blobs_count(&self) -> Result<u64> {
        self.count(Scope::WikiBlobs).await
    }

    pub async fn commits_count(&self) -> Result<u64> {
        self.count(Scope::Commits).await
    }

    pub async fn users_count(&self) -> Result<u64> {
        self.count(Scope::Users).await
    }

    /// ✨ Object id → highlighted HTML, for the most recently requested page of `scope`
    /// (page one if none was requested yet). `None` for scopes that don't highlight.
    ///
    /// When several fields were marked, the first field in the scope's highlight
    /// order wins.
    pub async fn highlight_map(&self, scope: Scope) -> Result<Option<HashMap<u64, String>>> {
        if !scope.supports_highlight() {
            return Ok(None);
        }
        if self.is_blank() {
            return Ok(Some(HashMap::new()));
        }
        let last_requested = self.pages.lock().await.last_requested.get(&scope).copied();
        let page = last_requested.unwrap_or_else(|| PageRequest::new(1, self.default_per_page));
        if page.offset().saturating_add(page.per_page) > MAX_RESULT_WINDOW {
            return Ok(Some(HashMap::new()));
        }
        let response = self.page_response(scope, page).await?;

        let mut map = HashMap::new();
        for hit in &response.hits {
            let Some(id) = hit.source.get("id").and_then(Value::as_u64) else {
                continue;
            };
            let fragment = scope
                .highlight_fields()
                .iter()
                .find_map(|field| hit.highlight.get(*field).and_then(|fragments| fragments.first()));
            if let Some(fragment) = fragment {
                map.insert(id, Highlighted::parse(fragment).to_html());
            }
        }
        Ok(Some(map))
    }

    /// 🔢 `"1,234"`. `None` for a scope name nobody recognizes.
    pub async fn formatted_count(&self, scope_name: &str) -> Result<Option<String>> {
        let Some(scope) = Scope::parse(scope_name) else {
            return Ok(None);
        };
        Ok(Some(format_number(self.count(scope).await?)))
    }
}

fn to_object(scope: Scope, hit: &SearchHit) -> Result<SearchObject> {
    if scope.is_blob() {
        return Ok(SearchObject::Blob(parse_search_result(hit, None)?));
    }
    Ok(SearchObject::Document(SearchDocument {
        id: hit.source.get("id").and_then(Value::as_u64),
        search_id: hit.id.clone(),
        score: hit.score,
        source: hit.source.clone(),
    }))
}
