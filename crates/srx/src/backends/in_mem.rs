//! # Previously, on srx...
//!
//! 🎬 The cluster was down for maintenance. The tests still had to run. So we
//! built a backend so simple it lives entirely in RAM, gone the moment you blink.
//!
//! [`InMemoryBackend`] applies real `_bulk` bodies (the exact NDJSON the indexer
//! would send over the wire), stores the documents, and answers searches by
//! evaluating the same [`Filter`](crate::search::Filter) the cluster would get as
//! DSL. Highlights are produced with the same markers a cluster inserts.
//!
//! It also keeps receipts: every bulk body it saw, how many searches and counts
//! it answered. And it can misbehave on cue (fail the next bulk, reject specific
//! ids, or go completely dark), because the interesting tests are about failure.
//!
//! ⚠️ This is NOT for production. If you're deploying this to prod, please also
//! deploy a therapist.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::backends::SearchBackend;
use crate::indexer::{BulkItemResult, BulkResponse};
use crate::search::highlight::mark_tokens;
use crate::search::query::{lookup, query_tokens};
use crate::search::{Filter, SearchHit, SearchRequest, SearchResponse};

#[derive(Debug, Clone, PartialEq)]
struct StoredDocument {
    /// Insertion order, standing in for relevance when no sort is requested.
    seq: u64,
    routing: Option<String>,
    source: Value,
}

#[derive(Debug, Default)]
struct InMemoryState {
    documents: HashMap<(String, String), StoredDocument>,
    next_seq: u64,
    bulk_bodies: Vec<String>,
    search_calls: usize,
    count_calls: usize,
    fail_next_bulk: Option<String>,
    rejected_ids: HashSet<String>,
    unavailable: bool,
}

/// 🧪 A cluster impersonator. Clones share the same documents and receipts.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🌱 Put a document straight into an index, no bulk body required.
    pub async fn index_document(&self, index: &str, id: &str, routing: Option<&str>, source: Value) {
        let mut state = self.state.lock().await;
        state.upsert(index, id, routing.map(str::to_string), source);
    }

    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state
            .documents
            .get(&(index.to_string(), id.to_string()))
            .map(|stored| stored.source.clone())
    }

    pub async fn routing(&self, index: &str, id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .documents
            .get(&(index.to_string(), id.to_string()))
            .and_then(|stored| stored.routing.clone())
    }

    pub async fn document_count(&self) -> usize {
        self.state.lock().await.documents.len()
    }

    /// 🧾 Every bulk body received so far, failed ones included.
    pub async fn bulk_bodies(&self) -> Vec<String> {
        self.state.lock().await.bulk_bodies.clone()
    }

    pub async fn search_calls(&self) -> usize {
        self.state.lock().await.search_calls
    }

    pub async fn count_calls(&self) -> usize {
        self.state.lock().await.count_calls
    }

    /// 💥 The next bulk call fails at the transport level with `reason`.
    pub async fn fail_next_bulk(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_next_bulk = Some(reason.into());
    }

    /// 🚫 Items with this document id come back with a per-item error.
    pub async fn reject_id(&self, id: impl Into<String>) {
        self.state.lock().await.rejected_ids.insert(id.into());
    }

    /// 🔌 Pull the plug (or plug it back in). Every call fails while unavailable.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    fn matching<'a>(state: &'a InMemoryState, request: &SearchRequest) -> Vec<(&'a String, &'a StoredDocument)> {
        let mut matched: Vec<(&String, &StoredDocument)> = state
            .documents
            .iter()
            .filter(|((index, _), stored)| *index == request.index && request.filter.matches(&stored.source))
            .map(|((_, id), stored)| (id, stored))
            .collect();
        matched.sort_by_key(|(_, stored)| stored.seq);
        if let Some(sort) = &request.sort {
            // stable, so ties keep insertion order
            matched.sort_by(|(_, left), (_, right)| sort.compare(&left.source, &right.source));
        }
        matched
    }
}

impl InMemoryState {
    fn upsert(&mut self, index: &str, id: &str, routing: Option<String>, source: Value) {
        let key = (index.to_string(), id.to_string());
        let seq = match self.documents.get(&key) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.documents.insert(key, StoredDocument { seq, routing, source });
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable {
            bail!("💀 error sending request: connection refused (the in-memory cluster is pretending to be down)");
        }
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn bulk(&self, body: String) -> Result<BulkResponse> {
        let mut state = self.state.lock().await;
        state.bulk_bodies.push(body.clone());
        state.ensure_available()?;
        if let Some(reason) = state.fail_next_bulk.take() {
            bail!("💀 error sending request: {reason}");
        }

        let mut response = BulkResponse::default();
        let mut lines = body.lines().filter(|line| !line.trim().is_empty());
        while let Some(action_line) = lines.next() {
            let action: Value = serde_json::from_str(action_line)
                .with_context(|| format!("💀 Malformed bulk action line: {action_line}"))?;
            let Some((verb, metadata)) = action.as_object().and_then(|object| object.iter().next()) else {
                bail!("💀 Bulk action line is not a one-key object: {action_line}");
            };
            let index = metadata.get("_index").and_then(Value::as_str).unwrap_or_default().to_string();
            let id = metadata.get("_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let routing = metadata.get("routing").and_then(Value::as_str).map(str::to_string);

            let result = match verb.as_str() {
                "index" => {
                    let source_line = lines
                        .next()
                        .with_context(|| format!("💀 Index action for '{id}' has no source line."))?;
                    let source: Value = serde_json::from_str(source_line)
                        .with_context(|| format!("💀 Malformed source line for '{id}'."))?;
                    if state.rejected_ids.contains(&id) {
                        rejected(&id)
                    } else {
                        let created = !state.documents.contains_key(&(index.clone(), id.clone()));
                        state.upsert(&index, &id, routing, source);
                        BulkItemResult {
                            id: id.clone(),
                            status: if created { 201 } else { 200 },
                            result: Some(if created { "created" } else { "updated" }.to_string()),
                            error: None,
                        }
                    }
                }
                "delete" => {
                    if state.rejected_ids.contains(&id) {
                        rejected(&id)
                    } else {
                        let removed = state.documents.remove(&(index.clone(), id.clone())).is_some();
                        BulkItemResult {
                            id: id.clone(),
                            status: if removed { 200 } else { 404 },
                            result: Some(if removed { "deleted" } else { "not_found" }.to_string()),
                            error: None,
                        }
                    }
                }
                other => bail!("💀 Unsupported bulk action '{other}'."),
            };
            response.errors |= result.is_failure();
            response.items.push(HashMap::from([(verb.clone(), result)]));
        }

        debug!(items = response.items.len(), errors = response.errors, "🧪 in-memory bulk applied");
        Ok(response)
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.search_calls += 1;

        let tokens = text_tokens(&request.filter);
        let matched = Self::matching(&state, request);
        let total = matched.len() as u64;
        let hits = matched
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .map(|(id, stored)| {
                let mut highlight = HashMap::new();
                if let Some(spec) = &request.highlight {
                    for field in &spec.fields {
                        let marked = lookup(&stored.source, field)
                            .and_then(Value::as_str)
                            .and_then(|text| mark_tokens(text, &tokens));
                        if let Some(marked) = marked {
                            highlight.insert(field.clone(), vec![marked]);
                        }
                    }
                }
                SearchHit {
                    id: id.clone(),
                    score: Some(1.0),
                    source: stored.source.clone(),
                    highlight,
                }
            })
            .collect();

        trace!(total, from = request.from, size = request.size, "🧪 in-memory search answered");
        Ok(SearchResponse { total, hits })
    }

    async fn count(&self, request: &SearchRequest) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.count_calls += 1;
        Ok(Self::matching(&state, request).len() as u64)
    }
}

fn rejected(id: &str) -> BulkItemResult {
    BulkItemResult {
        id: id.to_string(),
        status: 400,
        result: None,
        error: Some(json!({ "type": "mapper_parsing_exception", "reason": "rejected on cue" })),
    }
}

/// 🔤 Tokens of every positive text clause. Negated text never highlights.
fn text_tokens(filter: &Filter) -> Vec<String> {
    match filter {
        Filter::Text { query, .. } => query_tokens(query),
        Filter::And(filters) | Filter::Or(filters) => filters.iter().flat_map(text_tokens).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::highlight::{HIGHLIGHT_END_TAG, HIGHLIGHT_START_TAG};
    use crate::search::{HighlightSpec, Sort};

    fn request(filter: Filter) -> SearchRequest {
        SearchRequest {
            index: "gitlab-test".to_string(),
            filter,
            sort: None,
            from: 0,
            size: 20,
            highlight: None,
        }
    }

    #[tokio::test]
    async fn the_one_where_bulk_bodies_become_documents() -> Result<()> {
        let backend = InMemoryBackend::new();
        let body = concat!(
            "{\"index\":{\"_index\":\"gitlab-test\",\"_id\":\"issue_1\",\"routing\":\"project_7\"}}\n",
            "{\"type\":\"issue\",\"title\":\"one\"}\n",
            "{\"delete\":{\"_index\":\"gitlab-test\",\"_id\":\"issue_404\"}}\n",
        );
        let response = backend.bulk(body.to_string()).await?;
        assert!(!response.errors);
        let statuses: Vec<u16> = response.item_results().map(|item| item.status).collect();
        assert_eq!(statuses, vec![201, 404]);
        assert_eq!(backend.document("gitlab-test", "issue_1").await, Some(json!({ "type": "issue", "title": "one" })));
        assert_eq!(backend.routing("gitlab-test", "issue_1").await.as_deref(), Some("project_7"));
        assert_eq!(backend.bulk_bodies().await, vec![body.to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_backend_misbehaves_on_cue() -> Result<()> {
        let backend = InMemoryBackend::new();
        let body = "{\"index\":{\"_index\":\"i\",\"_id\":\"a\"}}\n{}\n".to_string();

        backend.fail_next_bulk("connection reset").await;
        assert!(backend.bulk(body.clone()).await.is_err());
        assert!(backend.bulk(body.clone()).await.is_ok(), "only the next one fails");

        backend.reject_id("a").await;
        let response = backend.bulk(body.clone()).await?;
        assert!(response.errors);

        backend.set_unavailable(true).await;
        assert!(backend.search(&request(Filter::MatchAll)).await.is_err());
        assert!(backend.count(&request(Filter::MatchAll)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_search_pages_sorts_and_highlights() -> Result<()> {
        let backend = InMemoryBackend::new();
        for (id, created) in [(1, "2020-01-01"), (2, "2022-01-01"), (3, "2021-01-01")] {
            backend
                .index_document(
                    "gitlab-test",
                    &format!("issue_{id}"),
                    None,
                    json!({ "id": id, "type": "issue", "title": format!("Bulk thing {id}"), "created_at": created }),
                )
                .await;
        }
        backend.index_document("other-index", "issue_9", None, json!({ "title": "bulk" })).await;

        let mut page = request(Filter::text(&["title"], "bulk"));
        page.sort = Sort::parse("created_desc");
        page.size = 2;
        page.highlight = Some(HighlightSpec { fields: vec!["title".to_string()] });

        let response = backend.search(&page).await?;
        assert_eq!(response.total, 3);
        let ids: Vec<&str> = response.hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["issue_2", "issue_3"]);
        assert_eq!(
            response.hits[0].highlight["title"],
            vec![format!("{HIGHLIGHT_START_TAG}Bulk{HIGHLIGHT_END_TAG} thing 2")]
        );
        assert_eq!(backend.count(&page).await?, 3);
        assert_eq!(backend.search_calls().await, 1);
        assert_eq!(backend.count_calls().await, 1);
        Ok(())
    }
}
