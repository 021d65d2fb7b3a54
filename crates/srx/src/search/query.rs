//! 🧮 The query model: one predicate, two renderings.
//!
//! A [`Filter`] is built once per scope and then either rendered into the search
//! backend's query DSL ([`Filter::to_dsl`]) or evaluated directly against a
//! document ([`Filter::matches`]) by the in-memory backend. Count requests and
//! page requests wrap the very same `Filter`, so they cannot disagree about
//! which documents exist.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::highlight::{HIGHLIGHT_END_TAG, HIGHLIGHT_START_TAG};

/// 🧮 A boolean predicate over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    MatchAll,
    MatchNone,
    /// Field equals value. Array fields match when any element equals.
    Term { field: String, value: Value },
    /// Field equals any of the values.
    Terms { field: String, values: Vec<Value> },
    /// Every whitespace-separated token appears (case-insensitively) in at least one field.
    Text { fields: Vec<String>, query: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn text(fields: &[&str], query: impl Into<String>) -> Self {
        Filter::Text {
            fields: fields.iter().map(|field| field.to_string()).collect(),
            query: query.into(),
        }
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// 📡 Render into the backend's query DSL.
    pub fn to_dsl(&self) -> Value {
        match self {
            Filter::MatchAll => json!({ "match_all": {} }),
            Filter::MatchNone => json!({ "match_none": {} }),
            Filter::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Filter::Terms { field, values } => json!({ "terms": { field.as_str(): values } }),
            Filter::Text { fields, query } => json!({
                "simple_query_string": {
                    "query": query,
                    "fields": fields,
                    "default_operator": "and"
                }
            }),
            Filter::And(filters) => json!({
                "bool": { "must": filters.iter().map(Filter::to_dsl).collect::<Vec<_>>() }
            }),
            Filter::Or(filters) => json!({
                "bool": {
                    "should": filters.iter().map(Filter::to_dsl).collect::<Vec<_>>(),
                    "minimum_should_match": 1
                }
            }),
            Filter::Not(filter) => json!({ "bool": { "must_not": [filter.to_dsl()] } }),
        }
    }

    /// 🔍 Evaluate against a document. Same semantics as the DSL rendering, minus the scoring.
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Filter::MatchAll => true,
            Filter::MatchNone => false,
            Filter::Term { field, value } => field_equals(lookup(document, field), value),
            Filter::Terms { field, values } => {
                let found = lookup(document, field);
                values.iter().any(|value| field_equals(found, value))
            }
            Filter::Text { fields, query } => {
                let haystack = fields
                    .iter()
                    .filter_map(|field| lookup(document, field))
                    .map(searchable_text)
                    .collect::<Vec<_>>()
                    .join("\n");
                let tokens = query_tokens(query);
                !tokens.is_empty() && tokens.iter().all(|token| haystack.contains(token.as_str()))
            }
            Filter::And(filters) => filters.iter().all(|filter| filter.matches(document)),
            Filter::Or(filters) => filters.iter().any(|filter| filter.matches(document)),
            Filter::Not(filter) => !filter.matches(document),
        }
    }
}

/// 🔤 Lowercased, whitespace-split query tokens.
pub(crate) fn query_tokens(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|token| token.to_ascii_lowercase())
        .collect()
}

/// 🧭 Walk a dotted path (`blob.content`) through nested objects.
pub(crate) fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

fn field_equals(found: Option<&Value>, expected: &Value) -> bool {
    match found {
        Some(Value::Array(elements)) => elements.iter().any(|element| element == expected),
        Some(value) => value == expected,
        None => false,
    }
}

fn searchable_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_ascii_lowercase(),
        other => other.to_string().to_ascii_lowercase(),
    }
}

/// ↕️ Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// ↕️ A single-field sort. No sort means relevance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    /// 🎛️ `created_desc`, `created_asc`, `updated_desc`, `updated_asc`. Anything else is relevance.
    pub fn parse(sort: &str) -> Option<Self> {
        let (field, order) = match sort {
            "created_desc" => ("created_at", SortOrder::Desc),
            "created_asc" => ("created_at", SortOrder::Asc),
            "updated_desc" => ("updated_at", SortOrder::Desc),
            "updated_asc" => ("updated_at", SortOrder::Asc),
            _ => return None,
        };
        Some(Self {
            field: field.to_string(),
            order,
        })
    }

    fn to_dsl(&self) -> Value {
        let order = match self.order {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        json!([{ self.field.as_str(): { "order": order } }])
    }

    /// ↕️ Order two documents by this sort's field. Missing values sink to the end.
    pub(crate) fn compare(&self, left: &Value, right: &Value) -> Ordering {
        let ordering = match (lookup(left, &self.field), lookup(right, &self.field)) {
            (Some(l), Some(r)) => compare_values(l, r),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        _ => left.to_string().cmp(&right.to_string()),
    }
}

/// ✨ Which fields come back with highlight markers around matched terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightSpec {
    pub fields: Vec<String>,
}

impl HighlightSpec {
    fn to_dsl(&self) -> Value {
        let fields: Map<String, Value> = self
            .fields
            .iter()
            .map(|field| (field.clone(), json!({})))
            .collect();
        json!({
            "pre_tags": [HIGHLIGHT_START_TAG],
            "post_tags": [HIGHLIGHT_END_TAG],
            // 📏 0 fragments = whole field, markers and all. blob line math depends on it.
            "number_of_fragments": 0,
            "fields": fields
        })
    }
}

/// 📨 One search or count request against one index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub index: String,
    pub filter: Filter,
    pub sort: Option<Sort>,
    pub from: usize,
    pub size: usize,
    pub highlight: Option<HighlightSpec>,
}

impl SearchRequest {
    /// 📡 Body for `POST /<index>/_search`.
    pub fn to_search_body(&self) -> Value {
        let mut body = json!({
            "query": self.filter.to_dsl(),
            "from": self.from,
            "size": self.size,
            "track_total_hits": true
        });
        if let Some(sort) = &self.sort {
            body["sort"] = sort.to_dsl();
        }
        if let Some(highlight) = &self.highlight {
            body["highlight"] = highlight.to_dsl();
        }
        body
    }

    /// 📡 Body for `POST /<index>/_count`. Same query, none of the page baggage.
    pub fn to_count_body(&self) -> Value {
        json!({ "query": self.filter.to_dsl() })
    }
}

/// 🎯 One returned hit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchHit {
    pub id: String,
    pub score: Option<f64>,
    pub source: Value,
    pub highlight: HashMap<String, Vec<String>>,
}

/// 📬 A page of hits plus the total that matched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResponse {
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    hits: RawHits,
}

#[derive(Debug, Deserialize)]
struct RawHits {
    #[serde(default)]
    total: Option<RawTotal>,
    #[serde(default)]
    hits: Vec<RawHit>,
}

/// 📏 Older clusters say `"total": 12`, newer ones say `"total": {"value": 12, ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTotal {
    Plain(u64),
    Object { value: u64 },
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: Value,
    #[serde(default)]
    highlight: HashMap<String, Vec<String>>,
}

impl SearchResponse {
    /// 📥 Parse a raw `_search` response body.
    pub fn from_json(body: &[u8]) -> serde_json::Result<Self> {
        let raw: RawSearchResponse = serde_json::from_slice(body)?;
        let hits: Vec<SearchHit> = raw
            .hits
            .hits
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.id,
                score: hit.score,
                source: hit.source,
                highlight: hit.highlight,
            })
            .collect();
        let total = match raw.hits.total {
            Some(RawTotal::Plain(total)) | Some(RawTotal::Object { value: total }) => total,
            None => hits.len() as u64,
        };
        Ok(Self { total, hits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn an_issue() -> Value {
        json!({
            "type": "issue",
            "title": "Flaky spec in the Bulk indexer",
            "description": "sometimes it passes",
            "project_id": 7,
            "assignee_ids": [3, 4],
            "confidential": false,
            "blob": { "path": "app/models/issue.rb" }
        })
    }

    #[test]
    fn the_one_where_terms_match_scalars_and_arrays() {
        let issue = an_issue();
        assert!(Filter::term("project_id", 7).matches(&issue));
        assert!(!Filter::term("project_id", 8).matches(&issue));
        assert!(Filter::term("assignee_ids", 4).matches(&issue));
        assert!(Filter::terms("project_id", [1, 7]).matches(&issue));
        assert!(!Filter::terms("project_id", Vec::<u64>::new()).matches(&issue));
        assert!(Filter::term("blob.path", "app/models/issue.rb").matches(&issue));
        assert!(!Filter::term("missing", 1).matches(&issue));
    }

    #[test]
    fn the_one_where_text_needs_every_token_somewhere() {
        let issue = an_issue();
        assert!(Filter::text(&["title", "description"], "bulk PASSES").matches(&issue));
        assert!(!Filter::text(&["title"], "bulk passes").matches(&issue));
        assert!(!Filter::text(&["title"], "   ").matches(&issue));
    }

    #[test]
    fn the_one_where_booleans_compose() {
        let issue = an_issue();
        let filter = Filter::And(vec![
            Filter::term("type", "issue"),
            Filter::Or(vec![Filter::term("project_id", 1), Filter::term("confidential", false)]),
            Filter::negate(Filter::term("assignee_ids", 9)),
        ]);
        assert!(filter.matches(&issue));
        assert!(!Filter::MatchNone.matches(&issue));
    }

    #[test]
    fn the_one_where_count_and_search_share_a_query() {
        let request = SearchRequest {
            index: "gitlab-test".to_string(),
            filter: Filter::And(vec![Filter::term("type", "issue"), Filter::text(&["title"], "flaky")]),
            sort: Sort::parse("created_desc"),
            from: 20,
            size: 20,
            highlight: Some(HighlightSpec { fields: vec!["title".to_string()] }),
        };
        let search = request.to_search_body();
        let count = request.to_count_body();
        assert_eq!(search["query"], count["query"]);
        assert_eq!(search["sort"], json!([{ "created_at": { "order": "desc" } }]));
        assert_eq!(search["highlight"]["pre_tags"], json!([HIGHLIGHT_START_TAG]));
        assert!(count.get("from").is_none());
        assert_eq!(
            search["query"]["bool"]["must"][1]["simple_query_string"]["default_operator"],
            "and"
        );
    }

    #[test]
    fn the_one_where_both_total_shapes_parse() -> serde_json::Result<()> {
        let modern = SearchResponse::from_json(
            br#"{"hits":{"total":{"value":2,"relation":"eq"},"hits":[{"_id":"issue_1","_score":1.5,"_source":{"id":1},"highlight":{"title":["a"]}}]}}"#,
        )?;
        assert_eq!(modern.total, 2);
        assert_eq!(modern.hits[0].id, "issue_1");
        assert_eq!(modern.hits[0].highlight["title"], vec!["a".to_string()]);

        let vintage = SearchResponse::from_json(br#"{"hits":{"total":5,"hits":[]}}"#)?;
        assert_eq!(vintage.total, 5);
        Ok(())
    }

    #[test]
    fn the_one_where_missing_sort_values_sink() {
        let sort = Sort { field: "created_at".to_string(), order: SortOrder::Desc };
        let older = json!({ "created_at": "2020-01-01" });
        let newer = json!({ "created_at": "2021-01-01" });
        let undated = json!({});
        assert_eq!(sort.compare(&newer, &older), Ordering::Less);
        assert_eq!(sort.compare(&older, &undated), Ordering::Less);
        assert_eq!(Sort::parse("popularity"), None);
    }
}
