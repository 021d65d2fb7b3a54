//! 📦 Bulk operations: the two-line (or one-line) love letters we send to `_bulk`.
//!
//! 🎬 *[a metadata line walks into a bar. its source document follows one newline later.]*
//! *[the bartender has seen this before. the bartender is NDJSON.]*
//!
//! An index operation is an action-metadata line followed by the document line.
//! A delete operation is just the action line. Every line ends with `\n`, including
//! the last one, because `_bulk` will reject a body that trails off mid-sentence.
//!
//! The bytes are rendered once, when the operation is created, so the size the
//! indexer budgets for is exactly the size that goes over the wire.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document_reference::DocumentReference;

/// 🎬 What the operation does to its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Index,
    Delete,
}

#[derive(Serialize)]
struct ActionMetadata<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    routing: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum ActionLine<'a> {
    Index(ActionMetadata<'a>),
    Delete(ActionMetadata<'a>),
}

/// 📦 One rendered operation plus the reference it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    reference: DocumentReference,
    action: BulkAction,
    lines: String,
}

impl BulkOperation {
    /// ✅ Upsert `document` under the reference's search id (and routing, when it has one).
    pub fn index(index: &str, reference: DocumentReference, document: &Value) -> Result<Self> {
        let mut lines = render_action(index, &reference, BulkAction::Index)?;
        let source = serde_json::to_string(document).with_context(|| {
            format!("💀 The document for '{}' refused to become a JSON line.", reference)
        })?;
        lines.push_str(&source);
        lines.push('\n');
        Ok(Self {
            reference,
            action: BulkAction::Index,
            lines,
        })
    }

    /// 🗑️ Remove the reference's document from the index.
    pub fn delete(index: &str, reference: DocumentReference) -> Result<Self> {
        let lines = render_action(index, &reference, BulkAction::Delete)?;
        Ok(Self {
            reference,
            action: BulkAction::Delete,
            lines,
        })
    }

    /// 📏 Exact byte length of the rendered lines.
    pub fn byte_len(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &str {
        &self.lines
    }

    pub fn action(&self) -> BulkAction {
        self.action
    }

    pub fn reference(&self) -> &DocumentReference {
        &self.reference
    }

    pub fn into_reference(self) -> DocumentReference {
        self.reference
    }
}

fn render_action(index: &str, reference: &DocumentReference, action: BulkAction) -> Result<String> {
    let metadata = ActionMetadata {
        index,
        id: reference.search_id(),
        routing: reference.routing_id(),
    };
    let line = match action {
        BulkAction::Index => ActionLine::Index(metadata),
        BulkAction::Delete => ActionLine::Delete(metadata),
    };
    let mut rendered = serde_json::to_string(&line)
        .with_context(|| format!("💀 Could not render the action line for '{}'.", reference))?;
    rendered.push('\n');
    Ok(rendered)
}

/// 📬 What `_bulk` says back. One item per operation, in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    /// Each item is a one-key object: `{"index": {...}}` or `{"delete": {...}}`.
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkItemResult>>,
}

/// 📋 The per-item verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl BulkItemResult {
    /// A delete of a document that was never there comes back `404 not_found`
    /// without an `error`. Only an `error` body counts as a failure.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

impl BulkResponse {
    /// 📥 Parse a raw `_bulk` response body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .context("💀 The _bulk response was not the JSON we were promised.")
    }

    /// 🧾 Flatten the one-key item objects.
    pub fn item_results(&self) -> impl Iterator<Item = &BulkItemResult> {
        self.items.iter().filter_map(|item| item.values().next())
    }

    /// 🔍 The references whose items came back with an error.
    ///
    /// Items are matched to operations by position. If the backend returned a
    /// different number of items than we sent, fall back to matching by id.
    pub fn failed_references(&self, operations: &[BulkOperation]) -> Vec<DocumentReference> {
        let results: Vec<&BulkItemResult> = self.item_results().collect();
        if results.len() == operations.len() {
            return operations
                .iter()
                .zip(results)
                .filter(|(_, result)| result.is_failure())
                .map(|(operation, _)| operation.reference.clone())
                .collect();
        }

        let failed_ids: Vec<&str> = results
            .iter()
            .filter(|result| result.is_failure())
            .map(|result| result.id.as_str())
            .collect();
        operations
            .iter()
            .filter(|operation| failed_ids.contains(&operation.reference.search_id()))
            .map(|operation| operation.reference.clone())
            .collect()
    }
}
