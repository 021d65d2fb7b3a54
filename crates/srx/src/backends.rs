//! 🔌 Backends: where the real I/O happens.
//!
//! The indexer writes through a backend, the results aggregator reads through
//! one, and neither of them cares which one it got. There are two:
//!
//! - [`SearchClient`]: a real cluster over HTTP, optionally request-signed.
//! - [`InMemoryBackend`]: a cluster impersonator living in a `HashMap`, for the
//!   CLI's dry runs and for every test that wants to watch the bulk bodies go by.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;

use crate::indexer::BulkResponse;
use crate::search::{SearchRequest, SearchResponse};

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchConfig, SearchClient};
pub use in_mem::InMemoryBackend;

/// 📡 The three verbs everything in this crate speaks.
///
/// # Contract
/// - `bulk` sends a complete NDJSON body. A transport failure is an `Err`;
///   per-item rejections come back inside the `Ok(BulkResponse)`.
/// - `search` and `count` take the same [`SearchRequest`], so a page and a count
///   built from one request always agree on which documents matched.
#[async_trait]
pub trait SearchBackend: std::fmt::Debug + Send + Sync {
    async fn bulk(&self, body: String) -> Result<BulkResponse>;
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;
    async fn count(&self, request: &SearchRequest) -> Result<u64>;
}

/// 🎭 The many faces of a backend. Cheap to clone: both variants share their insides.
#[derive(Debug, Clone)]
pub enum Backend {
    InMemory(InMemoryBackend),
    Elasticsearch(SearchClient),
}

#[async_trait]
impl SearchBackend for Backend {
    async fn bulk(&self, body: String) -> Result<BulkResponse> {
        match self {
            Backend::InMemory(backend) => backend.bulk(body).await,
            Backend::Elasticsearch(client) => client.bulk(body).await,
        }
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        match self {
            Backend::InMemory(backend) => backend.search(request).await,
            Backend::Elasticsearch(client) => client.search(request).await,
        }
    }

    async fn count(&self, request: &SearchRequest) -> Result<u64> {
        match self {
            Backend::InMemory(backend) => backend.count(request).await,
            Backend::Elasticsearch(client) => client.count(request).await,
        }
    }
}

impl From<InMemoryBackend> for Backend {
    fn from(backend: InMemoryBackend) -> Self {
        Backend::InMemory(backend)
    }
}

impl From<SearchClient> for Backend {
    fn from(client: SearchClient) -> Self {
        Backend::Elasticsearch(client)
    }
}
