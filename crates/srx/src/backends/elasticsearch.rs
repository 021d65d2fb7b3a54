//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 3:47 AM
//!
//! The dashboard glows amber. The managed cluster wants every request signed.
//! The laptop cluster wants nothing but a content type. One client has to keep
//! both of them happy, and it has to decide which one it's talking to exactly
//! once, at construction, not on every request.
//!
//! [`SearchClient::build`] turns an [`ElasticsearchConfig`] into a client:
//!
//! - `aws = false`: unsigned requests with a JSON content type.
//! - `aws = true`: a credential source is resolved once (static keys, then the
//!   `aws-config` provider chain) and every request is SigV4-signed over method,
//!   path, headers (correlation id included) and body hash. Each request asks the
//!   source for credentials, so role sessions that expire get replaced. No
//!   credentials, no client: the builder refuses rather than quietly sending
//!   unsigned requests to a cluster that will 403 every one of them.
//!
//! No retries live here. Retry policy belongs to whoever queued the work.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

pub mod aws;
pub mod sigv4;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use crate::backends::SearchBackend;
use crate::indexer::BulkResponse;
use crate::search::{SearchRequest, SearchResponse};

use self::aws::{AwsCredentialSource, resolve_aws_credentials};
use self::sigv4::{ES_SERVICE, RequestSigner};

const JSON: &str = "application/json";
const NDJSON: &str = "application/x-ndjson";

// 📡 Where the cluster lives and how to talk to it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ElasticsearchConfig {
    /// 📡 Include scheme and port. Yes, all of it.
    #[serde(default = "default_url")]
    pub url: String,
    /// 📦 The one index every document type lives in.
    #[serde(default = "default_index_name")]
    pub index_name: String,
    /// 🔒 Sign requests with AWS SigV4.
    #[serde(default)]
    pub aws: bool,
    #[serde(default = "default_aws_region")]
    pub aws_region: String,
    #[serde(default)]
    pub aws_access_key: Option<String>,
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index_name() -> String {
    "gitlab-development".to_string()
}

fn default_aws_region() -> String {
    "us-east-1".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            index_name: default_index_name(),
            aws: false,
            aws_region: default_aws_region(),
            aws_access_key: None,
            aws_secret_access_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// 📡 A configured cluster client. Cheap to clone; build once, reuse everywhere.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    base_url: String,
    signer: Option<Arc<RequestSigner>>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

impl SearchClient {
    /// 🚀 Build a client, resolving AWS credentials through the standard chain when `aws` is on.
    pub async fn build(config: &ElasticsearchConfig) -> Result<Self> {
        let credentials = if config.aws {
            resolve_aws_credentials(config).await
        } else {
            None
        };
        Self::build_with_credentials(config, credentials)
    }

    /// 🚀 Same as [`build`](Self::build), with the credential source supplied by the caller.
    /// Ignored unless `aws` is on; required when it is.
    pub fn build_with_credentials(config: &ElasticsearchConfig, credentials: Option<AwsCredentialSource>) -> Result<Self> {
        Url::parse(&config.url)
            .with_context(|| format!("💀 '{}' is not a URL. The cluster has to live somewhere.", config.url))?;

        // 🔧 10s to shake hands, 30s to answer. We will wait, but not forever.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS stack having a day.")?;

        let signer = if config.aws {
            let Some(credentials) = credentials else {
                bail!(
                    "💀 aws = true, but no AWS credentials could be resolved (config keys, environment, \
                     profile, container endpoint, instance profile all came up empty). Refusing to send \
                     unsigned requests to a cluster that expects signatures."
                );
            };
            debug!(region = %config.aws_region, "🔒 signing requests with SigV4");
            Some(Arc::new(RequestSigner::new(credentials, config.aws_region.clone(), ES_SERVICE)))
        } else {
            None
        };

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            signer,
        })
    }

    pub fn is_signed(&self) -> bool {
        self.signer.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&joined).with_context(|| format!("💀 '{joined}' is not a URL."))
    }

    /// 📡 Send one request: content type, correlation id, signature when configured.
    /// Anything but a 2xx is an error carrying the status and the body.
    async fn send(&self, method: Method, path: &str, body: Vec<u8>, content_type: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(path)?;
        let mut headers = vec![
            ("content-type".to_string(), content_type.to_string()),
            ("x-opaque-id".to_string(), Uuid::new_v4().to_string()),
        ];
        if let Some(signer) = &self.signer {
            let signed = signer.sign(method.as_str(), &url, &headers, &body).await?;
            headers.extend(signed);
        }

        trace!(%method, %url, bytes = body.len(), "📡 sending request");
        let mut request = self.client.request(method.clone(), url.as_str());
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("💀 {method} {url} never made it. Check connectivity. Check the cluster."))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("💀 {method} {url} answered {status} and then lost the body."))?;
        if !status.is_success() {
            bail!(
                "💀 {method} {url} answered {status}: {}",
                String::from_utf8_lossy(&bytes)
            );
        }
        Ok(bytes.to_vec())
    }

    /// 🔍 `GET <path>`, parsed as JSON.
    pub async fn get(&self, path: &str) -> Result<Value> {
        let body = self.send(Method::GET, path, Vec::new(), JSON).await?;
        parse_json(&body)
    }

    /// 📦 `POST /_bulk` with a complete NDJSON body.
    pub async fn bulk(&self, body: String) -> Result<BulkResponse> {
        debug!(bytes = body.len(), "📦 sending bulk body");
        let response = self.send(Method::POST, "_bulk", body.into_bytes(), NDJSON).await?;
        BulkResponse::from_json(&response)
    }

    /// 🔍 `POST /<index>/_search`.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let body = serde_json::to_vec(&request.to_search_body()).context("💀 Search body refused to serialize.")?;
        let response = self
            .send(Method::POST, &format!("{}/_search", request.index), body, JSON)
            .await?;
        SearchResponse::from_json(&response).context("💀 The _search response was not the JSON we were promised.")
    }

    /// 🔢 `POST /<index>/_count`. Same query as the search, no hits materialized.
    pub async fn count(&self, request: &SearchRequest) -> Result<u64> {
        let body = serde_json::to_vec(&request.to_count_body()).context("💀 Count body refused to serialize.")?;
        let response = self
            .send(Method::POST, &format!("{}/_count", request.index), body, JSON)
            .await?;
        let parsed: CountResponse = parse_json(&response)?;
        Ok(parsed.count)
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).context("💀 The cluster answered with something that is not the JSON we expected.")
}

#[async_trait]
impl SearchBackend for SearchClient {
    async fn bulk(&self, body: String) -> Result<BulkResponse> {
        SearchClient::bulk(self, body).await
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        SearchClient::search(self, request).await
    }

    async fn count(&self, request: &SearchRequest) -> Result<u64> {
        SearchClient::count(self, request).await
    }
}
