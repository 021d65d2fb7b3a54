//! 🔑 AWS credential resolution.
//!
//! 🎬 *[four doors. behind each one, maybe a key. maybe an empty room. maybe a timeout.]*
//!
//! Static keys from config win outright, no network involved. Without them we
//! ask `aws-config` for its default provider chain (environment, profile files,
//! web identity, ECS container endpoint, EC2 instance profile) and keep the
//! provider, not a snapshot of what it returned.
//!
//! [`AwsCredentialSource`] hands out credentials per request. It holds on to the
//! last set until it gets within [`REFRESH_BEFORE_EXPIRY`] of its expiration, then
//! asks the provider again. Role sessions expire. Indexers run for days.
//!
//! Resolution never raises. A provider that errors is logged; a chain that runs
//! dry, or answers with an empty key pair, is `None`, and the client builder
//! decides what that means.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ElasticsearchConfig;

/// ⏳ Credentials closer than this to their expiration are fetched again.
pub const REFRESH_BEFORE_EXPIRY: Duration = Duration::from_secs(5 * 60);

const STATIC_PROVIDER_NAME: &str = "srx-config";

/// 🔑 A credential provider plus the last credentials it handed over.
/// Cheap to clone; clones share the cache.
#[derive(Debug, Clone)]
pub struct AwsCredentialSource {
    provider: SharedCredentialsProvider,
    cached: Arc<Mutex<Option<Credentials>>>,
}

impl AwsCredentialSource {
    pub fn new(provider: impl ProvideCredentials + 'static) -> Self {
        Self::from_shared(SharedCredentialsProvider::new(provider))
    }

    pub fn from_shared(provider: SharedCredentialsProvider) -> Self {
        Self {
            provider,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// 🔑 Credentials to sign with right now. Cached ones are reused while fresh;
    /// stale or missing ones send us back to the provider.
    pub async fn credentials(&self) -> Option<Credentials> {
        let mut cached = self.cached.lock().await;
        if let Some(credentials) = cached.as_ref()
            && is_fresh(credentials, SystemTime::now())
        {
            return Some(credentials.clone());
        }

        match self.provider.provide_credentials().await {
            Ok(credentials) if is_set(&credentials) => {
                debug!(access_key = %credentials.access_key_id(), "🔑 AWS credentials (re)loaded");
                *cached = Some(credentials.clone());
                Some(credentials)
            }
            Ok(_) => {
                warn!("🔑 The AWS provider answered with an empty key pair. Treating it as unset.");
                *cached = None;
                None
            }
            Err(err) => {
                warn!(%err, "🔑 No AWS credentials from the provider chain");
                *cached = None;
                None
            }
        }
    }
}

/// ✅ Both halves present. An empty pair is the same as no pair.
fn is_set(credentials: &Credentials) -> bool {
    !credentials.access_key_id().trim().is_empty() && !credentials.secret_access_key().trim().is_empty()
}

fn is_fresh(credentials: &Credentials, now: SystemTime) -> bool {
    match credentials.expiry() {
        None => true,
        Some(expiry) => expiry
            .duration_since(now)
            .is_ok_and(|remaining| remaining > REFRESH_BEFORE_EXPIRY),
    }
}

fn static_credentials(config: &ElasticsearchConfig) -> Option<Credentials> {
    let (Some(access_key), Some(secret)) = (&config.aws_access_key, &config.aws_secret_access_key) else {
        return None;
    };
    let credentials = Credentials::new(access_key.clone(), secret.clone(), None, None, STATIC_PROVIDER_NAME);
    is_set(&credentials).then_some(credentials)
}

/// 🔑 Static keys from config if both are present, otherwise the `aws-config`
/// default chain for the configured region. `None` when nothing answers.
pub async fn resolve_aws_credentials(config: &ElasticsearchConfig) -> Option<AwsCredentialSource> {
    if let Some(credentials) = static_credentials(config) {
        return resolve_with_provider(SharedCredentialsProvider::new(credentials)).await;
    }

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()))
        .load()
        .await;
    let Some(provider) = sdk_config.credentials_provider() else {
        warn!("🔑 aws-config came back without a credentials provider");
        return None;
    };
    resolve_with_provider(provider).await
}

/// 🔑 Wrap `provider`, asking it once up front so an empty chain is `None` now
/// instead of a 403 later.
pub async fn resolve_with_provider(provider: SharedCredentialsProvider) -> Option<AwsCredentialSource> {
    let source = AwsCredentialSource::from_shared(provider);
    source.credentials().await?;
    Some(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_credential_types::provider::error::CredentialsError;
    use aws_credential_types::provider::future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 🔁 Hands out a new key on every call, each expiring at `expiry`.
    #[derive(Debug)]
    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        expiry: Option<SystemTime>,
    }

    impl ProvideCredentials for CountingProvider {
        fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
        where
            Self: 'a,
        {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            future::ProvideCredentials::ready(Ok(Credentials::new(
                format!("ASIA{call}"),
                "secret",
                Some("session".to_string()),
                self.expiry,
                "counting",
            )))
        }
    }

    #[derive(Debug)]
    struct NobodyHome;

    impl ProvideCredentials for NobodyHome {
        fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
        where
            Self: 'a,
        {
            future::ProvideCredentials::ready(Err(CredentialsError::not_loaded("no keys anywhere")))
        }
    }

    fn config_with_keys(access: Option<&str>, secret: Option<&str>) -> ElasticsearchConfig {
        ElasticsearchConfig {
            aws: true,
            aws_access_key: access.map(str::to_string),
            aws_secret_access_key: secret.map(str::to_string),
            ..ElasticsearchConfig::default()
        }
    }

    fn counting(expiry: Option<SystemTime>) -> (AwsCredentialSource, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = AwsCredentialSource::new(CountingProvider {
            calls: calls.clone(),
            expiry,
        });
        (source, calls)
    }

    #[tokio::test]
    async fn the_one_where_static_keys_skip_the_chain() {
        let source = resolve_aws_credentials(&config_with_keys(Some("STATIC"), Some("shh")))
            .await
            .expect("static keys should resolve");
        let credentials = source.credentials().await.expect("static keys never expire");
        assert_eq!(credentials.access_key_id(), "STATIC");
        assert_eq!(credentials.secret_access_key(), "shh");
        assert_eq!(credentials.session_token(), None);
    }

    #[test]
    fn the_one_where_half_a_key_or_an_empty_key_is_no_key() {
        assert!(static_credentials(&config_with_keys(Some("STATIC"), None)).is_none());
        assert!(static_credentials(&config_with_keys(None, Some("shh"))).is_none());
        assert!(static_credentials(&config_with_keys(Some(" "), Some(""))).is_none());
    }

    #[tokio::test]
    async fn the_one_where_an_empty_pair_from_the_chain_counts_as_nobody_home() {
        let empty = Credentials::new("", "", None, None, "empty");
        assert!(resolve_with_provider(SharedCredentialsProvider::new(empty)).await.is_none());
        assert!(resolve_with_provider(SharedCredentialsProvider::new(NobodyHome)).await.is_none());
    }

    #[tokio::test]
    async fn the_one_where_fresh_credentials_are_fetched_once() {
        let in_an_hour = SystemTime::now() + Duration::from_secs(3600);
        let (source, calls) = counting(Some(in_an_hour));
        for _ in 0..3 {
            let credentials = source.credentials().await.expect("provider answers");
            assert_eq!(credentials.access_key_id(), "ASIA1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn the_one_where_expiring_credentials_are_fetched_again() {
        // 2001-09-09: long gone
        let expired = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        let (source, calls) = counting(Some(expired));
        assert_eq!(source.credentials().await.map(|c| c.access_key_id().to_string()), Some("ASIA1".to_string()));
        assert_eq!(source.credentials().await.map(|c| c.access_key_id().to_string()), Some("ASIA2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // inside the refresh margin counts as stale too
        let (source, calls) = counting(Some(SystemTime::now() + REFRESH_BEFORE_EXPIRY / 2));
        source.credentials().await;
        source.credentials().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn the_one_where_debug_output_keeps_secrets() {
        let source = resolve_aws_credentials(&config_with_keys(Some("AKID"), Some("super-secret")))
            .await
            .expect("static keys should resolve");
        source.credentials().await;
        let rendered = format!("{source:?}");
        assert!(!rendered.contains("super-secret"), "{rendered}");
    }
}
