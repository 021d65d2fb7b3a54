//! ✍️ AWS Signature Version 4 for search domain requests.
//!
//! 🎬 *[a request leaves the building. at the door, a notary stamps every header it's wearing.]*
//!
//! The canonicalization and key derivation belong to `aws-sigv4`. This is the
//! glue: fetch credentials for *this* request, sign method, URL, the caller's
//! headers and the body hash, and hand back the headers to add.

use std::time::SystemTime;

use anyhow::{Context, Result};
use aws_sigv4::http_request::{PayloadChecksumKind, SignableBody, SignableRequest, SigningSettings, sign};
use aws_sigv4::sign::v4;
use url::Url;

use super::aws::AwsCredentialSource;

/// 🏷️ Service name for OpenSearch / Elasticsearch domains.
pub const ES_SERVICE: &str = "es";

/// ✍️ Signs requests for one credential source, one region, one service.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: AwsCredentialSource,
    region: String,
    service: String,
}

impl RequestSigner {
    pub fn new(credentials: AwsCredentialSource, region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: service.into(),
        }
    }

    /// ✍️ Sign a request and return the headers to add to it.
    ///
    /// Every header in `headers` is signed. `x-amz-date`, `x-amz-content-sha256`,
    /// `x-amz-security-token` (session credentials only) and `authorization` come back.
    pub async fn sign(
        &self,
        method: &str,
        url: &Url,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<Vec<(String, String)>> {
        let credentials = self
            .credentials
            .credentials()
            .await
            .context("💀 The AWS credentials dried up mid-run. The provider chain has nothing left to give.")?;
        let identity = credentials.into();

        let mut settings = SigningSettings::default();
        settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        let params: aws_sigv4::http_request::SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(&self.service)
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .context("💀 SigV4 signing parameters would not assemble.")?
            .into();

        let signable = SignableRequest::new(
            method,
            url.as_str(),
            headers.iter().map(|(name, value)| (name.as_str(), value.as_str())),
            SignableBody::Bytes(body),
        )
        .context("💀 This request cannot be signed. Odd headers, probably.")?;
        let (instructions, _signature) = sign(signable, &params)
            .context("💀 SigV4 refused to sign the request.")?
            .into_parts();

        Ok(instructions
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect())
    }
}
