//! HTTP client for the metadata provider.

use crate::config::{Credentials, ProviderConfig};
use crate::errors::{DoiRouterError, Result};
use crate::lookup::Lookup;
use crate::types::{Identifier, LookupFailure, LookupOutcome};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// Looks identifiers up with one `GET <base>/<doi>?email=..&admin_key=..` each.
///
/// # Timeout Behavior
///
/// `http_timeout` covers the complete exchange: connecting, sending, waiting
/// for headers and reading the body. An expired call is reported as
/// [`LookupFailure::Timeout`].
///
/// Transport errors are reported without their URL so the admin key never
/// ends up in a response or a log line.
pub struct ProviderClient {
    client: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    http_timeout: Duration,
}

impl ProviderClient {
    pub fn new(
        provider: &ProviderConfig,
        credentials: Credentials,
        http_timeout: Duration,
    ) -> Result<Self> {
        if provider.url.cannot_be_a_base() {
            return Err(DoiRouterError::InvalidProviderUrl(provider.url.to_string()));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("doibatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DoiRouterError::HttpClientError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: provider.url.clone(),
            credentials,
            http_timeout,
        })
    }

    /// Builds the lookup URL, percent-encoding each segment of the DOI.
    fn lookup_url(&self, identifier: &Identifier) -> std::result::Result<Url, LookupFailure> {
        if !identifier.is_addressable() {
            return Err(LookupFailure::InvalidIdentifier);
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LookupFailure::Internal("provider URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(identifier.normalized().split('/'));

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("email", self.credentials.email());
            if let Some(admin_key) = self.credentials.admin_key() {
                query.append_pair("admin_key", admin_key);
            }
        }

        Ok(url)
    }

    async fn fetch(&self, url: Url) -> std::result::Result<JsonValue, LookupFailure> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_failure)?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(LookupFailure::NotFound),
            StatusCode::TOO_MANY_REQUESTS => return Err(LookupFailure::RateLimited),
            status => return Err(LookupFailure::UpstreamStatus(status.as_u16())),
        }

        let body = response.bytes().await.map_err(transport_failure)?;
        serde_json::from_slice(&body).map_err(|e| LookupFailure::MalformedResponse(e.to_string()))
    }
}

fn transport_failure(e: reqwest::Error) -> LookupFailure {
    if e.is_timeout() {
        LookupFailure::Timeout
    } else {
        LookupFailure::Transport(e.without_url().to_string())
    }
}

#[async_trait]
impl Lookup for ProviderClient {
    fn name(&self) -> &'static str {
        "unpaywall"
    }

    async fn lookup(&self, identifier: &Identifier) -> LookupOutcome {
        let result = match self.lookup_url(identifier) {
            Ok(url) => timeout(self.http_timeout, self.fetch(url))
                .await
                .unwrap_or(Err(LookupFailure::Timeout)),
            Err(failure) => Err(failure),
        };

        match result {
            Ok(payload) => LookupOutcome::Success(payload),
            Err(failure) => {
                tracing::debug!(
                    identifier = %identifier,
                    error = %failure,
                    "Provider lookup failed"
                );
                LookupOutcome::Failure(failure)
            }
        }
    }
}
