//! DNS provider boundary for DNS-01 challenges.
//!
//! The ACME supplier publishes challenge TXT records through this trait;
//! concrete providers talk to whatever manages the zone. A generic
//! webhook provider ships here for custom DNS backends.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Result type for DNS operations.
pub type DnsResult<T> = Result<T, DnsProviderError>;

/// Errors that can occur during DNS provider operations.
#[derive(Debug, Error)]
pub enum DnsProviderError {
    /// Record creation failed.
    #[error("failed to create TXT record '{record_name}': {message}")]
    RecordCreation {
        /// The challenge record name.
        record_name: String,
        /// Provider error message.
        message: String,
    },

    /// Record deletion failed.
    #[error("failed to delete TXT record '{record_id}': {message}")]
    RecordDeletion {
        /// The record ID being removed.
        record_id: String,
        /// Provider error message.
        message: String,
    },

    /// API request failed.
    #[error("DNS provider request failed: {0}")]
    ApiRequest(String),

    /// Invalid provider configuration.
    #[error("invalid DNS provider configuration: {0}")]
    Configuration(String),
}

/// Trait for DNS providers that can answer DNS-01 challenges.
///
/// Implementations must be thread-safe; records are created before
/// validation and removed afterwards, even when validation fails.
#[async_trait]
pub trait DnsProvider: Send + Sync + std::fmt::Debug {
    /// The provider name (e.g. "webhook").
    fn name(&self) -> &'static str;

    /// Create a TXT record for a DNS-01 challenge.
    ///
    /// `record_name` is the bare challenge label; the full record is
    /// `{record_name}.{domain}`. Returns a record ID used for cleanup.
    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        record_value: &str,
    ) -> DnsResult<String>;

    /// Delete a TXT record created by [`create_txt_record`].
    ///
    /// Should be idempotent: deleting a record that no longer exists is
    /// not an error.
    ///
    /// [`create_txt_record`]: DnsProvider::create_txt_record
    async fn delete_txt_record(&self, domain: &str, record_id: &str) -> DnsResult<()>;
}

/// ACME challenge record name prefix.
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// TTL for challenge records.
pub const CHALLENGE_TTL: u32 = 60;

/// Strip a wildcard prefix: the challenge for `*.example.com` is placed
/// on `example.com` itself.
#[must_use]
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// Build the full challenge record name for a domain.
#[must_use]
pub fn challenge_record_fqdn(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_RECORD, normalize_domain(domain))
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    domain: &'a str,
    record_name: &'a str,
    record_type: &'a str,
    record_value: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    record_id: String,
}

/// Webhook DNS provider for custom integrations.
///
/// Creates records with `POST {url}/records` and removes them with
/// `DELETE {url}/records/{id}?domain={domain}`. An optional bearer token
/// is sent on every request.
#[derive(Debug)]
pub struct WebhookProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl WebhookProvider {
    /// Create a webhook provider pointing at the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: String, token: Option<String>, timeout: Duration) -> DnsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                DnsProviderError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl DnsProvider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        record_value: &str,
    ) -> DnsResult<String> {
        let url = format!("{}/records", self.base_url);
        let body = CreateRecordRequest {
            domain,
            record_name,
            record_type: "TXT",
            record_value,
            ttl: CHALLENGE_TTL,
        };

        debug!(domain, record_name, "Creating TXT record via webhook");

        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| DnsProviderError::ApiRequest(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DnsProviderError::RecordCreation {
                record_name: record_name.to_string(),
                message: format!("webhook returned {}", response.status()),
            });
        }

        let created: CreateRecordResponse = response
            .json()
            .await
            .map_err(|e| DnsProviderError::ApiRequest(e.to_string()))?;

        Ok(created.record_id)
    }

    async fn delete_txt_record(&self, domain: &str, record_id: &str) -> DnsResult<()> {
        let url = format!(
            "{}/records/{}?domain={}",
            self.base_url, record_id, domain
        );

        debug!(domain, record_id, "Deleting TXT record via webhook");

        let response = self
            .authorize(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| DnsProviderError::ApiRequest(e.to_string()))?;

        // 404 counts as success: the record is already gone.
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(DnsProviderError::RecordDeletion {
                record_id: record_id.to_string(),
                message: format!("webhook returned {}", response.status()),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("example.com"), "example.com");
        assert_eq!(normalize_domain("*.example.com"), "example.com");
        assert_eq!(normalize_domain("sub.example.com"), "sub.example.com");
    }

    #[test]
    fn test_challenge_record_fqdn() {
        assert_eq!(
            challenge_record_fqdn("example.com"),
            "_acme-challenge.example.com"
        );
        assert_eq!(
            challenge_record_fqdn("*.example.com"),
            "_acme-challenge.example.com"
        );
        assert_eq!(
            challenge_record_fqdn("sub.example.com"),
            "_acme-challenge.sub.example.com"
        );
    }

    #[test]
    fn test_error_display() {
        let err = DnsProviderError::RecordCreation {
            record_name: "_acme-challenge".to_string(),
            message: "API error".to_string(),
        };
        assert!(err.to_string().contains("_acme-challenge"));

        let err = DnsProviderError::Configuration("bad url".to_string());
        assert!(err.to_string().contains("bad url"));
    }

    #[test]
    fn test_webhook_provider_trims_trailing_slash() {
        let provider = WebhookProvider::new(
            "https://dns.example.com/api/".to_string(),
            None,
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(provider.base_url, "https://dns.example.com/api");
    }
}
