//! Where flag definitions and remote decisions come from.
//!
//! [`FlagSource`] is the seam between the registry and the network. [`HttpFlagSource`] talks to
//! the PostHog API; tests substitute in-memory sources.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use crate::{
    flags::{DecideRequest, DecideResponse, FlagDefinition, FlagDefinitionsResponse},
    Error, Result,
};

#[async_trait]
pub trait FlagSource: Send + Sync {
    /// Fetch the full listing of flag definitions.
    ///
    /// Must return [`Error::Unauthorized`] when the credentials are rejected.
    async fn fetch_flag_definitions(&self) -> Result<Vec<FlagDefinition>>;

    /// Ask the server which flags are enabled for `distinct_id`.
    async fn decide(&self, distinct_id: &str) -> Result<Vec<String>>;
}

pub struct HttpFlagSourceConfig {
    pub host: String,
    /// Personal API key, used to list flag definitions.
    pub personal_api_key: String,
    /// Project API key, used for remote decisions.
    pub project_api_key: String,
    /// Overall timeout for each request. `None` means no timeout.
    pub timeout: Option<Duration>,
}

const DEFINITIONS_ENDPOINT: &str = "/api/feature_flag/";
const DECIDE_ENDPOINT: &str = "/decide/";

const USER_AGENT: &str = concat!("posthog-rust/", env!("CARGO_PKG_VERSION"));

/// A [`FlagSource`] backed by the PostHog HTTP API.
pub struct HttpFlagSource {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    definitions_url: Url,
    decide_url: Url,
    personal_api_key: String,
    project_api_key: String,
}

impl HttpFlagSource {
    pub fn new(config: HttpFlagSourceConfig) -> Result<HttpFlagSource> {
        let host = config.host.trim_end_matches('/');
        let definitions_url =
            Url::parse(&format!("{host}{DEFINITIONS_ENDPOINT}")).map_err(Error::InvalidHost)?;
        let decide_url =
            Url::parse(&format!("{host}{DECIDE_ENDPOINT}")).map_err(Error::InvalidHost)?;

        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(HttpFlagSource {
            client: builder.build()?,
            definitions_url,
            decide_url,
            personal_api_key: config.personal_api_key,
            project_api_key: config.project_api_key,
        })
    }
}

#[async_trait]
impl FlagSource for HttpFlagSource {
    async fn fetch_flag_definitions(&self) -> Result<Vec<FlagDefinition>> {
        log::debug!(target: "posthog", "fetching feature flag definitions");
        let response = self
            .client
            .get(self.definitions_url.clone())
            .bearer_auth(&self.personal_api_key)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                log::warn!(target: "posthog", "feature flag definitions request is not authorized. Check your personal API key");
                return Err(Error::Unauthorized);
            }
            status if !status.is_success() => {
                log::warn!(target: "posthog", "received non-200 response while fetching feature flag definitions: {:?}", status);
                return Err(Error::UnexpectedStatus(status));
            }
            _ => {}
        }

        let listing: FlagDefinitionsResponse = response.json().await?;
        let definitions = listing.into_definitions();

        log::debug!(target: "posthog", count = definitions.len(); "successfully fetched feature flag definitions");

        Ok(definitions)
    }

    async fn decide(&self, distinct_id: &str) -> Result<Vec<String>> {
        log::trace!(target: "posthog", distinct_id; "requesting remote feature flag decision");
        let response = self
            .client
            .post(self.decide_url.clone())
            .json(&DecideRequest {
                api_key: &self.project_api_key,
                distinct_id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!(target: "posthog", distinct_id; "received non-200 response from decide: {:?}", status);
            return Err(Error::UnexpectedStatus(status));
        }

        let decision: DecideResponse = response.json().await?;

        Ok(decision.feature_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpFlagSource, HttpFlagSourceConfig};
    use crate::Error;

    fn config(host: &str) -> HttpFlagSourceConfig {
        HttpFlagSourceConfig {
            host: host.to_owned(),
            personal_api_key: "personal".to_owned(),
            project_api_key: "project".to_owned(),
            timeout: None,
        }
    }

    #[test]
    fn builds_endpoint_urls() {
        let source = HttpFlagSource::new(config("https://eu.posthog.com")).unwrap();

        assert_eq!(
            source.definitions_url.as_str(),
            "https://eu.posthog.com/api/feature_flag/"
        );
        assert_eq!(source.decide_url.as_str(), "https://eu.posthog.com/decide/");
    }

    #[test]
    fn strips_trailing_slashes_from_host() {
        let source = HttpFlagSource::new(config("http://google.com///")).unwrap();

        assert_eq!(
            source.definitions_url.as_str(),
            "http://google.com/api/feature_flag/"
        );
    }

    #[test]
    fn rejects_invalid_host() {
        let result = HttpFlagSource::new(config("not a host"));

        assert!(matches!(result, Err(Error::InvalidHost(_))));
    }
}
