use std::sync::Arc;

use crate::{
    flag_source::{HttpFlagSource, HttpFlagSourceConfig},
    flags::FlagSnapshot,
    registry::{FlagRegistry, RegistryConfig},
    ClientConfig, Error, FeatureFlagCalled, FeatureFlagCalledCallback, Result,
};

/// A PostHog client for evaluating feature flags.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// Feature flags require a personal API key. When one is configured, the client starts loading
/// flag definitions in the background as soon as it is created and refreshes them every polling
/// interval until [`Client::shutdown`] is called or the client is dropped.
///
/// # Examples
/// ```no_run
/// # async fn run() -> posthog_flags::Result<()> {
/// # use posthog_flags::{Client, ClientConfig};
/// let client = Client::new(
///     ClientConfig::from_api_key("project-api-key").personal_api_key("personal-api-key"),
/// )?;
/// let enabled = client.is_feature_enabled("beta-feature", "user-id", false).await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    flags: Option<FlagRegistry>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingProjectApiKey`] if the project API key is empty.
    /// - [`Error::InvalidHost`] if the host is not a valid URL.
    /// - [`Error::NoRuntime`] if a personal API key is set and this is called outside of a Tokio
    ///   runtime.
    pub fn new(config: ClientConfig) -> Result<Client> {
        if config.api_key.is_empty() {
            return Err(Error::MissingProjectApiKey);
        }

        let Some(personal_api_key) = config.personal_api_key else {
            log::debug!(target: "posthog", "no personal API key configured, feature flags are disabled");
            return Ok(Client { flags: None });
        };

        let source = HttpFlagSource::new(HttpFlagSourceConfig {
            host: config.host,
            personal_api_key,
            project_api_key: config.api_key,
            timeout: config.timeout,
        })?;

        let flags = FlagRegistry::start(
            Arc::new(source),
            RegistryConfig::new()
                .with_interval(config.polling_interval)
                .with_jitter(config.polling_jitter),
            CallbackAdapter(config.feature_flag_called_callback),
        )?;

        Ok(Client { flags: Some(flags) })
    }

    /// Check whether feature flag `key` is enabled for `distinct_id`.
    ///
    /// Returns `default_result` if the flag doesn't exist or flags could not be loaded.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingPersonalApiKey`] if the client was created without a personal API key.
    /// - [`Error::Unauthorized`] if the personal API key was rejected.
    /// - [`Error::Network`] or [`Error::UnexpectedStatus`] if a remote decision failed.
    pub async fn is_feature_enabled(
        &self,
        key: &str,
        distinct_id: &str,
        default_result: bool,
    ) -> Result<bool> {
        self.registry()?
            .is_enabled(key, distinct_id, default_result)
            .await
    }

    /// Reload feature flag definitions now.
    pub async fn reload_feature_flags(&self) -> Result<()> {
        self.registry()?.force_refresh().await
    }

    /// Wait for the first feature flag load to complete.
    pub async fn wait_for_feature_flags(&self) -> Result<()> {
        self.registry()?.wait_for_flags().await
    }

    /// Currently loaded feature flags, or `None` if they haven't been loaded yet.
    pub fn feature_flags(&self) -> Option<Arc<FlagSnapshot>> {
        self.flags.as_ref()?.snapshot()
    }

    /// Stop refreshing feature flags in the background.
    pub fn shutdown(&self) {
        if let Some(flags) = &self.flags {
            flags.shutdown();
        }
    }

    fn registry(&self) -> Result<&FlagRegistry> {
        self.flags.as_ref().ok_or(Error::MissingPersonalApiKey)
    }
}

/// Lets the boxed callback from [`ClientConfig`] be handed to the registry.
struct CallbackAdapter(Box<dyn FeatureFlagCalledCallback + Send + Sync>);

impl FeatureFlagCalledCallback for CallbackAdapter {
    fn on_feature_flag_called(&self, event: FeatureFlagCalled) {
        self.0.on_feature_flag_called(event);
    }
}

#[cfg(test)]
mod tests {
    use super::Client;
    use crate::{ClientConfig, Error};

    #[test]
    fn requires_project_api_key() {
        let result = Client::new(ClientConfig::from_api_key(""));

        assert!(matches!(result, Err(Error::MissingProjectApiKey)));
    }

    #[tokio::test]
    async fn feature_flags_require_personal_api_key() {
        let client = Client::new(ClientConfig::from_api_key("key")).unwrap();

        let result = client.is_feature_enabled("simpleFlag", "some id", false).await;

        assert!(matches!(result, Err(Error::MissingPersonalApiKey)));
        assert!(client.feature_flags().is_none());
        client.shutdown();
    }

    #[tokio::test]
    async fn rejects_invalid_host() {
        let result = Client::new(
            ClientConfig::from_api_key("key")
                .personal_api_key("secret")
                .host("not a host"),
        );

        assert!(matches!(result, Err(Error::InvalidHost(_))));
    }
}
