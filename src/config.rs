use std::time::Duration;

use crate::{
    flag_called_callback::NoopFeatureFlagCalledCallback, Client, FeatureFlagCalledCallback, Result,
};

/// Configuration for [`Client`].
///
/// # Examples
/// ```no_run
/// # async fn run() -> posthog_flags::Result<()> {
/// # use posthog_flags::{ClientConfig, FeatureFlagCalled};
/// let client = ClientConfig::from_api_key("project-api-key")
///     .personal_api_key("personal-api-key")
///     .feature_flag_called_callback(|event: FeatureFlagCalled| {
///         println!("{:?}", event);
///     })
///     .to_client()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) personal_api_key: Option<String>,
    pub(crate) host: String,
    pub(crate) polling_interval: Duration,
    pub(crate) polling_jitter: Duration,
    pub(crate) timeout: Option<Duration>,
    pub(crate) feature_flag_called_callback: Box<dyn FeatureFlagCalledCallback + Send + Sync>,
}

impl ClientConfig {
    /// Create a default configuration using the specified project API key.
    ///
    /// ```
    /// # use posthog_flags::ClientConfig;
    /// ClientConfig::from_api_key("project-api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            personal_api_key: None,
            host: ClientConfig::DEFAULT_HOST.to_owned(),
            polling_interval: ClientConfig::DEFAULT_POLLING_INTERVAL,
            polling_jitter: Duration::ZERO,
            timeout: None,
            feature_flag_called_callback: Box::new(NoopFeatureFlagCalledCallback),
        }
    }

    /// Default PostHog host.
    pub const DEFAULT_HOST: &'static str = "https://app.posthog.com";

    /// Default interval between feature flag refreshes.
    pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);

    /// Set the personal API key. Required to evaluate feature flags, as listing flag definitions
    /// is not possible with a project API key.
    pub fn personal_api_key(mut self, personal_api_key: impl Into<String>) -> Self {
        self.personal_api_key = Some(personal_api_key.into());
        self
    }

    /// Override the PostHog host, e.g. for self-hosted instances. Trailing slashes are removed.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into().trim_end_matches('/').to_owned();
        self
    }

    /// Set the interval between feature flag refreshes.
    pub fn polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    /// Randomize each polling interval by subtracting up to `jitter`, capped at half of the
    /// polling interval.
    pub fn polling_jitter(mut self, jitter: Duration) -> Self {
        self.polling_jitter = jitter;
        self
    }

    /// Set an overall timeout for each request to PostHog.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a callback that is notified every time a feature flag is evaluated, e.g. to track flag
    /// usage.
    pub fn feature_flag_called_callback(
        mut self,
        callback: impl FeatureFlagCalledCallback + Send + Sync + 'static,
    ) -> Self {
        self.feature_flag_called_callback = Box::new(callback);
        self
    }

    /// Create a new [`Client`] using this configuration.
    ///
    /// Must be called from within a Tokio runtime if a personal API key is set, as it starts
    /// loading feature flags in the background.
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }
}
