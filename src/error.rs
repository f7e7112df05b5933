use std::sync::Arc;

/// Result type used throughout the SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or evaluating feature flags.
///
/// `Error` is `Clone` so that a single refresh result can be handed to every caller that joined
/// the same in-flight refresh.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The feature flag definitions request was rejected with 401 Unauthorized.
    ///
    /// This is a configuration problem: the personal API key is invalid, most likely because a
    /// project API key was passed in its place. It is not retried automatically.
    #[error("personal_api_key is invalid, make sure you're not using your project API key")]
    Unauthorized,

    /// Feature flags were used without configuring a personal API key.
    #[error("personal_api_key must be specified to use feature flags")]
    MissingPersonalApiKey,

    /// The project API key is empty.
    #[error("project API key must be specified")]
    MissingProjectApiKey,

    /// Invalid host configuration.
    #[error("invalid host configuration")]
    InvalidHost(#[source] url::ParseError),

    /// The server answered with a non-success status other than 401.
    #[error("unexpected response status: {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    /// Network error, timeout, or a response body that could not be decoded.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// The registry was started outside of a Tokio runtime.
    #[error("feature flag registry must be started from within a Tokio runtime")]
    NoRuntime,

    /// The registry has been shut down and no longer refreshes.
    #[error("feature flag registry has been shut down")]
    ShutDown,
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl Error {
    /// Returns `true` for errors that will not go away by retrying the same request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized
                | Error::MissingPersonalApiKey
                | Error::MissingProjectApiKey
                | Error::InvalidHost(_)
                | Error::NoRuntime
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn unauthorized_is_fatal() {
        assert!(Error::Unauthorized.is_fatal());
        assert!(!Error::ShutDown.is_fatal());
    }

    #[test]
    fn unauthorized_message_mentions_key_type() {
        assert!(Error::Unauthorized
            .to_string()
            .contains("not using your project API key"));
    }
}
