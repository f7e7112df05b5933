//! Feature flags for PostHog, the product analytics platform.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that answers "is feature flag K enabled for user D".
//! Flag definitions are fetched from PostHog with a personal API key, cached locally in a
//! [`FlagRegistry`], and refreshed in the background on a fixed interval.
//!
//! Simple flags (those that only depend on a rollout percentage) are evaluated locally: every user
//! is hashed into a stable bucket, so the same user always gets the same answer and the answer
//! agrees with other PostHog libraries. Flags that depend on user properties are evaluated by
//! PostHog's decide endpoint.
//!
//! A [`FeatureFlagCalledCallback`] can be provided to record which user saw which flag value.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Flag evaluation fails open: if flags can't be loaded or a flag doesn't exist, the caller's
//! default is returned. The notable exception is [`Error::Unauthorized`], which means the personal
//! API key is invalid (often because a project API key was used instead) and needs fixing.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `posthog` target.
//! Consider integrating a `log`-compatible logger implementation for better visibility into SDK
//! operations.
//!
//! # Runtime
//!
//! Flag loading runs on [Tokio](https://tokio.rs). Clients with a personal API key must be created
//! from within a Tokio runtime.

#![warn(rustdoc::missing_crate_level_docs)]

mod bucketer;
mod client;
mod config;
mod error;
mod flag_called_callback;
mod flag_source;
mod flag_store;
mod flags;
mod registry;

pub use bucketer::{is_simple_flag_enabled, Bucketer, Sha1Bucketer};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use flag_called_callback::{FeatureFlagCalled, FeatureFlagCalledCallback};
pub use flag_source::{FlagSource, HttpFlagSource, HttpFlagSourceConfig};
pub use flags::{FlagDefinition, FlagSnapshot};
pub use registry::{FlagRegistry, RegistryConfig};
