//! Error taxonomy of the dispatch path.
//!
//! Every variant is terminal for the triggering request: nothing here is
//! retried, and the dispatcher folds the error into a human-readable reply
//! stored in the conversation as if it were the assistant's answer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing or unusable configuration (endpoint URL, secret).
    #[error("webhook configuration error: {0}")]
    Configuration(String),

    /// The system requires an authenticated email to ever send a message.
    #[error("an authenticated email is required to send a webhook message")]
    MissingIdentity,

    /// Callback URL failed static validation (scheme, blocked tunnel host).
    #[error("invalid callback configuration: {0}")]
    InvalidCallbackConfig(String),

    /// The health probe got a 2xx that did not report the ready sentinel.
    #[error("callback health check at {url} returned an unexpected body")]
    HealthCheckMismatch { url: String },

    /// Neither the public callback address nor the local fallback answered.
    #[error("callback address is not reachable: {0}")]
    CallbackUnreachable(String),

    /// Transport failure talking to the provider or the probe target.
    #[error("network error talking to webhook provider: {0}")]
    Network(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}
