//! Outbound webhook dispatch.
//!
//! Runs inline within the request handling the user's chat turn: the HTTP
//! response to the user is held until the send completes or fails. The
//! eventual answer is decoupled in time via the pending placeholder; the
//! initial acknowledgment is not.

use super::enrich::{ContextEnricher, NoopEnricher};
use super::error::WebhookError;
use super::identity::IdentityMapper;
use super::resolver::CallbackAddressResolver;
use super::{
    mint_error_session_id, mint_session_id, CALLBACK_URL_HEADER, PENDING_PREFIX, SESSION_ID_HEADER,
};
use crate::config::Config;
use crate::storage::Store;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Response text meaning "request accepted, no inline answer; expect a callback".
const ACCEPTED_SENTINEL: &str = "request accepted";

/// Response fields tried, in order, when the provider answers with an object.
const INLINE_REPLY_FIELDS: [&str; 3] = ["reply", "response", "message"];
/// Provider-side request id fields, kept in the placeholder for traceability.
const REQUEST_ID_FIELDS: [&str; 3] = ["request_id", "requestId", "id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    /// Provider acknowledged; the real answer arrives later via callback.
    Accepted,
    /// Provider answered inline; no callback is expected for this session.
    Answered,
    /// Terminal failure. Callers must not retry this user turn.
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    pub reply: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

/// The fixed chat-command envelope the provider expects. Only three fields
/// vary per request; everything else must not change. Cloned per call, never
/// mutated in place, so concurrent sends cannot interfere.
#[derive(Debug, Clone)]
pub struct EnvelopeTemplate {
    template: serde_json::Value,
}

impl Default for EnvelopeTemplate {
    fn default() -> Self {
        Self {
            template: json!({
                "source": "web-portal",
                "channel": "chat",
                "command": "chat_message",
                "version": "1.0",
                "message": "",
                "user_id": "",
                "callback_url": "",
            }),
        }
    }
}

impl EnvelopeTemplate {
    pub fn render(
        &self,
        message: &str,
        external_user_id: &str,
        callback_url: &str,
    ) -> serde_json::Value {
        let mut body = self.template.clone();
        body["message"] = json!(message);
        body["user_id"] = json!(external_user_id);
        body["callback_url"] = json!(callback_url);
        body
    }
}

pub struct WebhookDispatcher {
    endpoint_url: Option<String>,
    send_timeout: Duration,
    client: reqwest::Client,
    identity: IdentityMapper,
    resolver: CallbackAddressResolver,
    enricher: Arc<dyn ContextEnricher>,
    envelope: EnvelopeTemplate,
}

impl WebhookDispatcher {
    pub fn new(config: &Config, store: Arc<dyn Store>) -> Self {
        Self {
            endpoint_url: config.webhook.endpoint_url.clone(),
            send_timeout: Duration::from_secs(config.webhook.send_timeout_secs),
            client: reqwest::Client::new(),
            identity: IdentityMapper::new(store),
            resolver: CallbackAddressResolver::from_config(config),
            enricher: Arc::new(NoopEnricher),
            envelope: EnvelopeTemplate::default(),
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn ContextEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    /// Relay one chat turn. Never returns `Err`: every failure is folded into
    /// a terminal `Error` outcome whose reply text is stored in the
    /// conversation in place of the assistant's answer.
    pub async fn dispatch(
        &self,
        internal_user_id: &str,
        message: &str,
        email: &str,
    ) -> DispatchOutcome {
        match self.try_dispatch(internal_user_id, message, email).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "webhook dispatch failed");
                DispatchOutcome {
                    status: DispatchStatus::Error,
                    reply: format!("The message could not be delivered to the automation endpoint: {err}"),
                    session_id: mint_error_session_id(),
                    timestamp: Utc::now(),
                }
            }
        }
    }

    async fn try_dispatch(
        &self,
        internal_user_id: &str,
        message: &str,
        email: &str,
    ) -> Result<DispatchOutcome, WebhookError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(WebhookError::MissingIdentity);
        }
        let endpoint = self
            .endpoint_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                WebhookError::Configuration("webhook.endpoint_url is not set".to_string())
            })?;

        let external_user_id = self
            .identity
            .resolve_external_id(email, internal_user_id)
            .await?;
        let resolved = self.resolver.resolve_and_validate().await?;
        let session_id = mint_session_id();

        let message_text = match self.enricher.enrich(email, message).await {
            Some(context) => format!("{context}\n\n{message}"),
            None => message.to_string(),
        };
        let body = self
            .envelope
            .render(&message_text, &external_user_id, &resolved.callback_url);

        tracing::info!(
            %session_id,
            callback_url = %resolved.callback_url,
            delivery_mode = ?resolved.delivery_mode,
            "sending webhook message"
        );

        let response = self
            .client
            .post(endpoint)
            .timeout(self.send_timeout)
            .header(SESSION_ID_HEADER, &session_id)
            .header(CALLBACK_URL_HEADER, &resolved.callback_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let raw = response.text().await?;

        let interpreted = interpret_response(&raw);
        let reply = if interpreted.accepted {
            pending_reply(&session_id, interpreted.request_id.as_deref())
        } else {
            interpreted.text
        };

        Ok(DispatchOutcome {
            status: if interpreted.accepted {
                DispatchStatus::Accepted
            } else {
                DispatchStatus::Answered
            },
            reply,
            session_id,
            timestamp: Utc::now(),
        })
    }
}

struct InterpretedResponse {
    accepted: bool,
    text: String,
    request_id: Option<String>,
}

/// Extract the usable text of a provider acknowledgment. Plain strings are
/// taken as-is; objects are searched across the known reply fields; anything
/// else falls back to the raw body.
fn interpret_response(raw: &str) -> InterpretedResponse {
    let mut request_id = None;
    let text = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Object(map)) => {
            request_id = REQUEST_ID_FIELDS.iter().find_map(|field| {
                map.get(*field)
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            });
            INLINE_REPLY_FIELDS
                .iter()
                .find_map(|field| {
                    map.get(*field)
                        .and_then(|v| v.as_str())
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| raw.trim().to_string())
        }
        _ => raw.trim().to_string(),
    };

    let accepted = text.trim().eq_ignore_ascii_case(ACCEPTED_SENTINEL);
    InterpretedResponse {
        accepted,
        text,
        request_id,
    }
}

fn pending_reply(session_id: &str, request_id: Option<&str>) -> String {
    match request_id {
        Some(rid) => format!(
            "{PENDING_PREFIX} Waiting for the final reply (session {session_id}, request {rid})."
        ),
        None => format!("{PENDING_PREFIX} Waiting for the final reply (session {session_id})."),
    }
}
