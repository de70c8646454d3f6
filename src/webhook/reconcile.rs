//! Inbound callback reconciliation.
//!
//! Each inbound call moves through Received → Authenticated → Normalized →
//! Matched → Applied, or stops at the first rejection. The provider's payload
//! may be strict JSON, a JSON-like string with broken escaping, or form data;
//! normalization recovers what it can before matching. A rejected payload is
//! dropped — there is no retry queue.

use super::identity::IdentityMapper;
use super::PENDING_PREFIX;
use crate::security::{constant_time_eq, hash_secret};
use crate::storage::{MessageRow, Store};
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

/// Field name synonyms per concept, in lookup order.
const SESSION_FIELDS: [&str; 2] = ["sessionId", "session_id"];
const USER_FIELDS: [&str; 2] = ["userId", "user_id"];
const REPLY_FIELDS: [&str; 4] = ["reply", "response", "message", "text"];
const SECRET_FIELDS: [&str; 1] = ["secret"];

/// Normalized callback payload. Ephemeral — never persisted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    /// Session id from a top-level field. Outranks every other source.
    pub session_id: Option<String>,
    /// Session id found only inside the nested `body` object. Ranked below
    /// the correlation header.
    pub nested_session_id: Option<String>,
    pub external_user_id: Option<String>,
    pub reply_text: Option<String>,
    pub secret: Option<String>,
    pub raw_body: Option<String>,
}

#[derive(Debug, Error)]
pub enum CallbackRejection {
    #[error("Invalid callback secret")]
    Unauthenticated,
    #[error("Unparseable callback payload")]
    Unparseable,
    #[error("Missing reply text in callback payload")]
    MissingReplyText,
    #[error("No pending assistant message found for callback")]
    NoPendingMessage,
    #[error("Failed to process webhook callback")]
    Internal(#[source] anyhow::Error),
}

impl CallbackRejection {
    pub fn status_code(&self) -> u16 {
        match self {
            CallbackRejection::Unauthenticated => 401,
            CallbackRejection::Unparseable | CallbackRejection::MissingReplyText => 400,
            CallbackRejection::NoPendingMessage => 404,
            CallbackRejection::Internal(_) => 500,
        }
    }
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone)]
pub struct CallbackApplied {
    pub conversation_id: i64,
    pub message_id: i64,
    pub session_id: Option<String>,
}

/// The parts of the inbound request the reconciler needs, pre-extracted so
/// the state machine stays independent of the HTTP layer.
#[derive(Debug, Default)]
pub struct InboundCallback<'a> {
    pub content_type: Option<&'a str>,
    /// Values of the accepted secret headers, in header order.
    pub header_secrets: [Option<&'a str>; 2],
    /// Session id echoed back via the correlation header.
    pub header_session: Option<&'a str>,
    pub query_secret: Option<&'a str>,
    pub body: &'a str,
}

/// Ordered matcher strategies; the first one to produce a row wins. Adding a
/// strategy means extending this list, not nesting another conditional.
#[derive(Debug, Clone, Copy)]
enum MatchStrategy {
    BySessionId,
    ByExternalUserId,
}

const MATCH_ORDER: [MatchStrategy; 2] =
    [MatchStrategy::BySessionId, MatchStrategy::ByExternalUserId];

pub struct CallbackReconciler {
    store: Arc<dyn Store>,
    identity: IdentityMapper,
    secret: Option<String>,
}

impl CallbackReconciler {
    pub fn new(store: Arc<dyn Store>, secret: Option<String>) -> Self {
        let identity = IdentityMapper::new(store.clone());
        Self {
            store,
            identity,
            secret: secret
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    pub async fn reconcile(
        &self,
        request: InboundCallback<'_>,
    ) -> Result<CallbackApplied, CallbackRejection> {
        let payload = normalize_callback_payload(request.content_type, request.body);

        self.authenticate(&request, &payload)?;

        if request.body.trim().is_empty() {
            return Err(CallbackRejection::Unparseable);
        }
        let reply_text = payload
            .reply_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CallbackRejection::MissingReplyText)?;

        // Top-level field, then the correlation header, then the nested
        // `body` object.
        let session_id = payload
            .session_id
            .as_deref()
            .or(request.header_session)
            .or(payload.nested_session_id.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        tracing::debug!(
            session_id = session_id.unwrap_or("-"),
            user_id = payload.external_user_id.as_deref().unwrap_or("-"),
            "callback fields extracted"
        );

        for strategy in MATCH_ORDER {
            let matched = self
                .try_strategy(strategy, session_id, payload.external_user_id.as_deref())
                .await
                .map_err(CallbackRejection::Internal)?;
            if let Some(message) = matched {
                return self.apply(message, reply_text).await;
            }
        }

        tracing::warn!("callback matched no pending assistant message, dropping reply");
        Err(CallbackRejection::NoPendingMessage)
    }

    /// If a shared secret is configured, some provided secret (header, body
    /// field, or query field) must equal it. Rejections leak nothing about
    /// matching state.
    fn authenticate(
        &self,
        request: &InboundCallback<'_>,
        payload: &CallbackPayload,
    ) -> Result<(), CallbackRejection> {
        let Some(expected) = self.secret.as_deref() else {
            return Ok(());
        };

        let provided: Vec<&str> = request
            .header_secrets
            .iter()
            .flatten()
            .copied()
            .chain(payload.secret.as_deref())
            .chain(request.query_secret)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        for candidate in &provided {
            if constant_time_eq(candidate, expected) {
                return Ok(());
            }
        }
        // Hash fingerprint lets operators correlate a misconfigured provider
        // without ever logging the value it sent.
        tracing::warn!(
            candidates = provided.len(),
            fingerprint = %provided
                .first()
                .map(|s| hash_secret(s)[..8].to_string())
                .unwrap_or_default(),
            "callback secret validation failed"
        );
        Err(CallbackRejection::Unauthenticated)
    }

    async fn try_strategy(
        &self,
        strategy: MatchStrategy,
        session_id: Option<&str>,
        external_user_id: Option<&str>,
    ) -> anyhow::Result<Option<MessageRow>> {
        match strategy {
            MatchStrategy::BySessionId => {
                let Some(session_id) = session_id else {
                    return Ok(None);
                };
                let found = self.store.latest_assistant_by_session(session_id).await?;
                tracing::debug!(session_id, found = found.is_some(), "session lookup");
                Ok(found)
            }
            MatchStrategy::ByExternalUserId => {
                let Some(external_id) = external_user_id else {
                    return Ok(None);
                };
                let Some(email) = self.identity.email_for_external_id(external_id).await? else {
                    tracing::debug!(external_id, "no identity mapping for callback user id");
                    return Ok(None);
                };
                let Some(user) = self.store.user_by_email(&email).await? else {
                    return Ok(None);
                };
                let Some(conversation) =
                    self.store.latest_conversation_for_user(user.id).await?
                else {
                    return Ok(None);
                };
                let found = self
                    .store
                    .latest_pending_in_conversation(conversation.id, PENDING_PREFIX)
                    .await?;
                tracing::debug!(
                    external_id,
                    conversation_id = conversation.id,
                    found = found.is_some(),
                    "pending message lookup"
                );
                Ok(found)
            }
        }
    }

    async fn apply(
        &self,
        message: MessageRow,
        reply_text: &str,
    ) -> Result<CallbackApplied, CallbackRejection> {
        self.store
            .update_message_content(message.id, reply_text)
            .await
            .map_err(CallbackRejection::Internal)?;
        self.store
            .touch_conversation(message.conversation_id)
            .await
            .map_err(CallbackRejection::Internal)?;

        tracing::info!(
            message_id = message.id,
            conversation_id = message.conversation_id,
            session_id = message.session_id.as_deref().unwrap_or("-"),
            "callback applied to pending message"
        );

        Ok(CallbackApplied {
            conversation_id: message.conversation_id,
            message_id: message.id,
            session_id: message.session_id,
        })
    }
}

/// Normalize whatever the provider sent into a [`CallbackPayload`].
///
/// Structured JSON is used directly (consulting a nested `body` object for
/// each field). Form-encoded bodies are decoded pair-wise. Anything else gets
/// a strict JSON parse, then field-level regex recovery — some providers emit
/// literal unescaped control characters inside JSON string values, which
/// breaks strict parsers but leaves the fields extractable.
pub fn normalize_callback_payload(content_type: Option<&str>, raw: &str) -> CallbackPayload {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CallbackPayload::default();
    }

    if content_type
        .map(str::to_ascii_lowercase)
        .is_some_and(|ct| ct.contains("application/x-www-form-urlencoded"))
    {
        return payload_from_form(trimmed);
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => payload_from_object(&map),
        // A doubly-encoded JSON string: unwrap one level and retry.
        Ok(serde_json::Value::String(inner)) => normalize_callback_payload(None, &inner),
        Ok(_) => CallbackPayload {
            raw_body: Some(raw.to_string()),
            ..CallbackPayload::default()
        },
        Err(_) => payload_from_raw(raw),
    }
}

fn first_string(map: &serde_json::Map<String, serde_json::Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        map.get(*field)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn payload_from_object(map: &serde_json::Map<String, serde_json::Value>) -> CallbackPayload {
    let nested = map.get("body").and_then(|v| v.as_object());
    let pick = |fields: &[&str]| {
        first_string(map, fields).or_else(|| nested.and_then(|n| first_string(n, fields)))
    };
    CallbackPayload {
        // Kept apart from the nested hit so the caller can rank the
        // correlation header between them.
        session_id: first_string(map, &SESSION_FIELDS),
        nested_session_id: nested.and_then(|n| first_string(n, &SESSION_FIELDS)),
        external_user_id: pick(&USER_FIELDS),
        reply_text: pick(&REPLY_FIELDS),
        secret: pick(&SECRET_FIELDS),
        raw_body: None,
    }
}

fn payload_from_form(raw: &str) -> CallbackPayload {
    let mut payload = CallbackPayload {
        raw_body: Some(raw.to_string()),
        ..CallbackPayload::default()
    };
    for pair in raw.split('&') {
        let mut parts = pair.splitn(2, '=');
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(key) = urlencoding::decode(key) else {
            continue;
        };
        let value = value.replace('+', " ");
        let Ok(value) = urlencoding::decode(&value) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let slot = if SESSION_FIELDS.contains(&key.as_ref()) {
            &mut payload.session_id
        } else if USER_FIELDS.contains(&key.as_ref()) {
            &mut payload.external_user_id
        } else if REPLY_FIELDS.contains(&key.as_ref()) {
            &mut payload.reply_text
        } else if SECRET_FIELDS.contains(&key.as_ref()) {
            &mut payload.secret
        } else {
            continue;
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
    payload
}

fn payload_from_raw(raw: &str) -> CallbackPayload {
    CallbackPayload {
        session_id: extract_field(raw, &SESSION_FIELDS),
        nested_session_id: None,
        external_user_id: extract_field(raw, &USER_FIELDS),
        reply_text: extract_field(raw, &REPLY_FIELDS),
        secret: extract_field(raw, &SECRET_FIELDS),
        raw_body: Some(raw.to_string()),
    }
}

/// Pull `"field": "..."` out of a malformed JSON-like string. `(?s)` lets the
/// capture span the literal newlines that broke the strict parse.
fn extract_field(raw: &str, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        let pattern = format!(
            r#""{}"\s*:\s*"((?s).*?)"\s*[,}}]"#,
            regex::escape(field)
        );
        let re = Regex::new(&pattern).ok()?;
        re.captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|v| !v.trim().is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Role, SqliteStore};
    use crate::webhook::PENDING_PREFIX;

    // ── normalization ────────────────────────────────────────

    #[test]
    fn strict_json_and_broken_escaping_normalize_identically() {
        let strict = r#"{"sessionId": "webhook_session_42", "reply": "line one\nline two"}"#;
        let broken = "{\"sessionId\": \"webhook_session_42\", \"reply\": \"line one\nline two\"}";

        let a = normalize_callback_payload(Some("application/json"), strict);
        let b = normalize_callback_payload(Some("application/json"), broken);

        assert_eq!(a.session_id.as_deref(), Some("webhook_session_42"));
        assert_eq!(b.session_id.as_deref(), Some("webhook_session_42"));
        assert_eq!(a.reply_text.as_deref(), Some("line one\nline two"));
        assert_eq!(b.reply_text.as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn synonym_fields_are_tried_in_order() {
        let payload = normalize_callback_payload(
            None,
            r#"{"session_id": "s-1", "user_id": "u-1", "text": "hi"}"#,
        );
        assert_eq!(payload.session_id.as_deref(), Some("s-1"));
        assert_eq!(payload.external_user_id.as_deref(), Some("u-1"));
        assert_eq!(payload.reply_text.as_deref(), Some("hi"));
    }

    #[test]
    fn nested_body_object_is_consulted() {
        let payload = normalize_callback_payload(
            None,
            r#"{"body": {"sessionId": "s-9", "reply": "nested"}}"#,
        );
        assert!(payload.session_id.is_none());
        assert_eq!(payload.nested_session_id.as_deref(), Some("s-9"));
        assert_eq!(payload.reply_text.as_deref(), Some("nested"));
    }

    #[test]
    fn top_level_session_outranks_nested_one() {
        let payload = normalize_callback_payload(
            None,
            r#"{"sessionId": "outer", "body": {"sessionId": "inner", "reply": "r"}}"#,
        );
        assert_eq!(payload.session_id.as_deref(), Some("outer"));
        assert_eq!(payload.nested_session_id.as_deref(), Some("inner"));
    }

    #[test]
    fn form_bodies_decode_pairwise() {
        let payload = normalize_callback_payload(
            Some("application/x-www-form-urlencoded"),
            "sessionId=webhook_session_7&reply=hello+world&secret=s3cret",
        );
        assert_eq!(payload.session_id.as_deref(), Some("webhook_session_7"));
        assert_eq!(payload.reply_text.as_deref(), Some("hello world"));
        assert_eq!(payload.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn doubly_encoded_string_is_unwrapped() {
        let payload = normalize_callback_payload(
            None,
            r#""{\"reply\": \"inner\"}""#,
        );
        assert_eq!(payload.reply_text.as_deref(), Some("inner"));
    }

    #[test]
    fn empty_body_yields_empty_payload() {
        assert_eq!(
            normalize_callback_payload(None, "   "),
            CallbackPayload::default()
        );
    }

    // ── reconciliation scenarios ─────────────────────────────

    struct Fixture {
        store: Arc<SqliteStore>,
        reconciler: CallbackReconciler,
        conversation_id: i64,
        pending_id: i64,
        session_id: String,
    }

    async fn fixture(secret: Option<&str>) -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let user = store.ensure_user("alice@example.com", None).await.unwrap();
        store
            .insert_identity("alice@example.com", "u-99")
            .await
            .unwrap();
        let conversation = store
            .create_conversation(user.id, "New Conversation")
            .await
            .unwrap();
        store
            .append_message(conversation.id, Role::User, "What is the capital of France?", None)
            .await
            .unwrap();
        let session_id = "webhook_session_42".to_string();
        let pending = store
            .append_message(
                conversation.id,
                Role::Assistant,
                &format!("{PENDING_PREFIX} Waiting for the final reply (session {session_id})."),
                Some(&session_id),
            )
            .await
            .unwrap();
        let reconciler =
            CallbackReconciler::new(store.clone(), secret.map(str::to_string));
        Fixture {
            store,
            reconciler,
            conversation_id: conversation.id,
            pending_id: pending.id,
            session_id,
        }
    }

    fn json_callback(body: &str) -> InboundCallback<'_> {
        InboundCallback {
            content_type: Some("application/json"),
            body,
            ..InboundCallback::default()
        }
    }

    #[tokio::test]
    async fn callback_with_session_id_updates_exact_row() {
        let fx = fixture(None).await;
        let body = format!(
            r#"{{"sessionId": "{}", "reply": "Paris is the capital of France."}}"#,
            fx.session_id
        );
        let before = fx
            .store
            .conversation(fx.conversation_id)
            .await
            .unwrap()
            .unwrap()
            .updated_at;

        let applied = fx.reconciler.reconcile(json_callback(&body)).await.unwrap();
        assert_eq!(applied.message_id, fx.pending_id);
        assert_eq!(applied.conversation_id, fx.conversation_id);
        assert_eq!(applied.session_id.as_deref(), Some(fx.session_id.as_str()));

        let messages = fx.store.messages(fx.conversation_id).await.unwrap();
        assert_eq!(messages[1].content, "Paris is the capital of France.");

        let after = fx
            .store
            .conversation(fx.conversation_id)
            .await
            .unwrap()
            .unwrap()
            .updated_at;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn callback_with_only_user_id_finds_pending_placeholder() {
        let fx = fixture(None).await;
        let body = r#"{"userId": "u-99", "reply": "Matched by user."}"#;
        let applied = fx.reconciler.reconcile(json_callback(body)).await.unwrap();
        assert_eq!(applied.message_id, fx.pending_id);

        let messages = fx.store.messages(fx.conversation_id).await.unwrap();
        assert_eq!(messages[1].content, "Matched by user.");
    }

    #[tokio::test]
    async fn consumed_session_no_longer_matches_by_user() {
        let fx = fixture(None).await;
        let body = r#"{"userId": "u-99", "reply": "first answer"}"#;
        fx.reconciler.reconcile(json_callback(body)).await.unwrap();

        // The sentinel prefix is gone, so the user-id strategy finds nothing.
        let again = fx
            .reconciler
            .reconcile(json_callback(r#"{"userId": "u-99", "reply": "second answer"}"#))
            .await
            .unwrap_err();
        assert!(matches!(again, CallbackRejection::NoPendingMessage));
    }

    #[tokio::test]
    async fn session_id_wins_over_user_id() {
        let fx = fixture(None).await;
        let body = format!(
            r#"{{"sessionId": "{}", "userId": "unmapped-user", "reply": "by session"}}"#,
            fx.session_id
        );
        let applied = fx.reconciler.reconcile(json_callback(&body)).await.unwrap();
        assert_eq!(applied.message_id, fx.pending_id);
    }

    #[tokio::test]
    async fn header_session_id_is_a_fallback() {
        let fx = fixture(None).await;
        let request = InboundCallback {
            content_type: Some("application/json"),
            header_session: Some(fx.session_id.as_str()),
            body: r#"{"reply": "via header"}"#,
            ..InboundCallback::default()
        };
        let applied = fx.reconciler.reconcile(request).await.unwrap();
        assert_eq!(applied.message_id, fx.pending_id);
    }

    #[tokio::test]
    async fn header_session_outranks_nested_body_session() {
        let fx = fixture(None).await;
        // The nested body names a session that matches nothing; the header
        // names the pending one and ranks higher.
        let request = InboundCallback {
            content_type: Some("application/json"),
            header_session: Some(fx.session_id.as_str()),
            body: r#"{"body": {"sessionId": "webhook_session_999"}, "reply": "via header"}"#,
            ..InboundCallback::default()
        };
        let applied = fx.reconciler.reconcile(request).await.unwrap();
        assert_eq!(applied.message_id, fx.pending_id);
    }

    #[tokio::test]
    async fn unmatched_callback_is_dropped_with_404() {
        let fx = fixture(None).await;
        let err = fx
            .reconciler
            .reconcile(json_callback(
                r#"{"sessionId": "webhook_session_999", "reply": "orphan"}"#,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, CallbackRejection::NoPendingMessage));

        // Nothing changed.
        let messages = fx.store.messages(fx.conversation_id).await.unwrap();
        assert!(messages[1].content.starts_with(PENDING_PREFIX));
    }

    #[tokio::test]
    async fn missing_reply_text_is_rejected() {
        let fx = fixture(None).await;
        let err = fx
            .reconciler
            .reconcile(json_callback(r#"{"sessionId": "webhook_session_42"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, CallbackRejection::MissingReplyText));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn empty_body_is_unparseable() {
        let fx = fixture(None).await;
        let err = fx.reconciler.reconcile(json_callback("")).await.unwrap_err();
        assert!(matches!(err, CallbackRejection::Unparseable));
    }

    // ── secret matrix ────────────────────────────────────────

    #[tokio::test]
    async fn wrong_secret_everywhere_is_rejected_and_leaves_state_alone() {
        let fx = fixture(Some("right")).await;
        let request = InboundCallback {
            content_type: Some("application/json"),
            header_secrets: [Some("wrong"), None],
            query_secret: Some("also-wrong"),
            body: r#"{"sessionId": "webhook_session_42", "reply": "x", "secret": "wrong"}"#,
            ..InboundCallback::default()
        };
        let err = fx.reconciler.reconcile(request).await.unwrap_err();
        assert!(matches!(err, CallbackRejection::Unauthenticated));
        assert_eq!(err.status_code(), 401);

        let messages = fx.store.messages(fx.conversation_id).await.unwrap();
        assert!(messages[1].content.starts_with(PENDING_PREFIX));
    }

    #[tokio::test]
    async fn secret_in_any_single_position_is_accepted() {
        for position in ["header1", "header2", "body", "query"] {
            let fx = fixture(Some("right")).await;
            let body_with_secret = format!(
                r#"{{"sessionId": "{}", "reply": "ok", "secret": "right"}}"#,
                fx.session_id
            );
            let body_plain = format!(
                r#"{{"sessionId": "{}", "reply": "ok"}}"#,
                fx.session_id
            );
            let request = match position {
                "header1" => InboundCallback {
                    header_secrets: [Some("right"), None],
                    body: &body_plain,
                    ..InboundCallback::default()
                },
                "header2" => InboundCallback {
                    header_secrets: [None, Some("right")],
                    body: &body_plain,
                    ..InboundCallback::default()
                },
                "body" => InboundCallback {
                    body: &body_with_secret,
                    ..InboundCallback::default()
                },
                _ => InboundCallback {
                    query_secret: Some("right"),
                    body: &body_plain,
                    ..InboundCallback::default()
                },
            };
            fx.reconciler
                .reconcile(request)
                .await
                .unwrap_or_else(|e| panic!("secret via {position} rejected: {e}"));
        }
    }

    #[tokio::test]
    async fn missing_secret_when_configured_is_rejected() {
        let fx = fixture(Some("right")).await;
        let err = fx
            .reconciler
            .reconcile(json_callback(
                r#"{"sessionId": "webhook_session_42", "reply": "x"}"#,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, CallbackRejection::Unauthenticated));
    }

    #[tokio::test]
    async fn no_configured_secret_accepts_anything() {
        let fx = fixture(None).await;
        let body = format!(
            r#"{{"sessionId": "{}", "reply": "open", "secret": "whatever"}}"#,
            fx.session_id
        );
        fx.reconciler.reconcile(json_callback(&body)).await.unwrap();
    }

    #[tokio::test]
    async fn broken_escaping_still_reconciles_by_session() {
        let fx = fixture(None).await;
        // Literal newline inside a JSON string value: strict parse fails,
        // regex recovery still finds both fields.
        let body = format!(
            "{{\"sessionId\": \"{}\", \"reply\": \"Paris is\nthe capital.\"}}",
            fx.session_id
        );
        let applied = fx.reconciler.reconcile(json_callback(&body)).await.unwrap();
        assert_eq!(applied.message_id, fx.pending_id);
        let messages = fx.store.messages(fx.conversation_id).await.unwrap();
        assert_eq!(messages[1].content, "Paris is\nthe capital.");
    }
}
