//! Asynchronous webhook reply reconciliation.
//!
//! Outbound: [`dispatch::WebhookDispatcher`] relays a chat turn to the
//! external automation endpoint after [`resolver::CallbackAddressResolver`]
//! has proven the advertised callback address reachable. The assistant turn
//! is persisted immediately with a sentinel placeholder, so the conversation
//! is durably in flight even across a restart.
//!
//! Inbound: [`reconcile::CallbackReconciler`] receives the provider's later
//! POST, normalizes and authenticates it, resolves it to exactly one pending
//! placeholder, and overwrites that placeholder's content.
//!
//! Correlation state flows as explicit values (session id on the request, on
//! the stored row, on the callback) — never through process-wide mutable
//! state, since multiple dispatches may be in flight across users.

pub mod dispatch;
pub mod enrich;
pub mod error;
pub mod identity;
pub mod reconcile;
pub mod resolver;

pub use dispatch::{DispatchOutcome, DispatchStatus, WebhookDispatcher};
pub use enrich::{ContextEnricher, NoopEnricher};
pub use error::WebhookError;
pub use identity::IdentityMapper;
pub use reconcile::{CallbackApplied, CallbackReconciler, CallbackRejection};
pub use resolver::{CallbackAddressResolver, DeliveryMode, ResolvedCallback};

use chrono::Utc;

/// Sentinel prefix of a pending assistant reply. Load-bearing wire contract:
/// both callback matching and client polling detect in-flight turns by it.
pub const PENDING_PREFIX: &str = "Request accepted by webhook.";

/// Callback route this instance advertises and serves.
pub const CALLBACK_PATH: &str = "/api/chat/webhook/callback";

/// `status` value the GET readiness probe must report.
pub const CALLBACK_READY_STATUS: &str = "callback-ready";

/// Correlation session id header, echoed by the provider for debugging.
pub const SESSION_ID_HEADER: &str = "x-portal-session-id";
/// Advertised callback URL header, echoed by the provider for debugging.
pub const CALLBACK_URL_HEADER: &str = "x-portal-callback-url";

/// Accepted callback secret headers, in lookup order.
pub const SECRET_HEADERS: [&str; 2] = ["x-hookline-secret", "x-webhook-secret"];

/// Mint a correlation session id for an outbound send. Monotonic-ish so
/// concurrent sends across users stay distinguishable in logs.
pub fn mint_session_id() -> String {
    format!("webhook_session_{}", Utc::now().timestamp_millis())
}

/// Session id used on the terminal error path. Placeholders created with it
/// never receive a callback.
pub fn mint_error_session_id() -> String {
    format!("error_session_{}", Utc::now().timestamp_millis())
}

/// Whether a stored assistant reply is still waiting for its callback.
pub fn is_pending(content: &str) -> bool {
    content.starts_with(PENDING_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_carry_the_expected_shape() {
        assert!(mint_session_id().starts_with("webhook_session_"));
        assert!(mint_error_session_id().starts_with("error_session_"));
    }

    #[test]
    fn pending_detection_is_prefix_based() {
        assert!(is_pending("Request accepted by webhook. Waiting."));
        assert!(!is_pending("Paris is the capital of France."));
        assert!(!is_pending(" Request accepted by webhook."));
    }
}
