//! Axum HTTP gateway: authenticated chat API plus the public callback route.
//!
//! The callback route is mounted with no session auth in front of it — the
//! provider posts there without a portal login, and the shared-secret check
//! plus the matching logic are the only safety layers on that path.

pub mod auth;

use crate::config::Config;
use crate::security::mask_secret;
use crate::storage::{Role, SqliteStore, Store};
use crate::util::conversation_title;
use crate::webhook::reconcile::InboundCallback;
use crate::webhook::{
    CallbackReconciler, WebhookDispatcher, CALLBACK_PATH, CALLBACK_READY_STATUS, SECRET_HEADERS,
    SESSION_ID_HEADER,
};
use anyhow::{Context, Result};
use auth::PortalAuth;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size for the chat API (64KB).
pub const MAX_BODY_SIZE: usize = 65_536;
/// The callback route accepts larger, possibly malformed provider bodies (2MB).
pub const CALLBACK_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;
/// Request timeout (30s) — prevents slow-loris attacks.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub reconciler: Arc<CallbackReconciler>,
    pub auth: Arc<PortalAuth>,
}

impl AppState {
    pub fn from_parts(config: &Config, store: Arc<dyn Store>) -> Self {
        Self {
            dispatcher: Arc::new(WebhookDispatcher::new(config, store.clone())),
            reconciler: Arc::new(CallbackReconciler::new(
                store.clone(),
                config.webhook.callback_secret.clone(),
            )),
            auth: Arc::new(PortalAuth::new(config.gateway.users.clone(), store.clone())),
            store,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // The provider may send malformed JSON-like bodies (unescaped newlines in
    // strings), so the callback route reads raw text and gets its own limit.
    let callback_routes = Router::new()
        .route(
            CALLBACK_PATH,
            get(handle_callback_ready).post(handle_callback),
        )
        .layer(RequestBodyLimitLayer::new(CALLBACK_MAX_BODY_SIZE));

    let api_routes = Router::new()
        .route("/api/health", get(handle_health))
        .route(
            "/api/chat/conversations",
            get(handle_list_conversations).post(handle_create_conversation),
        )
        .route(
            "/api/chat/conversations/{id}",
            delete(handle_delete_conversation),
        )
        .route(
            "/api/chat/conversations/{id}/messages",
            get(handle_list_messages).post(handle_send_message),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE));

    Router::new()
        .merge(callback_routes)
        .merge(api_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
        .with_state(state)
}

/// Open storage, seed portal users, and serve until shutdown.
pub async fn run(config: Config) -> Result<()> {
    let db_path = config.db_path()?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path)?);
    let state = AppState::from_parts(&config, store);
    state.auth.seed().await?;

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;

    tracing::info!("hookline gateway listening on http://{addr}");
    tracing::info!("  GET  {CALLBACK_PATH} — callback readiness probe");
    tracing::info!("  POST {CALLBACK_PATH} — provider reply callback");
    tracing::info!("  POST /api/chat/conversations/{{id}}/messages — send a chat turn");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn unauthorized() -> Response {
    json_error(StatusCode::UNAUTHORIZED, "Authentication required")
}

fn internal_error(err: anyhow::Error) -> Response {
    tracing::error!(error = %err, "gateway request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

// ── Public routes ─────────────────────────────────────────────

async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET on the callback path: the readiness probe the address resolver checks
/// before every send.
async fn handle_callback_ready() -> impl IntoResponse {
    Json(json!({
        "status": CALLBACK_READY_STATUS,
        "service": "hookline",
        "endpoint": CALLBACK_PATH,
        "method": "GET",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn handle_callback(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    tracing::info!(
        content_type = header_str(&headers, "content-type").unwrap_or("-"),
        user_agent = header_str(&headers, "user-agent").unwrap_or("-"),
        session_header = header_str(&headers, SESSION_ID_HEADER).unwrap_or("-"),
        secret_header = %mask_secret(
            header_str(&headers, SECRET_HEADERS[0])
                .or_else(|| header_str(&headers, SECRET_HEADERS[1]))
                .unwrap_or("")
        ),
        body_bytes = body.len(),
        "incoming webhook callback"
    );

    let request = InboundCallback {
        content_type: header_str(&headers, header::CONTENT_TYPE.as_str()),
        header_secrets: [
            header_str(&headers, SECRET_HEADERS[0]),
            header_str(&headers, SECRET_HEADERS[1]),
        ],
        header_session: header_str(&headers, SESSION_ID_HEADER),
        query_secret: query.get("secret").map(String::as_str),
        body: &body,
    };

    match state.reconciler.reconcile(request).await {
        Ok(applied) => (
            StatusCode::OK,
            Json(json!({
                "status": "updated",
                "conversationId": applied.conversation_id,
                "messageId": applied.message_id,
                "sessionId": applied.session_id,
            })),
        )
            .into_response(),
        Err(rejection) => {
            let status = StatusCode::from_u16(rejection.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            json_error(status, &rejection.to_string())
        }
    }
}

// ── Authenticated chat API ────────────────────────────────────

async fn handle_list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let Some(user) = state.auth.authenticate(&headers).await else {
        return unauthorized();
    };
    match state.store.conversations_for_user(user.id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize, Default)]
struct CreateConversationBody {
    #[serde(default)]
    title: Option<String>,
}

async fn handle_create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CreateConversationBody>>,
) -> Response {
    let Some(user) = state.auth.authenticate(&headers).await else {
        return unauthorized();
    };
    let title = body
        .and_then(|Json(b)| b.title)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "New Conversation".to_string());
    match state.store.create_conversation(user.id, &title).await {
        Ok(row) => (StatusCode::CREATED, Json(row)).into_response(),
        Err(err) => internal_error(err),
    }
}

/// Load a conversation, enforcing that it belongs to the caller.
async fn owned_conversation(
    state: &AppState,
    user_id: i64,
    conversation_id: i64,
) -> Result<Option<crate::storage::ConversationRow>, Response> {
    match state.store.conversation(conversation_id).await {
        Ok(Some(row)) if row.user_id == user_id => Ok(Some(row)),
        Ok(_) => Ok(None),
        Err(err) => Err(internal_error(err)),
    }
}

async fn handle_delete_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    let Some(user) = state.auth.authenticate(&headers).await else {
        return unauthorized();
    };
    match owned_conversation(&state, user.id, id).await {
        Ok(Some(_)) => match state.store.delete_conversation(id).await {
            Ok(()) => Json(json!({ "message": "Conversation deleted" })).into_response(),
            Err(err) => internal_error(err),
        },
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Conversation not found"),
        Err(response) => response,
    }
}

async fn handle_list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    let Some(user) = state.auth.authenticate(&headers).await else {
        return unauthorized();
    };
    match owned_conversation(&state, user.id, id).await {
        Ok(Some(_)) => match state.store.messages(id).await {
            Ok(rows) => Json(rows).into_response(),
            Err(err) => internal_error(err),
        },
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Conversation not found"),
        Err(response) => response,
    }
}

#[derive(Deserialize)]
struct SendMessageBody {
    message: String,
}

/// The user's chat turn: persist it, relay it to the provider inline, and
/// persist whatever the dispatcher came back with — a pending placeholder, an
/// inline answer, or a terminal error reply. The HTTP response is held until
/// the send has completed or failed.
async fn handle_send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    body: Result<Json<SendMessageBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Some(user) = state.auth.authenticate(&headers).await else {
        return unauthorized();
    };

    let message = match body {
        Ok(Json(b)) => b.message,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "Message is required"),
    };
    let message = message.trim().to_string();
    if message.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Message is required");
    }

    let conversation = match owned_conversation(&state, user.id, id).await {
        Ok(Some(row)) => row,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Conversation not found"),
        Err(response) => return response,
    };

    let user_message = match state
        .store
        .append_message(conversation.id, Role::User, &message, None)
        .await
    {
        Ok(row) => row,
        Err(err) => return internal_error(err),
    };

    let outcome = state
        .dispatcher
        .dispatch(&format!("verified_user_{}", user.id), &message, &user.email)
        .await;

    let assistant_message = match state
        .store
        .append_message(
            conversation.id,
            Role::Assistant,
            &outcome.reply,
            Some(&outcome.session_id),
        )
        .await
    {
        Ok(row) => row,
        Err(err) => return internal_error(err),
    };

    // First exchange: derive the title from the user's opening message.
    if let Ok(2) = state.store.message_count(conversation.id).await {
        let title = conversation_title(&message);
        if let Err(err) = state.store.rename_conversation(conversation.id, &title).await {
            tracing::warn!(error = %err, "failed to update conversation title");
        }
    }
    if let Err(err) = state.store.touch_conversation(conversation.id).await {
        tracing::warn!(error = %err, "failed to touch conversation");
    }

    Json(json!({
        "user_message": user_message,
        "assistant_message": assistant_message,
        "llm_response": {
            "status": outcome.status,
            "timestamp": outcome.timestamp,
            "session_id": outcome.session_id,
        },
    }))
    .into_response()
}
