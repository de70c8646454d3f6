//! Portal identity layer.
//!
//! Stands in for the full OAuth/approval/session stack: configured bearer
//! tokens resolve to an account identity and email, which is all the
//! reconciliation core needs from it.

use crate::config::PortalUser;
use crate::security::constant_time_eq;
use crate::storage::Store;
use anyhow::{Context, Result};
use axum::http::{header, HeaderMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub email: String,
}

pub struct PortalAuth {
    users: Vec<PortalUser>,
    store: Arc<dyn Store>,
}

impl PortalAuth {
    pub fn new(users: Vec<PortalUser>, store: Arc<dyn Store>) -> Self {
        Self { users, store }
    }

    /// Make sure every configured portal user has an account row.
    pub async fn seed(&self) -> Result<()> {
        for user in &self.users {
            self.store
                .ensure_user(&user.email, user.name.as_deref())
                .await
                .with_context(|| format!("Failed to seed portal user {}", user.email))?;
        }
        Ok(())
    }

    /// Resolve the bearer token in `headers` to an account, or `None`.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Option<AuthenticatedUser> {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let token = auth.strip_prefix("Bearer ").unwrap_or("").trim();
        if token.is_empty() {
            return None;
        }

        let matched = self
            .users
            .iter()
            .find(|user| constant_time_eq(token, user.token.trim()))?;

        match self.store.user_by_email(&matched.email).await {
            Ok(Some(row)) => Some(AuthenticatedUser {
                id: row.id,
                email: row.email,
            }),
            Ok(None) => {
                tracing::warn!(email = %matched.email, "token maps to unseeded account");
                None
            }
            Err(err) => {
                tracing::error!(error = %err, "account lookup failed during auth");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use axum::http::HeaderValue;

    async fn auth_with_user() -> PortalAuth {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let auth = PortalAuth::new(
            vec![PortalUser {
                token: "tok-alice".to_string(),
                email: "alice@example.com".to_string(),
                name: Some("Alice".to_string()),
            }],
            store,
        );
        auth.seed().await.unwrap();
        auth
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn valid_token_resolves_identity() {
        let auth = auth_with_user().await;
        let user = auth.authenticate(&bearer("tok-alice")).await.unwrap();
        assert_eq!(user.email, "alice@example.com");
    }

    #[tokio::test]
    async fn wrong_or_missing_token_is_rejected() {
        let auth = auth_with_user().await;
        assert!(auth.authenticate(&bearer("tok-bob")).await.is_none());
        assert!(auth.authenticate(&HeaderMap::new()).await.is_none());
    }
}
