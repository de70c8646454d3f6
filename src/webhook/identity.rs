//! One-way mapping from an internal account email to the externally-visible
//! user id carried on webhook traffic.

use super::error::WebhookError;
use crate::storage::Store;
use std::sync::Arc;

/// Created once per email, never overwritten: a later send for the same email
/// reuses the stored id even if the caller proposed a different one.
#[derive(Clone)]
pub struct IdentityMapper {
    store: Arc<dyn Store>,
}

impl IdentityMapper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolve the external id for `email`, storing `proposed_id` on first use.
    pub async fn resolve_external_id(
        &self,
        email: &str,
        proposed_id: &str,
    ) -> Result<String, WebhookError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(WebhookError::MissingIdentity);
        }

        // INSERT OR IGNORE + read-back makes first-write-wins hold even when
        // two dispatches race on a brand-new email.
        self.store
            .insert_identity(email, proposed_id)
            .await
            .map_err(WebhookError::Storage)?;
        let stored = self
            .store
            .identity_by_email(email)
            .await
            .map_err(WebhookError::Storage)?
            .ok_or_else(|| WebhookError::Storage(anyhow::anyhow!("identity row vanished")))?;

        if stored.external_id != proposed_id {
            tracing::debug!(
                email,
                stored = %stored.external_id,
                proposed = %proposed_id,
                "reusing stored external id, ignoring proposed one"
            );
        }
        Ok(stored.external_id)
    }

    /// Reverse lookup for the callback path: external id back to the email.
    pub async fn email_for_external_id(
        &self,
        external_id: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(self
            .store
            .identity_by_external_id(external_id)
            .await?
            .map(|row| row.email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    fn mapper() -> IdentityMapper {
        IdentityMapper::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[tokio::test]
    async fn resolve_is_idempotent_across_proposed_ids() {
        let mapper = mapper();
        let first = mapper
            .resolve_external_id("alice@example.com", "verified_user_1")
            .await
            .unwrap();
        assert_eq!(first, "verified_user_1");

        // Different proposed id, same email: stored id wins.
        let second = mapper
            .resolve_external_id("alice@example.com", "verified_user_99")
            .await
            .unwrap();
        assert_eq!(second, "verified_user_1");
    }

    #[tokio::test]
    async fn empty_email_is_a_configuration_failure() {
        let mapper = mapper();
        let err = mapper.resolve_external_id("  ", "u-1").await.unwrap_err();
        assert!(matches!(err, WebhookError::MissingIdentity));
    }

    #[tokio::test]
    async fn reverse_lookup_round_trips() {
        let mapper = mapper();
        mapper
            .resolve_external_id("bob@example.com", "u-99")
            .await
            .unwrap();
        assert_eq!(
            mapper.email_for_external_id("u-99").await.unwrap().as_deref(),
            Some("bob@example.com")
        );
        assert!(mapper
            .email_for_external_id("unknown")
            .await
            .unwrap()
            .is_none());
    }
}
