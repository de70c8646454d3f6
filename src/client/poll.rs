//! Cooperative client polling loop.
//!
//! One instance per active conversation view. While the loaded message list
//! contains a pending assistant placeholder, the list is re-fetched silently
//! on a fixed cadence — no backoff, no jitter — up to a bounded attempt
//! budget, then the loop stops regardless of outcome. Cancelled immediately
//! on conversation switch or teardown.

use crate::config::PollConfig;
use crate::webhook::is_pending;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Client-side view of a message row, decoupled from the server's types.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

pub struct PollingLoop {
    client: reqwest::Client,
    base_url: String,
    token: String,
    interval: Duration,
    max_attempts: u32,
}

impl PollingLoop {
    pub fn new(base_url: &str, token: &str, config: &PollConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            interval: Duration::from_secs(config.interval_secs),
            max_attempts: config.max_attempts,
        }
    }

    /// Whether any assistant message in the list is still waiting for its
    /// callback. This is the loop's trigger condition.
    pub fn has_pending(messages: &[MessageView]) -> bool {
        messages
            .iter()
            .any(|m| m.role == "assistant" && is_pending(&m.content))
    }

    async fn fetch_messages(&self, conversation_id: i64) -> Result<Vec<MessageView>> {
        let url = format!(
            "{}/api/chat/conversations/{conversation_id}/messages",
            self.base_url
        );
        self.client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<MessageView>>()
            .await
            .context("Failed to decode message list")
    }

    /// Poll until the placeholder resolves, the attempt budget runs out, or
    /// the token is cancelled. Returns the last fetched message list. A
    /// failed re-fetch is logged and counted, never fatal — the next tick
    /// tries again.
    pub async fn run(
        &self,
        conversation_id: i64,
        cancel: CancellationToken,
    ) -> Result<Vec<MessageView>> {
        let mut latest = self.fetch_messages(conversation_id).await?;
        if !Self::has_pending(&latest) {
            return Ok(latest);
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a fresh interval fires immediately; consume it so
        // every attempt waits a full cadence.
        ticker.tick().await;

        for attempt in 1..=self.max_attempts {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(conversation_id, "polling cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match self.fetch_messages(conversation_id).await {
                Ok(messages) => {
                    latest = messages;
                    if !Self::has_pending(&latest) {
                        tracing::debug!(conversation_id, attempt, "placeholder resolved");
                        break;
                    }
                }
                Err(err) => {
                    tracing::debug!(conversation_id, attempt, error = %err, "poll fetch failed");
                }
            }
        }

        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(role: &str, content: &str) -> MessageView {
        MessageView {
            id: 1,
            role: role.to_string(),
            content: content.to_string(),
            session_id: None,
        }
    }

    #[test]
    fn pending_detection_requires_assistant_role_and_prefix() {
        assert!(PollingLoop::has_pending(&[view(
            "assistant",
            "Request accepted by webhook. Waiting."
        )]));
        assert!(!PollingLoop::has_pending(&[view(
            "user",
            "Request accepted by webhook."
        )]));
        assert!(!PollingLoop::has_pending(&[view("assistant", "Done.")]));
        assert!(!PollingLoop::has_pending(&[]));
    }
}
