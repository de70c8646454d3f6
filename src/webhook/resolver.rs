//! Callback address resolution and reachability validation.
//!
//! Runs synchronously before every send and is never cached across sends —
//! a developer tunnel can restart between two requests, so yesterday's
//! healthy address proves nothing about this one.

use super::error::WebhookError;
use super::{CALLBACK_PATH, CALLBACK_READY_STATUS};
use crate::config::Config;
use reqwest::StatusCode;
use std::time::Duration;

/// How the provider's callback will actually reach this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// The advertised public address answered the readiness probe itself.
    Public,
    /// The public address 403s agent-origin requests (machine-to-machine
    /// tunnel), but this instance's own callback route is reachable on
    /// loopback. The advertised address stays the public one — the real
    /// caller is the provider, not this probe.
    LocalFallback,
}

#[derive(Debug, Clone)]
pub struct ResolvedCallback {
    pub callback_url: String,
    pub delivery_mode: DeliveryMode,
}

enum ProbeOutcome {
    Ready,
    BodyMismatch,
    Status(StatusCode),
}

pub struct CallbackAddressResolver {
    callback_override: Option<String>,
    public_base_url: Option<String>,
    local_port: u16,
    probe_timeout: Duration,
    blocked_tunnel_hosts: Vec<String>,
    relay_tunnel_hosts: Vec<String>,
    client: reqwest::Client,
}

impl CallbackAddressResolver {
    pub fn from_config(config: &Config) -> Self {
        Self {
            callback_override: config.webhook.callback_url.clone(),
            public_base_url: config.webhook.public_base_url.clone(),
            local_port: config.gateway.port,
            probe_timeout: Duration::from_secs(config.webhook.probe_timeout_secs),
            blocked_tunnel_hosts: config.webhook.blocked_tunnel_hosts.clone(),
            relay_tunnel_hosts: config.webhook.relay_tunnel_hosts.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Callback URL candidates in precedence order: explicit override,
    /// derived base URL + fixed path, hardcoded local default.
    fn candidate_url(&self) -> String {
        if let Some(url) = self
            .callback_override
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
        {
            return url.to_string();
        }
        if let Some(base) = self
            .public_base_url
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
        {
            return format!("{}{CALLBACK_PATH}", base.trim_end_matches('/'));
        }
        format!("http://127.0.0.1:{}{CALLBACK_PATH}", self.local_port)
    }

    fn host_matches(host: &str, suffixes: &[String]) -> bool {
        let host = host.to_ascii_lowercase();
        suffixes.iter().any(|suffix| {
            let suffix = suffix.to_ascii_lowercase();
            host == suffix || host.ends_with(&format!(".{suffix}"))
        })
    }

    pub async fn resolve_and_validate(&self) -> Result<ResolvedCallback, WebhookError> {
        let callback_url = self.candidate_url();
        let parsed = reqwest::Url::parse(&callback_url).map_err(|err| {
            WebhookError::InvalidCallbackConfig(format!("cannot parse '{callback_url}': {err}"))
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(WebhookError::InvalidCallbackConfig(format!(
                    "unsupported scheme '{other}' in '{callback_url}'"
                )))
            }
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| {
                WebhookError::InvalidCallbackConfig(format!("no host in '{callback_url}'"))
            })?
            .to_string();

        if Self::host_matches(&host, &self.blocked_tunnel_hosts) {
            return Err(WebhookError::InvalidCallbackConfig(format!(
                "tunnel host '{host}' requires handshake headers the webhook provider cannot send"
            )));
        }

        match self.probe(&callback_url).await {
            Ok(ProbeOutcome::Ready) => {
                tracing::debug!(%callback_url, "callback readiness probe passed");
                Ok(ResolvedCallback {
                    callback_url,
                    delivery_mode: DeliveryMode::Public,
                })
            }
            Ok(ProbeOutcome::BodyMismatch) => Err(WebhookError::HealthCheckMismatch {
                url: callback_url,
            }),
            Ok(ProbeOutcome::Status(StatusCode::FORBIDDEN))
                if Self::host_matches(&host, &self.relay_tunnel_hosts) =>
            {
                self.try_local_fallback(callback_url, parsed.path()).await
            }
            Ok(ProbeOutcome::Status(status)) => Err(WebhookError::CallbackUnreachable(format!(
                "probe of {callback_url} returned {status}"
            ))),
            Err(err) => Err(WebhookError::CallbackUnreachable(format!(
                "probe of {callback_url} failed: {err}"
            ))),
        }
    }

    /// The relay tunnel blocked our agent-origin GET. Probe this instance's
    /// own route on loopback instead: proving the route up is sufficient,
    /// since the provider-origin POST is not blocked by these tunnels. Note
    /// this verifies our side only, not the provider's network path — the
    /// weaker guarantee is deliberate and logged.
    async fn try_local_fallback(
        &self,
        public_url: String,
        path: &str,
    ) -> Result<ResolvedCallback, WebhookError> {
        let local_url = format!("http://127.0.0.1:{}{path}", self.local_port);
        match self.probe(&local_url).await {
            Ok(ProbeOutcome::Ready) => {
                tracing::warn!(
                    %public_url,
                    %local_url,
                    "public callback probe got 403 from relay tunnel; loopback route is up, \
                     advertising the public address unverified"
                );
                Ok(ResolvedCallback {
                    callback_url: public_url,
                    delivery_mode: DeliveryMode::LocalFallback,
                })
            }
            Ok(_) | Err(_) => Err(WebhookError::CallbackUnreachable(format!(
                "public probe of {public_url} returned 403 and loopback fallback {local_url} \
                 did not report ready"
            ))),
        }
    }

    async fn probe(&self, url: &str) -> Result<ProbeOutcome, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Ok(ProbeOutcome::Status(status));
        }
        let body = response.text().await.unwrap_or_default();
        let ready = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(str::to_string))
            .is_some_and(|s| s == CALLBACK_READY_STATUS);
        if ready {
            Ok(ProbeOutcome::Ready)
        } else {
            Ok(ProbeOutcome::BodyMismatch)
        }
    }
}
