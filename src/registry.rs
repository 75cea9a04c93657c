//! FBP registry client: registration plus periodic keepalive pings.
//!
//! Registration is how an IDE discovers a running runtime. It is entirely
//! optional: without a user id in the environment the runtime stays
//! unregistered and only reachable by direct address.

use std::time::Duration;

use anyhow::{Context as _, Result};
use serde_json::json;
use tracing::{info, warn};

const DEFAULT_API: &str = "https://api.flowhub.io";
const PING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// What the registry needs to know about this runtime.
#[derive(Clone, Debug)]
pub struct RuntimeInfo {
    pub user_id: Option<String>,
    pub runtime_id: String,
    pub label: String,
    /// WebSocket address clients connect to.
    pub address: String,
    pub api: String,
}

impl RuntimeInfo {
    /// Build from environment variables: `PIXFLOW_USER_ID`,
    /// `PIXFLOW_RUNTIME_ID`, `PIXFLOW_LABEL`, `PIXFLOW_REGISTRY`.
    pub fn from_env(hostname: &str, external_port: u16) -> Self {
        let env = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        Self {
            user_id: env("PIXFLOW_USER_ID"),
            runtime_id: env("PIXFLOW_RUNTIME_ID").unwrap_or_else(generated_runtime_id),
            label: env("PIXFLOW_LABEL").unwrap_or_else(|| "pixflow runtime".to_owned()),
            address: format!("ws://{hostname}:{external_port}/ws"),
            api: env("PIXFLOW_REGISTRY").unwrap_or_else(|| DEFAULT_API.to_owned()),
        }
    }
}

/// Registry client over the runtime record endpoint.
pub struct Registry {
    info: RuntimeInfo,
    client: reqwest::Client,
}

impl Registry {
    pub fn new(info: RuntimeInfo) -> Self {
        Self {
            info,
            client: reqwest::Client::new(),
        }
    }

    pub fn info(&self) -> &RuntimeInfo {
        &self.info
    }

    /// Register this runtime. Returns false (without error) when no user id
    /// is configured.
    pub async fn register(&self) -> Result<bool> {
        let Some(user) = &self.info.user_id else {
            return Ok(false);
        };
        let url = format!("{}/runtimes/{}", self.info.api, self.info.runtime_id);
        let body = json!({
            "type": "pixflow",
            "protocol": "websocket",
            "address": self.info.address,
            "id": self.info.runtime_id,
            "label": self.info.label,
            "user": user,
        });
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("register runtime at '{url}'"))?;
        response
            .error_for_status()
            .with_context(|| "registry rejected registration")?;
        info!(runtime = self.info.runtime_id, "registered with registry");
        Ok(true)
    }

    /// Spawn the keepalive loop. Ping failures are logged and retried on the
    /// next interval; they never take the runtime down.
    pub fn start_pinging(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let url = format!("{}/runtimes/{}", self.info.api, self.info.runtime_id);
            let mut interval = tokio::time::interval(PING_INTERVAL);
            interval.tick().await; // immediate first tick
            loop {
                interval.tick().await;
                match self.client.post(&url).send().await {
                    Ok(response) if response.status().is_success() => {
                        info!(runtime = self.info.runtime_id, "registry ping");
                    }
                    Ok(response) => {
                        warn!(status = %response.status(), "registry ping rejected");
                    }
                    Err(e) => {
                        warn!(error = %e, "registry ping failed");
                    }
                }
            }
        })
    }
}

/// Stable-enough id when none is configured: time plus process id.
fn generated_runtime_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("pixflow-{:x}-{:x}", std::process::id(), nanos)
}
