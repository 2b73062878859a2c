//! Display label from a one-shot network metadata lookup.
//!
//! The label (`<country>-<organization>`) only decorates node names in the
//! subscription and the startup banner. The relay never reads it.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use vless_core::{VlessError, VlessResult};

pub const DEFAULT_META_URL: &str = "https://speed.cloudflare.com/meta";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelState {
    /// Warm-up lookup still running.
    Pending,
    /// The last lookup failed.
    Failed,
    Ready(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    as_organization: Option<String>,
}

/// Process-wide label, shared by cloning.
#[derive(Clone)]
pub struct IspLabel {
    state: Arc<watch::Sender<LabelState>>,
    client: reqwest::Client,
    url: String,
}

impl IspLabel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            state: Arc::new(watch::Sender::new(LabelState::Pending)),
            client: reqwest::Client::builder()
                .timeout(LOOKUP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }

    /// Start the lookup in the background.
    pub fn warm_up(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            match this.fetch().await {
                Ok(label) => {
                    info!(label = %label, "ISP label resolved");
                    this.state.send_replace(LabelState::Ready(label));
                }
                Err(e) => {
                    info!(error = %e, "ISP label lookup failed");
                    this.state.send_replace(LabelState::Failed);
                }
            }
        });
    }

    pub fn current(&self) -> LabelState {
        self.state.borrow().clone()
    }

    /// Wait for warm-up to settle, retrying once if it failed.
    pub async fn resolve(&self) -> Option<String> {
        let settled = {
            let mut rx = self.state.subscribe();
            let state = match rx.wait_for(|s| *s != LabelState::Pending).await {
                Ok(state) => state.clone(),
                Err(_) => LabelState::Failed,
            };
            state
        };

        match settled {
            LabelState::Ready(label) => Some(label),
            _ => match self.fetch().await {
                Ok(label) => {
                    info!(label = %label, "ISP label resolved on demand");
                    self.state.send_replace(LabelState::Ready(label.clone()));
                    Some(label)
                }
                Err(e) => {
                    debug!(error = %e, "ISP label retry failed, using Unknown");
                    None
                }
            },
        }
    }

    async fn fetch(&self) -> VlessResult<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| VlessError::Other(format!("metadata request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(VlessError::Other(format!(
                "metadata request returned HTTP {}",
                response.status()
            )));
        }
        let meta = response
            .json::<Meta>()
            .await
            .map_err(|e| VlessError::Other(format!("metadata parse failed: {e}")))?;
        Ok(format_label(&meta))
    }

    #[cfg(test)]
    pub(crate) fn with_state(state: LabelState) -> Self {
        let label = Self::new("http://127.0.0.1:9/meta");
        label.state.send_replace(state);
        label
    }
}

fn format_label(meta: &Meta) -> String {
    format!(
        "{}-{}",
        meta.country.as_deref().unwrap_or("undefined"),
        meta.as_organization.as_deref().unwrap_or("undefined")
    )
    .replace(' ', "_")
}
