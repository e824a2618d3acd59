use crate::services::diagnostic_logger::Diagnostics;
use crate::services::fallback_service::ChannelLiveProbe;
use crate::services::liveness_service::ChannelPayload;
use crate::utils::channel_url::channel_api_url;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const TAG: &str = "CHANNEL_API";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
const USER_AGENT: &str = "Mozilla/5.0";

/// Channel status straight from the platform API, without a browser.
///
/// Used where no watch session is open: picking a fallback sibling, the
/// pre-start check and the retry monitor. Anything inconclusive counts as live
/// so the queue never stalls on a flaky endpoint.
pub struct ChannelApiService {
    client: Client,
    platform_host: String,
    diagnostics: Diagnostics,
}

impl ChannelApiService {
    pub fn new(platform_host: impl Into<String>, diagnostics: Diagnostics) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
            platform_host: platform_host.into(),
            diagnostics,
        }
    }

    /// `None` when the channel cannot be checked through the API.
    pub async fn fetch_status(&self, channel_url: &str) -> Result<Option<bool>> {
        let Some(api_url) = channel_api_url(channel_url, &self.platform_host) else {
            return Ok(None);
        };

        let response = self
            .client
            .get(&api_url)
            .header("Accept", "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("{} returned {}", api_url, response.status()));
        }
        let payload: ChannelPayload = response.json().await?;
        Ok(Some(payload.is_live()))
    }
}

#[async_trait]
impl ChannelLiveProbe for ChannelApiService {
    async fn is_live(&self, channel_url: &str) -> bool {
        match self.fetch_status(channel_url).await {
            Ok(Some(live)) => {
                self.diagnostics
                    .debug(TAG, format!("{} live={}", channel_url, live));
                live
            }
            Ok(None) => true,
            Err(e) => {
                self.diagnostics.debug(
                    TAG,
                    format!("Status check failed for {}: {}", channel_url, e),
                );
                true
            }
        }
    }
}
