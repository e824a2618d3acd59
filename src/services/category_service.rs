use crate::services::browser_service::BrowserSession;
use crate::services::diagnostic_logger::Diagnostics;
use crate::services::liveness_service::fetch_channel_payload;
use crate::utils::channel_url::channel_api_url;
use std::time::Duration;
use tokio::time::Instant;

const TAG: &str = "CATEGORY";
pub const CATEGORY_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Watches the game category of a live channel that is required to stay in one category.
pub struct CategoryMonitor {
    api_url: Option<String>,
    required_category_id: Option<i64>,
    script_timeout: Duration,
    last_check: Option<Instant>,
    diagnostics: Diagnostics,
}

impl CategoryMonitor {
    pub fn new(
        channel_url: &str,
        platform_host: &str,
        required_category_id: Option<i64>,
        script_timeout: Duration,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            api_url: channel_api_url(channel_url, platform_host),
            required_category_id,
            script_timeout,
            last_check: None,
            diagnostics,
        }
    }

    /// Category id of the live broadcast, `None` when unknown.
    pub async fn current_category(&self, browser: &dyn BrowserSession) -> Option<i64> {
        let api_url = self.api_url.as_ref()?;
        match fetch_channel_payload(browser, api_url, self.script_timeout).await {
            Ok(payload) => payload.live_category_id(),
            Err(e) => {
                self.diagnostics
                    .debug(TAG, format!("Error getting streamer category: {}", e));
                None
            }
        }
    }

    /// Returns the diverging category when the channel has left the required one.
    ///
    /// Checks at most once per 30 seconds, and only while a category is required
    /// and the channel is live. An unknown category never counts as a mismatch.
    pub async fn check_mismatch(
        &mut self,
        browser: &dyn BrowserSession,
        live: bool,
    ) -> Option<i64> {
        let required = self.required_category_id?;
        if !live {
            return None;
        }
        let now = Instant::now();
        if let Some(last) = self.last_check {
            if now.duration_since(last) < CATEGORY_CHECK_INTERVAL {
                return None;
            }
        }
        self.last_check = Some(now);

        let current = self.current_category(browser).await?;
        if current != required {
            self.diagnostics.info(
                TAG,
                format!(
                    "Streamer changed category from {} to {}, switching...",
                    required, current
                ),
            );
            return Some(current);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::browser_service::testing::{channel_payload, FakeBrowser};

    fn monitor(required: Option<i64>) -> CategoryMonitor {
        CategoryMonitor::new(
            "https://kick.com/streamer",
            "kick.com",
            required,
            Duration::from_secs(10),
            Diagnostics::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatch_reported() {
        let browser = FakeBrowser::new();
        browser.set_default_api(Ok(channel_payload(true, Some(7))));
        let mut monitor = monitor(Some(5));
        assert_eq!(monitor.check_mismatch(&browser, true).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_category_is_not_a_mismatch() {
        let browser = FakeBrowser::new();
        browser.set_default_api(Ok(channel_payload(true, None)));
        let mut monitor = monitor(Some(5));
        assert_eq!(monitor.check_mismatch(&browser, true).await, None);

        browser.set_default_api(Err("script timeout".to_string()));
        tokio::time::advance(CATEGORY_CHECK_INTERVAL).await;
        assert_eq!(monitor.check_mismatch(&browser, true).await, None);
        assert_eq!(browser.async_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_and_skipped_when_offline_or_unrequired() {
        let browser = FakeBrowser::new();
        browser.set_default_api(Ok(channel_payload(true, Some(5))));

        let mut unrequired = monitor(None);
        assert_eq!(unrequired.check_mismatch(&browser, true).await, None);
        assert_eq!(browser.async_calls(), 0);

        let mut monitor = monitor(Some(5));
        assert_eq!(monitor.check_mismatch(&browser, false).await, None);
        assert_eq!(browser.async_calls(), 0);

        assert_eq!(monitor.check_mismatch(&browser, true).await, None);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(monitor.check_mismatch(&browser, true).await, None);
        assert_eq!(browser.async_calls(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        monitor.check_mismatch(&browser, true).await;
        assert_eq!(browser.async_calls(), 2);
    }
}
