//! Cached, jittered liveness checks for the channel a session is watching.
//!
//! Sources are tried in order: an authenticated fetch of the channel API from
//! inside the page, the page's embedded state blob, then the rendered text. The
//! text heuristic can only ever report "offline".

use crate::models::session::LiveSource;
use crate::services::browser_service::BrowserSession;
use crate::services::diagnostic_logger::Diagnostics;
use crate::utils::channel_url::channel_api_url;
use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

const TAG: &str = "LIVENESS";

/// Fetches a URL with the page's cookies and hands the body text to the callback.
pub const IN_PAGE_FETCH_SCRIPT: &str = r#"
const cb = arguments[arguments.length - 1];
fetch(arguments[0], { credentials: 'include', cache: 'no-store', headers: { 'Accept': 'application/json' } })
  .then(r => r.text())
  .then(t => cb(t))
  .catch(e => cb(JSON.stringify({ error: String(e) })));
"#;

pub const PAGE_STATE_SCRIPT: &str = r#"
try {
  const next = document.getElementById('__NEXT_DATA__');
  if (next && next.textContent) return next.textContent;
  if (window.__NUXT__) return JSON.stringify(window.__NUXT__);
} catch (e) {}
return null;
"#;

/// Upper-cased phrases that only appear on an offline channel page.
pub const OFFLINE_MARKERS: [&str; 6] = [
    "OFFLINE",
    "IS OFFLINE",
    "CHANNEL IS OFFLINE",
    "NOT LIVE",
    "HORS LIGNE",
    "N'EST PAS EN DIRECT",
];

const LIVE_BASE_SECS: f64 = 8.0;
const OFFLINE_BASE_SECS: f64 = 5.0;
const JITTER_SECS: f64 = 3.0;
const MIN_INTERVAL_SECS: f64 = 4.0;
const INITIAL_INTERVAL: Duration = Duration::from_secs(10);

lazy_static! {
    static ref IS_LIVE_RE: Regex = Regex::new(r#"(?i)"is_live"\s*:\s*(true|false)"#).unwrap();
}

/// Channel status as returned by the platform's channel endpoint.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChannelPayload {
    #[serde(default)]
    pub livestream: Option<Livestream>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Livestream {
    #[serde(default)]
    pub is_live: bool,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRef {
    #[serde(default)]
    pub id: Option<i64>,
}

impl ChannelPayload {
    pub fn is_live(&self) -> bool {
        self.livestream.as_ref().map(|l| l.is_live).unwrap_or(false)
    }

    /// First category of the current broadcast, if live.
    pub fn live_category_id(&self) -> Option<i64> {
        self.livestream
            .as_ref()
            .filter(|l| l.is_live)
            .and_then(|l| l.categories.first())
            .and_then(|c| c.id)
    }
}

/// Accepts either the raw body text or an already-decoded object.
pub fn parse_channel_payload(value: Value) -> Result<ChannelPayload> {
    let payload: ChannelPayload = match value {
        Value::String(text) if !text.is_empty() => serde_json::from_str(&text)?,
        v @ Value::Object(_) => serde_json::from_value(v)?,
        other => return Err(anyhow!("unexpected channel payload: {}", other)),
    };
    if let Some(err) = &payload.error {
        return Err(anyhow!("in-page fetch failed: {}", err));
    }
    Ok(payload)
}

/// Authenticated fetch of the channel endpoint through the browser.
pub async fn fetch_channel_payload(
    browser: &dyn BrowserSession,
    api_url: &str,
    timeout: Duration,
) -> Result<ChannelPayload> {
    let value = browser
        .execute_async_script(
            IN_PAGE_FETCH_SCRIPT,
            vec![Value::String(api_url.to_string())],
            timeout,
        )
        .await?;
    parse_channel_payload(value)
}

/// `is_live` flag from the embedded page state, when present.
pub fn page_state_live(state_text: &str) -> Option<bool> {
    IS_LIVE_RE
        .captures(state_text)
        .map(|caps| caps[1].eq_ignore_ascii_case("true"))
}

/// `Some(false)` when the page text shows an offline marker, `None` otherwise.
pub fn dom_offline(body_text: &str) -> Option<bool> {
    let upper = body_text.to_uppercase();
    if OFFLINE_MARKERS.iter().any(|m| upper.contains(m)) {
        Some(false)
    } else {
        None
    }
}

/// Next cache lifetime: shorter while offline to catch the channel coming back.
pub fn next_interval(live: bool, jitter_secs: f64) -> Duration {
    let base = if live { LIVE_BASE_SECS } else { OFFLINE_BASE_SECS };
    Duration::from_secs_f64((base + jitter_secs).max(MIN_INTERVAL_SECS))
}

pub fn random_jitter() -> f64 {
    rand::rng().random_range(-JITTER_SECS..=JITTER_SECS)
}

#[derive(Debug, Clone)]
pub struct LivenessCache {
    pub last_check: Option<Instant>,
    pub last_value: bool,
    pub interval: Duration,
    pub last_source: LiveSource,
}

impl Default for LivenessCache {
    fn default() -> Self {
        Self {
            last_check: None,
            // fail-open until the first conclusive probe
            last_value: true,
            interval: INITIAL_INTERVAL,
            last_source: LiveSource::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessReading {
    pub live: bool,
    /// False when the answer came from the cache
    pub fresh: bool,
    pub source: LiveSource,
}

pub struct LivenessOracle {
    api_url: Option<String>,
    script_timeout: Duration,
    cache: LivenessCache,
    diagnostics: Diagnostics,
}

impl LivenessOracle {
    pub fn new(
        channel_url: &str,
        platform_host: &str,
        script_timeout: Duration,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            api_url: channel_api_url(channel_url, platform_host),
            script_timeout,
            cache: LivenessCache::default(),
            diagnostics,
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &LivenessCache {
        &self.cache
    }

    /// Cached check; probes only once the jittered interval has run out.
    pub async fn check(&mut self, browser: &dyn BrowserSession) -> LivenessReading {
        let now = Instant::now();
        if let Some(last) = self.cache.last_check {
            if now.duration_since(last) < self.cache.interval {
                return LivenessReading {
                    live: self.cache.last_value,
                    fresh: false,
                    source: self.cache.last_source,
                };
            }
        }

        let (value, source) = self.probe(browser).await;
        let live = value.unwrap_or(self.cache.last_value);
        self.cache.last_value = live;
        self.cache.last_source = source;
        self.cache.interval = next_interval(live, random_jitter());
        self.cache.last_check = Some(now);

        self.diagnostics.debug(
            TAG,
            format!(
                "live={} source={:?} next check in {:.1}s",
                live,
                source,
                self.cache.interval.as_secs_f64()
            ),
        );

        LivenessReading {
            live,
            fresh: true,
            source,
        }
    }

    /// Uncached probe. `None` means no source was conclusive.
    pub async fn probe(&self, browser: &dyn BrowserSession) -> (Option<bool>, LiveSource) {
        if let Some(api_url) = &self.api_url {
            match fetch_channel_payload(browser, api_url, self.script_timeout).await {
                Ok(payload) => return (Some(payload.is_live()), LiveSource::Api),
                Err(e) => self.diagnostics.debug(TAG, format!("api source failed: {}", e)),
            }

            match browser.execute_script(PAGE_STATE_SCRIPT, vec![]).await {
                Ok(Value::String(text)) => {
                    if let Some(live) = page_state_live(&text) {
                        return (Some(live), LiveSource::PageState);
                    }
                }
                Ok(_) => {}
                Err(e) => self.diagnostics.debug(TAG, format!("page state failed: {}", e)),
            }
        }

        match browser.body_text().await {
            Ok(text) => {
                if let Some(live) = dom_offline(&text) {
                    return (Some(live), LiveSource::DomOffline);
                }
            }
            Err(e) => self.diagnostics.debug(TAG, format!("dom read failed: {}", e)),
        }

        (None, LiveSource::Unknown)
    }
}
