use crate::models::queue::QueueEntry;
use crate::models::session::PlayerState;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TimingSettings {
    pub initial_load_wait_secs: u64, // Page render time before the first player update
    pub switch_settle_secs: u64,     // Delay after switching channel before re-probing
    pub retry_monitor_secs: u64,     // How often idle queues look for channels back online
    pub script_timeout_secs: u64,    // In-page fetch timeout
    pub stop_pause_secs: u64,        // Pause after stopping a session so the browser can close
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            initial_load_wait_secs: 5,
            switch_settle_secs: 8,
            retry_monitor_secs: 30,
            script_timeout_secs: 10,
            stop_pause_secs: 2,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default)]
    pub items: Vec<QueueEntry>,
    #[serde(default = "default_true")]
    pub mute: bool,
    #[serde(default)]
    pub hide_player: bool,
    #[serde(default)]
    pub mini_player: bool,
    #[serde(default)]
    pub force_160p: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default = "default_offline_checks")]
    pub offline_fresh_checks_to_switch: u32,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default, alias = "chromedriver_path")]
    pub driver_path: Option<String>,
    #[serde(default)]
    pub extension_path: Option<String>,
    #[serde(default = "default_platform_host")]
    pub platform_host: String,
    #[serde(default)]
    pub timings: TimingSettings,
}

fn default_true() -> bool {
    true
}

fn default_offline_checks() -> u32 {
    2
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_platform_host() -> String {
    "kick.com".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            items: vec![],
            mute: true,
            hide_player: false,
            mini_player: false,
            force_160p: false,
            debug: false,
            auto_start: false,
            offline_fresh_checks_to_switch: default_offline_checks(),
            webdriver_url: default_webdriver_url(),
            driver_path: None,
            extension_path: None,
            platform_host: default_platform_host(),
            timings: TimingSettings::default(),
        }
    }
}

impl Settings {
    /// Player treatment requested by the user; hidden wins over mini.
    pub fn player_state(&self) -> PlayerState {
        PlayerState {
            muted: self.mute,
            hidden: self.hide_player,
            mini: !self.hide_player && self.mini_player,
        }
    }

    /// Headless only when hiding the player, never with the mini player or a packed extension.
    pub fn headless(&self) -> bool {
        let packed_extension = self
            .extension_path
            .as_deref()
            .map(|p| p.to_lowercase().ends_with(".crx"))
            .unwrap_or(false);
        self.hide_player && !self.mini_player && !packed_extension
    }
}
