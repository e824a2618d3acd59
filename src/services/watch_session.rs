//! One browser session watching one channel.
//!
//! A `WatchSession` launches a browser, signs it in with saved cookies, opens
//! the channel and then ticks once per second: liveness, player state, offline
//! promotion, category check, elapsed time, progress, completion. It ends as
//! completed, offline, wrong_category or stopped, and always reports exactly one
//! `on_finish` after its last `on_progress`.

use crate::models::queue::QueueEntry;
use crate::models::session::{
    PlayerState, SessionOutcome, SessionState, TerminationReason, WatchTarget,
};
use crate::models::settings::Settings;
use crate::services::browser_service::{BrowserLauncher, BrowserSession, LaunchOptions};
use crate::services::category_service::CategoryMonitor;
use crate::services::cookie_jar_service::{apply_cookies, CookieStore};
use crate::services::diagnostic_logger::Diagnostics;
use crate::services::liveness_service::LivenessOracle;
use crate::services::player_service::PlayerStateEnforcer;
use crate::utils::channel_url::domain_from_url;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

const TAG: &str = "WATCH";
const LOOP_CADENCE: Duration = Duration::from_secs(1);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const FORCE_QUALITY_SCRIPT: &str = "sessionStorage.setItem('stream_quality', '160');";

/// Receives a session's reports. Called from the session's task.
pub trait SessionObserver: Send + Sync {
    fn on_progress(&self, elapsed_seconds: u64, live: bool);
    /// Called exactly once, after every progress report.
    fn on_finish(&self, elapsed_seconds: u64, completed: bool);
}

/// A session report, for owners that forward callbacks over a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Progress { elapsed_seconds: u64, live: bool },
    Finished { elapsed_seconds: u64, completed: bool },
}

/// Cooperative cancellation flag, polled at the top of every tick.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub channel_url: String,
    pub platform_host: String,
    pub target: WatchTarget,
    pub required_category_id: Option<i64>,
    /// Consecutive fresh offline probes before giving up on the channel (0 = never)
    pub offline_checks_to_switch: u32,
    pub player: PlayerState,
    pub launch: LaunchOptions,
    pub force_160p: bool,
    pub initial_load_wait: Duration,
    pub script_timeout: Duration,
}

impl SessionConfig {
    pub fn from_entry(entry: &QueueEntry, settings: &Settings, target: WatchTarget) -> Self {
        let player = settings.player_state();
        Self {
            channel_url: entry.channel_url.clone(),
            platform_host: settings.platform_host.clone(),
            target,
            required_category_id: entry.required_category_id,
            offline_checks_to_switch: settings.offline_fresh_checks_to_switch,
            player,
            launch: LaunchOptions::for_player(
                settings.headless(),
                settings.mute,
                player.mini,
                settings.extension_path.clone(),
            ),
            force_160p: settings.force_160p,
            initial_load_wait: Duration::from_secs(settings.timings.initial_load_wait_secs),
            script_timeout: Duration::from_secs(settings.timings.script_timeout_secs),
        }
    }
}

pub struct WatchSession {
    config: SessionConfig,
    launcher: Arc<dyn BrowserLauncher>,
    cookies: Arc<dyn CookieStore>,
    observer: Arc<dyn SessionObserver>,
    diagnostics: Diagnostics,
    stop: StopSignal,
    state: Arc<RwLock<SessionState>>,
    elapsed: Arc<AtomicU64>,
}

impl WatchSession {
    pub fn new(
        config: SessionConfig,
        launcher: Arc<dyn BrowserLauncher>,
        cookies: Arc<dyn CookieStore>,
        observer: Arc<dyn SessionObserver>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            config,
            launcher,
            cookies,
            observer,
            diagnostics,
            stop: StopSignal::new(),
            state: Arc::new(RwLock::new(SessionState::Starting)),
            elapsed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> SessionState {
        read_state(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        if let Ok(mut current) = self.state.write() {
            *current = state;
        }
    }

    fn elapsed_seconds(&self) -> u64 {
        self.elapsed.load(Ordering::SeqCst)
    }

    /// Runs the session on its own task.
    pub fn spawn(self) -> WatchHandle {
        let channel_url = self.config.channel_url.clone();
        let stop = self.stop.clone();
        let state = self.state.clone();
        let elapsed = self.elapsed.clone();
        let task = tokio::spawn(self.run());
        WatchHandle {
            channel_url,
            stop,
            state,
            elapsed,
            task,
        }
    }

    /// Drives the session to a terminal state, tears the browser down and reports the end.
    pub async fn run(self) -> SessionOutcome {
        // A panic inside the loop still owes the owner its terminal callback.
        let observer = self.observer.clone();
        let elapsed = self.elapsed.clone();
        let unwind_guard = scopeguard::guard_on_unwind((), move |_| {
            observer.on_finish(elapsed.load(Ordering::SeqCst), false);
        });

        self.diagnostics.info(
            TAG,
            format!(
                "🎬 Starting session for {} (target {}s)",
                self.config.channel_url,
                self.config.target.seconds()
            ),
        );

        let mut browser: Option<Box<dyn BrowserSession>> = None;
        let started = self.start(&mut browser).await;
        let (reason, error) = match (started, browser.as_deref()) {
            (Ok(()), Some(session)) => {
                self.set_state(SessionState::Running);
                (self.supervise(session).await, None)
            }
            (Ok(()), None) => (
                TerminationReason::Stopped,
                Some("browser session missing after start".to_string()),
            ),
            (Err(e), _) => {
                self.diagnostics.warn(
                    TAG,
                    format!("❌ Failed to start {}: {:#}", self.config.channel_url, e),
                );
                (TerminationReason::Stopped, Some(format!("{:#}", e)))
            }
        };

        if let Some(session) = browser.take() {
            if let Err(e) = session.quit().await {
                self.diagnostics
                    .debug(TAG, format!("Failed to quit browser: {}", e));
            }
        }

        let elapsed_seconds = self.elapsed_seconds();
        self.set_state(SessionState::Terminated(reason));
        self.diagnostics.info(
            TAG,
            format!(
                "Session for {} ended: {} after {}s",
                self.config.channel_url, reason, elapsed_seconds
            ),
        );

        drop(unwind_guard);
        self.observer
            .on_finish(elapsed_seconds, reason == TerminationReason::Completed);

        SessionOutcome {
            reason,
            elapsed_seconds,
            error,
        }
    }

    async fn start(&self, slot: &mut Option<Box<dyn BrowserSession>>) -> Result<()> {
        let launched = self
            .launcher
            .launch(&self.config.launch)
            .await
            .context("Failed to launch browser")?;
        let browser: &dyn BrowserSession = &**slot.insert(launched);

        if let Some(domain) = domain_from_url(&self.config.channel_url) {
            browser
                .navigate(&format!("https://{}", domain))
                .await
                .with_context(|| format!("Failed to open https://{}", domain))?;

            let applied = apply_cookies(self.cookies.as_ref(), browser, &domain).await;
            self.diagnostics
                .debug(TAG, format!("Applied {} cookies for {}", applied, domain));

            if self.config.force_160p {
                if let Err(e) = browser.execute_script(FORCE_QUALITY_SCRIPT, vec![]).await {
                    self.diagnostics
                        .debug(TAG, format!("Error setting stream_quality: {}", e));
                }
            }
        }

        browser
            .navigate(&self.config.channel_url)
            .await
            .with_context(|| format!("Failed to open {}", self.config.channel_url))?;

        sleep(self.config.initial_load_wait).await;

        PlayerStateEnforcer::new(self.config.player, self.diagnostics.clone())
            .apply(browser)
            .await;
        Ok(())
    }

    async fn supervise(&self, browser: &dyn BrowserSession) -> TerminationReason {
        let mut oracle = LivenessOracle::new(
            &self.config.channel_url,
            &self.config.platform_host,
            self.config.script_timeout,
            self.diagnostics.clone(),
        );
        let mut category = CategoryMonitor::new(
            &self.config.channel_url,
            &self.config.platform_host,
            self.config.required_category_id,
            self.config.script_timeout,
            self.diagnostics.clone(),
        );
        let player = PlayerStateEnforcer::new(self.config.player, self.diagnostics.clone());
        let threshold = self.config.offline_checks_to_switch;
        let mut offline_fresh_checks: u32 = 0;
        let mut last_report: Option<Instant> = None;

        loop {
            if self.stop.is_stopped() {
                return TerminationReason::Stopped;
            }

            let reading = oracle.check(browser).await;
            player.apply(browser).await;

            if reading.fresh {
                if reading.live {
                    offline_fresh_checks = 0;
                } else {
                    offline_fresh_checks += 1;
                    self.diagnostics.debug(
                        TAG,
                        format!(
                            "Offline probe {}/{} for {}",
                            offline_fresh_checks, threshold, self.config.channel_url
                        ),
                    );
                }
            }
            if !reading.live && threshold > 0 && offline_fresh_checks >= threshold {
                self.diagnostics.info(
                    TAG,
                    format!("📴 {} is offline, switching", self.config.channel_url),
                );
                return TerminationReason::Offline;
            }

            if category.check_mismatch(browser, reading.live).await.is_some() {
                return TerminationReason::WrongCategory;
            }

            if reading.live {
                self.elapsed.fetch_add(1, Ordering::SeqCst);
            }

            let now = Instant::now();
            if last_report.map_or(true, |at| now.duration_since(at) >= PROGRESS_INTERVAL) {
                last_report = Some(now);
                self.observer
                    .on_progress(self.elapsed_seconds(), reading.live);
            }

            if self.target_reached() {
                self.diagnostics.info(
                    TAG,
                    format!("✅ Target reached on {}", self.config.channel_url),
                );
                return TerminationReason::Completed;
            }

            sleep(LOOP_CADENCE).await;
        }
    }

    fn target_reached(&self) -> bool {
        match &self.config.target {
            WatchTarget::Individual { seconds } => {
                *seconds > 0 && self.elapsed_seconds() >= *seconds
            }
            WatchTarget::Cumulative { seconds, total } => *seconds > 0 && total() >= *seconds,
        }
    }
}

fn read_state(state: &RwLock<SessionState>) -> SessionState {
    state
        .read()
        .map(|s| *s)
        .unwrap_or(SessionState::Terminated(TerminationReason::Stopped))
}

/// Owner-side handle on a spawned session: stop, poll, join.
pub struct WatchHandle {
    channel_url: String,
    stop: StopSignal,
    state: Arc<RwLock<SessionState>>,
    elapsed: Arc<AtomicU64>,
    task: JoinHandle<SessionOutcome>,
}

impl WatchHandle {
    pub fn channel_url(&self) -> &str {
        &self.channel_url
    }

    /// Request a cooperative stop; honored at the session's next tick.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn state(&self) -> SessionState {
        read_state(&self.state)
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed.load(Ordering::SeqCst)
    }

    /// True once the session has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub async fn join(self) -> SessionOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => SessionOutcome {
                reason: TerminationReason::Stopped,
                elapsed_seconds: self.elapsed.load(Ordering::SeqCst),
                error: Some(format!("session task failed: {}", e)),
            },
        }
    }
}
