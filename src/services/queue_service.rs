//! The watch queue: runs one session at a time, books watch time into
//! campaigns, switches to sibling channels and retries channels that went
//! offline.
//!
//! `QueueManager` is the only writer of `Settings.items`. Session callbacks are
//! forwarded over a channel and applied on the manager's own loop, so entry
//! updates never race.

use crate::models::queue::EntryStatus;
use crate::models::session::{SessionOutcome, WatchTarget};
use crate::models::settings::Settings;
use crate::services::browser_service::BrowserLauncher;
use crate::services::cookie_jar_service::CookieStore;
use crate::services::diagnostic_logger::Diagnostics;
use crate::services::fallback_service::{CampaignFallbackCoordinator, ChannelLiveProbe};
use crate::services::settings_service::SettingsStore;
use crate::services::watch_session::{
    SessionConfig, SessionEvent, SessionObserver, WatchHandle, WatchSession,
};
use crate::utils::channel_url::{channel_display_name, domain_from_url};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, sleep, MissedTickBehavior};

const TAG: &str = "QUEUE";

#[derive(Debug)]
struct QueueEvent {
    generation: u64,
    idx: usize,
    event: SessionEvent,
}

/// Forwards one session's callbacks to the manager loop.
struct QueueObserver {
    generation: u64,
    idx: usize,
    live_elapsed: Arc<AtomicU64>,
    tx: UnboundedSender<QueueEvent>,
}

impl QueueObserver {
    fn send(&self, event: SessionEvent) {
        let _ = self.tx.send(QueueEvent {
            generation: self.generation,
            idx: self.idx,
            event,
        });
    }
}

impl SessionObserver for QueueObserver {
    fn on_progress(&self, elapsed_seconds: u64, live: bool) {
        // read by the cumulative accessor during the same tick
        self.live_elapsed.store(elapsed_seconds, Ordering::SeqCst);
        self.send(SessionEvent::Progress {
            elapsed_seconds,
            live,
        });
    }

    fn on_finish(&self, elapsed_seconds: u64, completed: bool) {
        self.send(SessionEvent::Finished {
            elapsed_seconds,
            completed,
        });
    }
}

struct ActiveSession {
    idx: usize,
    generation: u64,
    handle: WatchHandle,
}

/// Snapshot of the queue for status output.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub queue_running: bool,
    pub current_index: Option<usize>,
    pub current_channel: Option<String>,
    pub current_elapsed_seconds: u64,
    pub entries: Vec<(String, EntryStatus)>,
    pub last_update: DateTime<Utc>,
}

pub struct QueueManager {
    settings: Settings,
    store: SettingsStore,
    launcher: Arc<dyn BrowserLauncher>,
    cookies: Arc<dyn CookieStore>,
    probe: Arc<dyn ChannelLiveProbe>,
    coordinator: CampaignFallbackCoordinator,
    diagnostics: Diagnostics,
    active: Option<ActiveSession>,
    generation: u64,
    queue_running: bool,
    current_idx: Option<usize>,
    last_update: DateTime<Utc>,
    events_tx: UnboundedSender<QueueEvent>,
    events_rx: UnboundedReceiver<QueueEvent>,
}

impl QueueManager {
    pub fn new(
        settings: Settings,
        store: SettingsStore,
        launcher: Arc<dyn BrowserLauncher>,
        cookies: Arc<dyn CookieStore>,
        probe: Arc<dyn ChannelLiveProbe>,
        diagnostics: Diagnostics,
    ) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            coordinator: CampaignFallbackCoordinator::new(probe.clone(), diagnostics.clone()),
            settings,
            store,
            launcher,
            cookies,
            probe,
            diagnostics,
            active: None,
            generation: 0,
            queue_running: false,
            current_idx: None,
            last_update: Utc::now(),
            events_tx,
            events_rx,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_queue_running(&self) -> bool {
        self.queue_running
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active.as_ref().map(|a| a.idx)
    }

    pub fn has_unfinished(&self) -> bool {
        self.settings.items.iter().any(|e| !e.finished)
    }

    /// Unfinished entries the retry monitor may pick up; user-stopped ones are left alone.
    fn has_retryable(&self) -> bool {
        self.settings.items.iter().any(|e| e.is_retryable())
    }

    pub fn status(&self) -> QueueStatus {
        let playing = self.active.as_ref().filter(|a| !a.handle.is_finished());
        QueueStatus {
            queue_running: self.queue_running,
            current_index: playing.map(|a| a.idx),
            current_channel: playing.map(|a| a.handle.channel_url().to_string()),
            current_elapsed_seconds: playing.map_or(0, |a| a.handle.elapsed_seconds()),
            entries: self
                .settings
                .items
                .iter()
                .map(|e| (e.channel_url.clone(), e.status.clone()))
                .collect(),
            last_update: self.last_update,
        }
    }

    fn save(&mut self) {
        self.last_update = Utc::now();
        if let Err(e) = self.store.save(&self.settings) {
            self.diagnostics
                .warn(TAG, format!("⚠️ Failed to save settings: {:#}", e));
        }
    }

    /// Seconds watched for a campaign across all of its entries.
    pub fn campaign_total(&self, campaign_id: &str) -> u64 {
        self.settings
            .items
            .iter()
            .filter(|e| e.campaign_id.as_deref() == Some(campaign_id))
            .map(|e| e.cumulative_seconds)
            .sum()
    }

    pub async fn start_all_in_order(&mut self) {
        self.queue_running = true;
        self.current_idx = None;
        self.run_queue_from(0).await;
    }

    /// Starts the first unfinished entry at or after `start_idx` that can be watched.
    pub async fn run_queue_from(&mut self, start_idx: usize) {
        if self.active.is_some() {
            return;
        }
        for idx in start_idx..self.settings.items.len() {
            if self.settings.items[idx].finished {
                continue;
            }
            if self.start_index(idx).await {
                self.current_idx = Some(idx);
                return;
            }
        }

        self.current_idx = None;
        if self.has_retryable() {
            self.diagnostics
                .info(TAG, "⏳ Nothing live right now, waiting for retries");
        } else {
            self.queue_running = false;
            self.diagnostics.info(TAG, "✅ Queue finished");
        }
    }

    /// Stops whatever is playing and starts entry `idx`. Returns whether a session was spawned.
    pub async fn start_index(&mut self, idx: usize) -> bool {
        if idx >= self.settings.items.len() {
            return false;
        }
        self.stop_and_settle().await;

        let url = self.settings.items[idx].channel_url.clone();
        if !self.probe.is_live(&url).await {
            let mut switched = false;
            if self.settings.items[idx].has_siblings() {
                let entry = &mut self.settings.items[idx];
                entry.mark_current_tried();
                if let Some(next) = self.coordinator.next_channel(entry).await {
                    entry.channel_url = next;
                    switched = true;
                }
                self.save();
            }

            let live = if switched {
                let channel = self.settings.items[idx].channel_url.clone();
                self.diagnostics.info(
                    TAG,
                    format!(
                        "Switched to {} - waiting for page to load...",
                        channel_display_name(&channel)
                    ),
                );
                sleep(self.settle_delay()).await;
                self.probe.is_live(&channel).await
            } else {
                false
            };

            if !live {
                self.diagnostics.info(
                    TAG,
                    format!(
                        "📴 {} is offline, will retry",
                        self.settings.items[idx].channel_url
                    ),
                );
                self.settings.items[idx].status = EntryStatus::AwaitingRetry;
                return false;
            }
        }

        if domain_from_url(&self.settings.items[idx].channel_url).is_none() {
            self.diagnostics.warn(
                TAG,
                format!("Invalid channel URL: {}", self.settings.items[idx].channel_url),
            );
            return false;
        }

        self.spawn_session(idx);
        true
    }

    fn spawn_session(&mut self, idx: usize) {
        self.generation += 1;
        let live_elapsed = Arc::new(AtomicU64::new(0));
        let target = self.watch_target(idx, live_elapsed.clone());
        let entry = &self.settings.items[idx];
        let config = SessionConfig::from_entry(entry, &self.settings, target);
        let observer = QueueObserver {
            generation: self.generation,
            idx,
            live_elapsed,
            tx: self.events_tx.clone(),
        };

        self.diagnostics
            .info(TAG, format!("▶️ Playing {}", entry.channel_url));
        let handle = WatchSession::new(
            config,
            self.launcher.clone(),
            self.cookies.clone(),
            Arc::new(observer),
            self.diagnostics.clone(),
        )
        .spawn();

        self.settings.items[idx].status = EntryStatus::Watching {
            elapsed_seconds: 0,
            live: false,
        };
        self.active = Some(ActiveSession {
            idx,
            generation: self.generation,
            handle,
        });
    }

    /// Cumulative entries complete on the campaign total: what is already booked plus this session's live time.
    fn watch_target(&self, idx: usize, live_elapsed: Arc<AtomicU64>) -> WatchTarget {
        let entry = &self.settings.items[idx];
        let seconds = entry.target_seconds();
        match (&entry.campaign_id, entry.is_cumulative) {
            (Some(campaign_id), true) => {
                let booked = self.campaign_total(campaign_id);
                WatchTarget::Cumulative {
                    seconds,
                    total: Arc::new(move || booked + live_elapsed.load(Ordering::SeqCst)),
                }
            }
            _ => WatchTarget::Individual { seconds },
        }
    }

    /// Request a cooperative stop of the running session. The queue moves on once it ends.
    pub fn stop_active(&self) {
        if let Some(active) = &self.active {
            self.diagnostics.info(
                TAG,
                format!("⏹️ Stopping {}", active.handle.channel_url()),
            );
            active.handle.stop();
        }
    }

    /// Stops the queue and the running session, keeping its watch time.
    pub async fn stop(&mut self) {
        self.queue_running = false;
        self.current_idx = None;
        self.stop_and_settle().await;
    }

    async fn stop_and_settle(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.handle.stop();
        let outcome = active.handle.join().await;
        if !self.book_outcome(active.idx, &outcome) {
            let entry = &mut self.settings.items[active.idx];
            entry.finished = false;
            entry.status = EntryStatus::Idle;
        }
        self.save();
        sleep(Duration::from_secs(self.settings.timings.stop_pause_secs)).await;
    }

    fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settings.timings.switch_settle_secs)
    }

    /// Applies a finished session's time to its entry. Returns whether the entry is now done.
    fn book_outcome(&mut self, idx: usize, outcome: &SessionOutcome) -> bool {
        if idx >= self.settings.items.len() {
            return false;
        }
        let entry = &self.settings.items[idx];
        let target_seconds = entry.target_seconds();
        let mut completed = outcome.completed();

        if let (Some(campaign_id), true) = (entry.campaign_id.clone(), entry.is_cumulative) {
            self.settings.items[idx].cumulative_seconds += outcome.elapsed_seconds;
            let total = self.campaign_total(&campaign_id);
            self.diagnostics.debug(
                TAG,
                format!(
                    "Campaign {} cumulative time: {}s / {}s",
                    campaign_id, total, target_seconds
                ),
            );
            completed = target_seconds > 0 && total >= target_seconds;
            if completed {
                for other in self
                    .settings
                    .items
                    .iter_mut()
                    .filter(|e| e.campaign_id.as_deref() == Some(campaign_id.as_str()))
                {
                    other.finished = true;
                    other.status = EntryStatus::Finished;
                }
            }
        }

        if completed {
            let entry = &mut self.settings.items[idx];
            entry.finished = true;
            entry.status = EntryStatus::Finished;
            entry.tried_channels.clear();
        }
        completed
    }

    async fn handle_finish(&mut self, idx: usize, outcome: SessionOutcome) {
        let completed = self.book_outcome(idx, &outcome);
        self.save();

        if completed {
            self.diagnostics.info(
                TAG,
                format!("🏁 Finished {}", self.settings.items[idx].channel_url),
            );
        } else if outcome.reason.wants_fallback() {
            let entry = &mut self.settings.items[idx];
            let mut switched = false;
            if entry.campaign_id.is_some() && entry.has_siblings() {
                entry.mark_current_tried();
                if let Some(next) = self.coordinator.next_channel(entry).await {
                    entry.channel_url = next;
                    switched = true;
                }
            }
            self.save();

            if switched {
                self.diagnostics.info(
                    TAG,
                    format!(
                        "Switched to alternative: {} - waiting for page to load...",
                        channel_display_name(&self.settings.items[idx].channel_url)
                    ),
                );
                if self.queue_running {
                    sleep(self.settle_delay()).await;
                    if self.start_index(idx).await {
                        self.current_idx = Some(idx);
                        return;
                    }
                }
            } else {
                self.settings.items[idx].status = EntryStatus::AwaitingRetry;
                self.diagnostics.info(
                    TAG,
                    format!(
                        "📴 {} went {}, will retry",
                        self.settings.items[idx].channel_url, outcome.reason
                    ),
                );
            }
        } else {
            self.settings.items[idx].status = match &outcome.error {
                Some(error) => {
                    self.diagnostics.warn(
                        TAG,
                        format!(
                            "Session for {} failed: {}",
                            self.settings.items[idx].channel_url, error
                        ),
                    );
                    EntryStatus::Idle
                }
                None => EntryStatus::Stopped,
            };
        }

        if self.queue_running && self.current_idx.map_or(true, |current| current == idx) {
            self.run_queue_from(idx + 1).await;
        }
    }

    async fn handle_event(&mut self, event: QueueEvent) {
        let current = self.active.as_ref().map(|a| a.generation);
        if current != Some(event.generation) {
            // a session that was already stopped and booked
            return;
        }

        match event.event {
            SessionEvent::Progress {
                elapsed_seconds,
                live,
            } => {
                if let Some(entry) = self.settings.items.get_mut(event.idx) {
                    entry.status = EntryStatus::Watching {
                        elapsed_seconds,
                        live,
                    };
                }
            }
            SessionEvent::Finished { .. } => {
                let Some(active) = self.active.take() else {
                    return;
                };
                let outcome = active.handle.join().await;
                self.handle_finish(active.idx, outcome).await;
            }
        }
    }

    /// Starts the first unfinished entry whose channel is live again, if the queue is idle.
    pub async fn retry_offline(&mut self) {
        if !self.queue_running || self.active.is_some() {
            return;
        }
        for idx in 0..self.settings.items.len() {
            if !self.settings.items[idx].is_retryable() {
                continue;
            }
            let url = self.settings.items[idx].channel_url.clone();
            if self.probe.is_live(&url).await {
                self.diagnostics
                    .info(TAG, format!("🔁 {} is back online, retrying", url));
                if self.start_index(idx).await {
                    self.current_idx = Some(idx);
                }
                break;
            }
        }
    }

    /// Drives session callbacks and the retry monitor until `shutdown` resolves, then stops.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut retry = interval(Duration::from_secs(
            self.settings.timings.retry_monitor_secs.max(1),
        ));
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retry.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                _ = retry.tick() => self.retry_offline().await,
            }
        }

        self.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::queue::QueueEntry;
    use crate::services::browser_service::testing::{FakeBrowser, FakeLauncher};
    use crate::services::cookie_jar_service::FileCookieStore;
    use crate::services::fallback_service::testing::ScriptedProbe;
    use tempfile::TempDir;
    use tokio::time::Instant;

    const A: &str = "https://kick.com/a";
    const B: &str = "https://kick.com/b";

    struct Harness {
        manager: QueueManager,
        browser: FakeBrowser,
        launcher: FakeLauncher,
        probe: ScriptedProbe,
        store: SettingsStore,
        _dir: TempDir,
    }

    fn harness(items: Vec<QueueEntry>, browser: FakeBrowser, probe: ScriptedProbe) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("config.json"));
        let mut settings = Settings::default();
        settings.items = items;
        let launcher = FakeLauncher::new(browser.clone());
        let manager = QueueManager::new(
            settings,
            store.clone(),
            Arc::new(launcher.clone()),
            Arc::new(FileCookieStore::new(dir.path().join("cookies"))),
            Arc::new(probe.clone()),
            Diagnostics::default(),
        );
        Harness {
            manager,
            browser,
            launcher,
            probe,
            store,
            _dir: dir,
        }
    }

    fn campaign_entry(url: &str, minutes: u64) -> QueueEntry {
        QueueEntry::new(url, minutes).with_campaign("camp", vec![A.to_string(), B.to_string()])
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_runs_entries_one_after_another() {
        let mut h = harness(
            vec![QueueEntry::new(A, 1), QueueEntry::new(B, 1)],
            FakeBrowser::new().always_live(true),
            ScriptedProbe::with(&[(A, true), (B, true)]),
        );

        h.manager.start_all_in_order().await;
        assert_eq!(h.manager.active_index(), Some(0));
        h.manager.run_until(sleep(Duration::from_secs(600))).await;

        assert!(h.manager.settings().items.iter().all(|e| e.finished));
        assert!(!h.manager.is_queue_running());
        assert_eq!(h.launcher.launch_count(), 2);
        assert_eq!(h.browser.quit_calls(), 2);
        assert!(h.store.load().items.iter().all(|e| e.finished));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_entry_switches_to_live_sibling_after_settle() {
        let mut h = harness(
            vec![campaign_entry(A, 30)],
            FakeBrowser::new().always_live(true),
            ScriptedProbe::with(&[(A, false), (B, true)]),
        );

        let before = Instant::now();
        assert!(h.manager.start_index(0).await);
        assert!(before.elapsed() >= Duration::from_secs(8));

        let entry = &h.manager.settings().items[0];
        assert_eq!(entry.channel_url, B);
        assert_eq!(entry.tried_channels, vec![A.to_string(), B.to_string()]);
        // the session task launches its browser on first poll
        tokio::task::yield_now().await;
        assert_eq!(h.launcher.launch_count(), 1);
        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_entry_waits_for_retry_monitor() {
        let mut h = harness(
            vec![QueueEntry::new(A, 1)],
            FakeBrowser::new().always_live(true),
            ScriptedProbe::with(&[(A, false)]),
        );

        h.manager.start_all_in_order().await;
        assert_eq!(h.manager.active_index(), None);
        assert_eq!(
            h.manager.settings().items[0].status,
            EntryStatus::AwaitingRetry
        );
        assert!(h.manager.is_queue_running());

        h.probe.set(A, true);
        h.manager.run_until(sleep(Duration::from_secs(120))).await;
        assert_eq!(h.launcher.launch_count(), 1);
        assert!(h.manager.settings().items[0].finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_session_falls_back_to_sibling() {
        let mut h = harness(
            vec![campaign_entry(A, 30)],
            FakeBrowser::new().always_live(false),
            ScriptedProbe::with(&[(A, true), (B, true)]),
        );

        h.manager.start_all_in_order().await;
        h.manager.run_until(sleep(Duration::from_secs(60))).await;

        assert!(h.launcher.launch_count() >= 2);
        let navigations = h.browser.state.lock().unwrap().navigations.clone();
        assert!(navigations.contains(&A.to_string()));
        assert!(navigations.contains(&B.to_string()));
        let entry = &h.manager.settings().items[0];
        assert!(!entry.finished);
        assert!(entry.tried_channels.len() <= entry.candidate_channels().len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cumulative_campaign_finishes_every_sibling_entry() {
        let mut first = campaign_entry(A, 1);
        first.is_cumulative = true;
        first.cumulative_seconds = 30;
        first.tried_channels = vec![B.to_string()];
        let mut second = campaign_entry(B, 1);
        second.is_cumulative = true;

        let mut h = harness(
            vec![first, second],
            FakeBrowser::new().always_live(true),
            ScriptedProbe::with(&[(A, true), (B, true)]),
        );
        assert_eq!(h.manager.campaign_total("camp"), 30);

        h.manager.start_all_in_order().await;
        h.manager.run_until(sleep(Duration::from_secs(300))).await;

        let items = &h.manager.settings().items;
        assert!(items.iter().all(|e| e.finished));
        assert_eq!(items[0].cumulative_seconds, 60);
        assert!(items[0].tried_channels.is_empty());
        assert_eq!(h.manager.campaign_total("camp"), 60);
        assert_eq!(h.launcher.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_keeps_cumulative_progress() {
        let mut entry = campaign_entry(A, 30);
        entry.is_cumulative = true;
        let mut h = harness(
            vec![entry],
            FakeBrowser::new().always_live(true),
            ScriptedProbe::with(&[(A, true)]),
        );

        h.manager.start_all_in_order().await;
        h.manager.run_until(sleep(Duration::from_secs(20))).await;

        assert_eq!(h.manager.active_index(), None);
        assert_eq!(h.browser.quit_calls(), 1);
        let saved = h.store.load();
        assert!(!saved.items[0].finished);
        assert!(saved.items[0].cumulative_seconds > 0);
        assert_eq!(h.manager.settings().items[0].status, EntryStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_active_moves_queue_on() {
        let mut h = harness(
            vec![QueueEntry::new(A, 30), QueueEntry::new(B, 1)],
            FakeBrowser::new().always_live(true),
            ScriptedProbe::with(&[(A, true), (B, true)]),
        );

        h.manager.start_all_in_order().await;
        h.manager.stop_active();
        h.manager.run_until(sleep(Duration::from_secs(300))).await;

        let items = &h.manager.settings().items;
        assert!(!items[0].finished);
        assert_eq!(items[0].status, EntryStatus::Stopped);
        assert!(items[1].finished);
        // the retry monitor leaves the stopped entry alone
        assert_eq!(h.launcher.launch_count(), 2);
        assert!(!h.manager.is_queue_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_playing_entry() {
        let mut h = harness(
            vec![QueueEntry::new(A, 30)],
            FakeBrowser::new().always_live(true),
            ScriptedProbe::with(&[(A, true)]),
        );

        h.manager.start_all_in_order().await;
        sleep(Duration::from_secs(20)).await;
        let status = h.manager.status();
        assert!(status.queue_running);
        assert_eq!(status.current_index, Some(0));
        assert_eq!(status.current_channel.as_deref(), Some(A));
        assert!(status.current_elapsed_seconds > 0);

        h.manager.stop().await;
        let status = h.manager.status();
        assert!(!status.queue_running);
        assert_eq!(status.current_channel, None);
    }
}
