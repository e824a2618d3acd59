use crate::models::queue::QueueEntry;
use crate::services::diagnostic_logger::Diagnostics;
use async_trait::async_trait;
use std::sync::Arc;

const TAG: &str = "FALLBACK";

/// Direct, uncached liveness probe for an arbitrary channel.
#[async_trait]
pub trait ChannelLiveProbe: Send + Sync {
    async fn is_live(&self, channel_url: &str) -> bool;
}

/// Picks the next live sibling channel of a campaign once the current one is unusable.
pub struct CampaignFallbackCoordinator {
    probe: Arc<dyn ChannelLiveProbe>,
    diagnostics: Diagnostics,
}

impl CampaignFallbackCoordinator {
    pub fn new(probe: Arc<dyn ChannelLiveProbe>, diagnostics: Diagnostics) -> Self {
        Self { probe, diagnostics }
    }

    /// Returns the first untried live sibling and records it in `tried_channels`.
    ///
    /// A cycle that has already covered every candidate starts over. When no
    /// sibling is live, `tried_channels` is left as it was so the entry can be
    /// retried later.
    pub async fn next_channel(&self, entry: &mut QueueEntry) -> Option<String> {
        if !entry.has_siblings() {
            return None;
        }

        let candidates = entry.candidate_channels();
        if entry.tried_channels.len() >= candidates.len() {
            self.diagnostics.debug(
                TAG,
                format!(
                    "All {} channels tried for campaign {:?}, starting a new cycle",
                    candidates.len(),
                    entry.campaign_id
                ),
            );
            entry.tried_channels.clear();
        }

        for channel in &entry.sibling_channels {
            if *channel == entry.channel_url || entry.tried_channels.contains(channel) {
                continue;
            }
            if self.probe.is_live(channel).await {
                self.diagnostics
                    .info(TAG, format!("🔄 Switching to live channel {}", channel));
                let next = channel.clone();
                entry.tried_channels.push(next.clone());
                return Some(next);
            }
            self.diagnostics
                .debug(TAG, format!("{} is not live, skipping", channel));
        }

        self.diagnostics.info(
            TAG,
            format!(
                "No live alternative for {} ({} tried)",
                entry.channel_url,
                entry.tried_channels.len()
            ),
        );
        None
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers from a fixed table; unknown channels are offline.
    #[derive(Clone, Default)]
    pub struct ScriptedProbe {
        pub live: Arc<Mutex<HashMap<String, bool>>>,
        pub probed: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedProbe {
        pub fn with(channels: &[(&str, bool)]) -> Self {
            let probe = Self::default();
            for (channel, live) in channels {
                probe.set(channel, *live);
            }
            probe
        }

        pub fn set(&self, channel: &str, live: bool) {
            self.live.lock().unwrap().insert(channel.to_string(), live);
        }

        pub fn probed(&self) -> Vec<String> {
            self.probed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelLiveProbe for ScriptedProbe {
        async fn is_live(&self, channel_url: &str) -> bool {
            self.probed.lock().unwrap().push(channel_url.to_string());
            self.live
                .lock()
                .unwrap()
                .get(channel_url)
                .copied()
                .unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProbe;
    use super::*;

    const A: &str = "https://kick.com/a";
    const B: &str = "https://kick.com/b";
    const C: &str = "https://kick.com/c";

    fn coordinator(probe: &ScriptedProbe) -> CampaignFallbackCoordinator {
        CampaignFallbackCoordinator::new(Arc::new(probe.clone()), Diagnostics::default())
    }

    fn entry(current: &str, siblings: &[&str], tried: &[&str]) -> QueueEntry {
        let mut entry = QueueEntry::new(current, 60)
            .with_campaign("camp", siblings.iter().map(|s| s.to_string()).collect());
        entry.tried_channels = tried.iter().map(|s| s.to_string()).collect();
        entry
    }

    #[tokio::test]
    async fn test_picks_first_untried_live_sibling() {
        let probe = ScriptedProbe::with(&[(B, false), (C, true)]);
        let mut entry = entry(A, &[A, B, C], &[A]);

        assert_eq!(coordinator(&probe).next_channel(&mut entry).await, Some(C.to_string()));
        assert_eq!(entry.tried_channels, vec![A.to_string(), C.to_string()]);
        assert_eq!(probe.probed(), vec![B.to_string(), C.to_string()]);
    }

    #[tokio::test]
    async fn test_exhausted_cycle_resets_before_scanning() {
        let probe = ScriptedProbe::with(&[(B, true)]);
        let mut entry = entry(A, &[A, B], &[A, B]);

        assert_eq!(coordinator(&probe).next_channel(&mut entry).await, Some(B.to_string()));
        assert_eq!(entry.tried_channels, vec![B.to_string()]);
    }

    #[tokio::test]
    async fn test_no_live_candidate_keeps_tried_set() {
        let probe = ScriptedProbe::with(&[(B, false), (C, false)]);
        let mut entry = entry(A, &[A, B, C], &[A]);

        assert_eq!(coordinator(&probe).next_channel(&mut entry).await, None);
        assert_eq!(entry.tried_channels, vec![A.to_string()]);
    }

    #[tokio::test]
    async fn test_current_channel_never_offered() {
        let probe = ScriptedProbe::with(&[(A, true), (B, false)]);
        let mut entry = entry(A, &[A, B], &[]);

        assert_eq!(coordinator(&probe).next_channel(&mut entry).await, None);
        assert!(!probe.probed().contains(&A.to_string()));
    }

    #[tokio::test]
    async fn test_entry_without_siblings() {
        let probe = ScriptedProbe::default();
        let mut entry = QueueEntry::new(A, 60);
        assert_eq!(coordinator(&probe).next_channel(&mut entry).await, None);
        assert!(probe.probed().is_empty());
    }
}
