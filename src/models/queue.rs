use serde::{Deserialize, Serialize};

/// One channel queued for watching, optionally grouped into a drops campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    #[serde(alias = "url")]
    pub channel_url: String,
    /// 0 means watch until stopped
    #[serde(alias = "minutes", default)]
    pub target_minutes: u64,
    #[serde(alias = "is_global_drop", default)]
    pub is_cumulative: bool,
    #[serde(default)]
    pub campaign_id: Option<String>,
    /// Interchangeable channels of the same campaign, in discovery order
    #[serde(alias = "campaign_channels", default)]
    pub sibling_channels: Vec<String>,
    #[serde(default)]
    pub required_category_id: Option<i64>,
    #[serde(default)]
    pub tried_channels: Vec<String>,
    /// Seconds this entry contributed toward its campaign total
    #[serde(alias = "cumulative_time", default)]
    pub cumulative_seconds: u64,
    #[serde(default)]
    pub finished: bool,
    #[serde(skip)]
    pub status: EntryStatus,
}

impl QueueEntry {
    pub fn new(channel_url: impl Into<String>, target_minutes: u64) -> Self {
        Self {
            channel_url: channel_url.into(),
            target_minutes,
            is_cumulative: false,
            campaign_id: None,
            sibling_channels: Vec::new(),
            required_category_id: None,
            tried_channels: Vec::new(),
            cumulative_seconds: 0,
            finished: false,
            status: EntryStatus::Idle,
        }
    }

    /// Attach the entry to a campaign and its sibling channels.
    pub fn with_campaign(
        mut self,
        campaign_id: impl Into<String>,
        sibling_channels: Vec<String>,
    ) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self.sibling_channels = sibling_channels;
        self
    }

    pub fn target_seconds(&self) -> u64 {
        self.target_minutes * 60
    }

    /// Siblings plus the entry's own channel, without duplicates.
    pub fn candidate_channels(&self) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::with_capacity(self.sibling_channels.len() + 1);
        for channel in &self.sibling_channels {
            if !candidates.contains(channel) {
                candidates.push(channel.clone());
            }
        }
        if !candidates.contains(&self.channel_url) {
            candidates.push(self.channel_url.clone());
        }
        candidates
    }

    pub fn has_siblings(&self) -> bool {
        !self.sibling_channels.is_empty()
    }

    /// Unfinished and not stopped by the user.
    pub fn is_retryable(&self) -> bool {
        !self.finished && self.status != EntryStatus::Stopped
    }

    /// Record the current channel as attempted for this fallback cycle.
    pub fn mark_current_tried(&mut self) {
        if !self.tried_channels.contains(&self.channel_url) {
            self.tried_channels.push(self.channel_url.clone());
        }
    }
}

/// Runtime-only display state of a queue entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EntryStatus {
    #[default]
    Idle,
    Watching {
        elapsed_seconds: u64,
        live: bool,
    },
    AwaitingRetry,
    /// Stopped by the user; only an explicit start plays it again
    Stopped,
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_include_own_channel_once() {
        let entry = QueueEntry::new("https://kick.com/a", 30).with_campaign(
            "camp",
            vec!["https://kick.com/a".to_string(), "https://kick.com/b".to_string()],
        );
        assert_eq!(entry.candidate_channels().len(), 2);

        let entry = QueueEntry::new("https://kick.com/z", 30)
            .with_campaign("camp", vec!["https://kick.com/a".to_string()]);
        assert_eq!(
            entry.candidate_channels(),
            vec!["https://kick.com/a".to_string(), "https://kick.com/z".to_string()]
        );
    }

    #[test]
    fn test_legacy_item_fields_deserialize() {
        let json = r#"{
            "url": "https://kick.com/streamer",
            "minutes": 120,
            "campaign_id": "42",
            "campaign_channels": ["https://kick.com/other"],
            "required_category_id": 5,
            "is_global_drop": true,
            "cumulative_time": 300
        }"#;
        let entry: QueueEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.channel_url, "https://kick.com/streamer");
        assert_eq!(entry.target_seconds(), 7200);
        assert!(entry.is_cumulative);
        assert_eq!(entry.required_category_id, Some(5));
        assert_eq!(entry.cumulative_seconds, 300);
        assert!(entry.tried_channels.is_empty());
        assert!(!entry.finished);
    }

    #[test]
    fn test_stopped_and_finished_entries_are_not_retried() {
        let mut entry = QueueEntry::new("https://kick.com/a", 30);
        assert!(entry.is_retryable());
        entry.status = EntryStatus::Stopped;
        assert!(!entry.is_retryable());
        entry.status = EntryStatus::AwaitingRetry;
        entry.finished = true;
        assert!(!entry.is_retryable());
    }

    #[test]
    fn test_mark_current_tried_is_idempotent() {
        let mut entry = QueueEntry::new("https://kick.com/a", 0);
        entry.mark_current_tried();
        entry.mark_current_tried();
        assert_eq!(entry.tried_channels, vec!["https://kick.com/a".to_string()]);
    }
}
