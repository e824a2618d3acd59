use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Why a watch session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    Offline,
    WrongCategory,
    Stopped,
}

impl TerminationReason {
    /// Offline and wrong-category endings drive the campaign fallback protocol.
    pub fn wants_fallback(&self) -> bool {
        matches!(self, TerminationReason::Offline | TerminationReason::WrongCategory)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminationReason::Completed => "completed",
            TerminationReason::Offline => "offline",
            TerminationReason::WrongCategory => "wrong_category",
            TerminationReason::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Which liveness source produced the last answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveSource {
    Api,
    PageState,
    DomOffline,
    Unknown,
}

/// Desired state of the page's video element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerState {
    pub muted: bool,
    pub hidden: bool,
    pub mini: bool,
}

/// How a session decides it is done.
#[derive(Clone)]
pub enum WatchTarget {
    /// Stop once this session alone has watched `seconds` of live time (0 = never).
    Individual { seconds: u64 },
    /// Stop once the campaign-wide total reported by `total` reaches `seconds`.
    Cumulative {
        seconds: u64,
        total: CumulativeTimeFn,
    },
}

impl WatchTarget {
    pub fn seconds(&self) -> u64 {
        match self {
            WatchTarget::Individual { seconds } => *seconds,
            WatchTarget::Cumulative { seconds, .. } => *seconds,
        }
    }
}

impl fmt::Debug for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchTarget::Individual { seconds } => {
                f.debug_struct("Individual").field("seconds", seconds).finish()
            }
            WatchTarget::Cumulative { seconds, .. } => {
                f.debug_struct("Cumulative").field("seconds", seconds).finish()
            }
        }
    }
}

/// Owner-supplied accessor for the campaign's watched seconds across all sibling sessions.
pub type CumulativeTimeFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Final result of one watch session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub reason: TerminationReason,
    pub elapsed_seconds: u64,
    /// Set when the browser session could not be started
    pub error: Option<String>,
}

impl SessionOutcome {
    pub fn completed(&self) -> bool {
        self.reason == TerminationReason::Completed
    }
}

/// Lifecycle of a watch session. Every `Terminated` state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Terminated(TerminationReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated(_))
    }
}
