//! Session record and the request payloads that mutate it

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Placeholder details for a freshly started session
pub const STARTING_DETAILS: &str = "Starting session...";

/// Session liveness status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Received an accepted update within the idle threshold
    #[default]
    Active,
    /// Silent for longer than the idle threshold
    Idle,
}

/// Small-image category shown next to the presence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmallImage {
    Starting,
    Thinking,
    Coding,
    Terminal,
    Reading,
    Searching,
    Idle,
    MultiSession,
}

/// One of the five per-session activity counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Edits,
    Commands,
    Searches,
    Reads,
    Thinks,
}

impl SmallImage {
    /// Asset key understood by the presence publisher
    pub fn key(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Thinking => "thinking",
            Self::Coding => "coding",
            Self::Terminal => "terminal",
            Self::Reading => "reading",
            Self::Searching => "searching",
            Self::Idle => "idle",
            Self::MultiSession => "multi-session",
        }
    }

    /// Default hover label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Starting => "Starting up",
            Self::Thinking => "Thinking...",
            Self::Coding => "Writing code",
            Self::Terminal => "Running a command",
            Self::Reading => "Reading files",
            Self::Searching => "Searching",
            Self::Idle => "Idle",
            Self::MultiSession => "Multiple sessions",
        }
    }

    /// Counter bumped when an accepted update leaves the session in this category
    pub fn counter(&self) -> Option<Counter> {
        match self {
            Self::Coding => Some(Counter::Edits),
            Self::Terminal => Some(Counter::Commands),
            Self::Searching => Some(Counter::Searches),
            Self::Reading => Some(Counter::Reads),
            Self::Thinking => Some(Counter::Thinks),
            Self::Starting | Self::Idle | Self::MultiSession => None,
        }
    }
}

/// Per-session activity counters (monotonic for the session's lifetime)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub edits: u64,
    pub commands: u64,
    pub searches: u64,
    pub reads: u64,
    pub thinks: u64,
}

impl ActivityCounts {
    pub fn increment(&mut self, counter: Counter) {
        let slot = match counter {
            Counter::Edits => &mut self.edits,
            Counter::Commands => &mut self.commands,
            Counter::Searches => &mut self.searches,
            Counter::Reads => &mut self.reads,
            Counter::Thinks => &mut self.thinks,
        };
        *slot = slot.saturating_add(1);
    }

    /// Element-wise sum
    pub fn add(&mut self, other: &ActivityCounts) {
        self.edits = self.edits.saturating_add(other.edits);
        self.commands = self.commands.saturating_add(other.commands);
        self.searches = self.searches.saturating_add(other.searches);
        self.reads = self.reads.saturating_add(other.reads);
        self.thinks = self.thinks.saturating_add(other.thinks);
    }
}

/// Source of an activity update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePriority {
    /// Frequent, automatic shell-hook signal
    Hook,
    /// Explicit status set by the agent itself
    Mcp,
}

/// A tracked unit of work, owned exclusively by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub pid: u32,
    pub project_path: String,
    pub project_name: String,
    pub details: String,
    pub small_image_key: SmallImage,
    pub small_image_text: String,
    /// Epoch milliseconds
    pub started_at: u64,
    pub last_activity_at: u64,
    /// 0 until the first accepted `mcp` update
    pub last_mcp_update_at: u64,
    pub status: SessionStatus,
    pub activity_counts: ActivityCounts,
}

impl Session {
    pub(crate) fn new(session_id: String, request: StartRequest, now: u64) -> Self {
        let project_name = project_name(&request.project_path);
        Self {
            session_id,
            pid: request.pid,
            project_path: request.project_path,
            project_name,
            details: STARTING_DETAILS.to_string(),
            small_image_key: SmallImage::Starting,
            small_image_text: SmallImage::Starting.label().to_string(),
            started_at: now,
            last_activity_at: now,
            last_mcp_update_at: 0,
            status: SessionStatus::Active,
            activity_counts: ActivityCounts::default(),
        }
    }
}

/// Last path segment, ignoring trailing separators
pub fn project_name(project_path: &str) -> String {
    let trimmed = project_path.trim_end_matches(['/', '\\']);
    Path::new(trimmed)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Body of a start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub pid: u32,
    pub project_path: String,
}

/// Body of an activity request. Omitted fields keep their previous value;
/// a null or empty `details` is treated as omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityUpdate {
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub small_image_key: Option<SmallImage>,
    #[serde(default)]
    pub small_image_text: Option<String>,
    #[serde(default)]
    pub priority: Option<UpdatePriority>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_mapping() {
        assert_eq!(SmallImage::Coding.counter(), Some(Counter::Edits));
        assert_eq!(SmallImage::Terminal.counter(), Some(Counter::Commands));
        assert_eq!(SmallImage::Searching.counter(), Some(Counter::Searches));
        assert_eq!(SmallImage::Reading.counter(), Some(Counter::Reads));
        assert_eq!(SmallImage::Thinking.counter(), Some(Counter::Thinks));
        assert_eq!(SmallImage::Starting.counter(), None);
        assert_eq!(SmallImage::Idle.counter(), None);
    }

    #[test]
    fn small_image_serialization() {
        assert_eq!(
            serde_json::to_string(&SmallImage::MultiSession).unwrap(),
            "\"multi-session\""
        );
        let parsed: SmallImage = serde_json::from_str("\"coding\"").unwrap();
        assert_eq!(parsed, SmallImage::Coding);
        assert_eq!(parsed.key(), "coding");
    }

    #[test]
    fn project_name_is_last_segment() {
        assert_eq!(project_name("/home/user/my-project"), "my-project");
        assert_eq!(project_name("/home/user/my-project/"), "my-project");
        assert_eq!(project_name("relative"), "relative");
    }

    #[test]
    fn new_session_defaults() {
        let session = Session::new(
            "s1".into(),
            StartRequest {
                pid: 42,
                project_path: "/tmp/project".into(),
            },
            1_000,
        );
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.details, STARTING_DETAILS);
        assert_eq!(session.small_image_key, SmallImage::Starting);
        assert_eq!(session.started_at, 1_000);
        assert_eq!(session.last_activity_at, 1_000);
        assert_eq!(session.activity_counts, ActivityCounts::default());
    }

    #[test]
    fn activity_update_null_details_is_none() {
        let update: ActivityUpdate =
            serde_json::from_str(r#"{"details":null,"priority":"mcp"}"#).unwrap();
        assert_eq!(update.details, None);
        assert_eq!(update.priority, Some(UpdatePriority::Mcp));
    }

    #[test]
    fn session_serializes_camel_case() {
        let session = Session::new(
            "s1".into(),
            StartRequest {
                pid: 7,
                project_path: "/a/b".into(),
            },
            5,
        );
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"sessionId\":\"s1\""));
        assert!(json.contains("\"smallImageKey\":\"starting\""));
        assert!(json.contains("\"status\":\"active\""));
        assert!(json.contains("\"activityCounts\""));
    }
}
