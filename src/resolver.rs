//! Presence resolver - folds the session set into one displayable activity
//!
//! Everything here is a pure function of the session snapshot and `now`.
//! Text rotation uses [`stable_pick`], which is bit-for-bit reproducible
//! (unsigned 32-bit multiply-add-mod) so the same choice is shown for the whole
//! of a 5-minute bucket.

use crate::messages::{
    COUNT_PLACEHOLDER, DEFAULT_DETAILS, DEFAULT_PROJECT_LIST, DEFAULT_STATE, JUST_STARTED,
    LARGE_IMAGE_KEY, LARGE_IMAGE_TEXT, MULTI_SESSION_TOOLTIPS, pool_for_count,
};
use crate::session::{ActivityCounts, Session, SessionStatus, SmallImage};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Maximum length of any displayed field, in characters
pub const MAX_FIELD_LENGTH: usize = 128;
/// Shorter strings are rejected by the presence service
pub const MIN_FIELD_LENGTH: usize = 2;
/// Text rotation bucket
pub const MESSAGE_ROTATION_INTERVAL_MS: u64 = 300_000;

const KNUTH_MULTIPLIER: u32 = 2_654_435_761;
const SEPARATOR: &str = " \u{00b7} ";
const ELLIPSIS: char = '\u{2026}';

/// Descriptor handed to the presence publisher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub details: String,
    pub state: String,
    pub large_image_key: String,
    pub large_image_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_image_key: Option<SmallImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_image_text: Option<String>,
    /// Epoch milliseconds used as the elapsed-time origin
    pub start_timestamp: u64,
}

/// Category accounting for more than half of the aggregated counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DominantMode {
    Coding,
    Terminal,
    Searching,
    Thinking,
    Mixed,
}

impl DominantMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Terminal => "terminal",
            Self::Searching => "searching",
            Self::Thinking => "thinking",
            Self::Mixed => "mixed",
        }
    }

    /// Small image representing this mode
    pub fn small_image(&self) -> SmallImage {
        match self {
            Self::Coding => SmallImage::Coding,
            Self::Terminal => SmallImage::Terminal,
            Self::Searching => SmallImage::Searching,
            Self::Thinking => SmallImage::Thinking,
            Self::Mixed => SmallImage::MultiSession,
        }
    }
}

/// Resolve the current presence, or `None` when it should be cleared
pub fn resolve(sessions: &[Session], now: u64) -> Option<Activity> {
    match sessions {
        [] => None,
        [session] => Some(single_session(session)),
        _ => Some(multi_session(sessions, now)),
    }
}

fn single_session(session: &Session) -> Activity {
    let details = sanitize_field(&session.details).unwrap_or_else(|| DEFAULT_DETAILS.to_string());
    let state = sanitize_field(&format!("Working on {}", session.project_name))
        .unwrap_or_else(|| DEFAULT_STATE.to_string());

    Activity {
        details,
        state,
        large_image_key: LARGE_IMAGE_KEY.to_string(),
        large_image_text: LARGE_IMAGE_TEXT.to_string(),
        small_image_key: Some(session.small_image_key),
        small_image_text: sanitize_field(&session.small_image_text),
        start_timestamp: session.started_at,
    }
}

fn multi_session(sessions: &[Session], now: u64) -> Activity {
    let count = sessions.len();
    let started_at = earliest_start(sessions);

    let mut details = stable_pick(pool_for_count(count), started_at, now).to_string();
    if count > 4 {
        details = details.replace(COUNT_PLACEHOLDER, &count.to_string());
    }

    let state = format_stats_line(sessions, now);
    let mode = detect_dominant_mode(sessions);
    trace!(sessions = count, mode = mode.as_str(), "multi-session presence");
    let small_image_key = mode.small_image();
    let tooltip = stable_pick(MULTI_SESSION_TOOLTIPS, started_at.wrapping_add(1), now);

    Activity {
        details,
        state,
        large_image_key: LARGE_IMAGE_KEY.to_string(),
        large_image_text: LARGE_IMAGE_TEXT.to_string(),
        small_image_key: Some(small_image_key),
        small_image_text: sanitize_field(tooltip),
        start_timestamp: started_at,
    }
}

/// Earliest `started_at`; the first encountered wins ties
fn earliest_start(sessions: &[Session]) -> u64 {
    sessions
        .iter()
        .map(|s| s.started_at)
        .min()
        .unwrap_or_default()
}

/// Deterministic, time-bucketed choice from `pool`.
///
/// Returns the same entry for every `now` within one rotation bucket for a
/// given `seed`. Panics on an empty pool.
pub fn stable_pick<'a>(pool: &[&'a str], seed: u64, now: u64) -> &'a str {
    let bucket = (now / MESSAGE_ROTATION_INTERVAL_MS) as u32;
    let hash = bucket
        .wrapping_mul(KNUTH_MULTIPLIER)
        .wrapping_add(seed as u32);
    pool[hash as usize % pool.len()]
}

fn plural(n: u64, singular: &str, plural: &str) -> String {
    format!("{n} {}", if n == 1 { singular } else { plural })
}

fn total_counts(sessions: &[Session]) -> ActivityCounts {
    let mut totals = ActivityCounts::default();
    for session in sessions {
        totals.add(&session.activity_counts);
    }
    totals
}

/// Elapsed-time suffix, `None` below one minute
fn format_elapsed(elapsed_ms: u64) -> Option<String> {
    let minutes = elapsed_ms / 60_000;
    match (minutes / 60, minutes % 60) {
        (0, 0) => None,
        (0, m) => Some(format!("{m}m deep")),
        (h, 0) => Some(format!("{h}h deep")),
        (h, m) => Some(format!("{h}h {m}m deep")),
    }
}

/// Aggregated counters plus elapsed time, e.g. `28 edits · 8 cmds · 2h 15m deep`
pub fn format_stats_line(sessions: &[Session], now: u64) -> String {
    let totals = total_counts(sessions);
    let mut parts = Vec::new();

    let units = [
        (totals.edits, "edit", "edits"),
        (totals.commands, "cmd", "cmds"),
        (totals.searches, "search", "searches"),
        (totals.reads, "read", "reads"),
        (totals.thinks, "think", "thinks"),
    ];
    for (n, singular, plural_unit) in units {
        if n > 0 {
            parts.push(plural(n, singular, plural_unit));
        }
    }

    if !sessions.is_empty() {
        let elapsed = now.saturating_sub(earliest_start(sessions));
        parts.extend(format_elapsed(elapsed));
    }

    if parts.is_empty() {
        return JUST_STARTED.to_string();
    }
    truncate_field(&parts.join(SEPARATOR))
}

/// Category with more than half of the edits/commands/searches/thinks total.
/// Reads never decide the mode.
pub fn detect_dominant_mode(sessions: &[Session]) -> DominantMode {
    let totals = total_counts(sessions);
    let modes = [
        (DominantMode::Coding, totals.edits),
        (DominantMode::Terminal, totals.commands),
        (DominantMode::Searching, totals.searches),
        (DominantMode::Thinking, totals.thinks),
    ];

    let total: u64 = modes.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return DominantMode::Mixed;
    }

    let mut top = modes[0];
    for candidate in &modes[1..] {
        if candidate.1 > top.1 {
            top = *candidate;
        }
    }

    if top.1 * 2 > total {
        top.0
    } else {
        DominantMode::Mixed
    }
}

/// Deduplicated project names, `name (×n)` for repeats, joined and cut to
/// fit with a `… +N more` suffix
pub fn format_project_list(sessions: &[Session]) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for session in sessions {
        match counts
            .iter_mut()
            .find(|(name, _)| *name == session.project_name)
        {
            Some((_, n)) => *n += 1,
            None => counts.push((session.project_name.as_str(), 1)),
        }
    }

    let names: Vec<String> = counts
        .into_iter()
        .map(|(name, n)| {
            if n > 1 {
                format!("{name} (\u{00d7}{n})")
            } else {
                name.to_string()
            }
        })
        .collect();

    let joined = names.join(SEPARATOR);
    if char_len(&joined) <= MAX_FIELD_LENGTH {
        return sanitize_field(&joined).unwrap_or_else(|| DEFAULT_PROJECT_LIST.to_string());
    }

    let mut result = String::new();
    let mut included = 0;
    for name in &names {
        let separator = if included > 0 { SEPARATOR } else { "" };
        let remaining = names.len() - included - 1;
        let suffix = if remaining > 0 {
            more_suffix(remaining)
        } else {
            String::new()
        };
        let candidate = format!("{result}{separator}{name}");

        if char_len(&candidate) + char_len(&suffix) > MAX_FIELD_LENGTH {
            result.push_str(&more_suffix(names.len() - included));
            break;
        }

        result = candidate;
        included += 1;
    }

    sanitize_field(&result).unwrap_or_else(|| DEFAULT_PROJECT_LIST.to_string())
}

fn more_suffix(n: usize) -> String {
    format!(" {ELLIPSIS} +{n} more")
}

/// Session to feature when only one can be shown: active beats idle, then
/// the latest activity. The earlier session wins exact ties.
pub fn most_recent_session(sessions: &[Session]) -> Option<&Session> {
    sessions.iter().reduce(|best, current| {
        match (best.status, current.status) {
            (SessionStatus::Active, SessionStatus::Idle) => best,
            (SessionStatus::Idle, SessionStatus::Active) => current,
            _ if current.last_activity_at > best.last_activity_at => current,
            _ => best,
        }
    })
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut to [`MAX_FIELD_LENGTH`] characters, ending in an ellipsis when cut
fn truncate_field(value: &str) -> String {
    if char_len(value) <= MAX_FIELD_LENGTH {
        return value.to_string();
    }
    let mut out: String = value.chars().take(MAX_FIELD_LENGTH - 1).collect();
    out.push(ELLIPSIS);
    out
}

/// Truncate, then reject anything shorter than [`MIN_FIELD_LENGTH`]
pub fn sanitize_field(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    let truncated = truncate_field(value);
    (char_len(&truncated) >= MIN_FIELD_LENGTH).then_some(truncated)
}
