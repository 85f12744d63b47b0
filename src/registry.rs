//! Session registry - owns active sessions, arbitrates updates, sweeps stale ones

use crate::clock::{Clock, SystemClock};
use crate::liveness::{ProcessProbe, SignalProbe};
use crate::session::{ActivityUpdate, Session, SessionStatus, StartRequest, UpdatePriority};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Hook updates are discarded for this long after an accepted MCP update
pub const MCP_PRIORITY_WINDOW: Duration = Duration::from_secs(30);

/// Callback invoked with a consistent snapshot after every committed mutation
pub type ChangeListener = Box<dyn FnMut(&[Session]) + Send>;

/// Outcome of one stale sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    /// Owning process no longer alive
    pub dead: Vec<String>,
    /// Silent for at least the removal timeout
    pub expired: Vec<String>,
    /// Demoted to idle
    pub idled: Vec<String>,
}

impl SweepSummary {
    pub fn changed(&self) -> bool {
        !(self.dead.is_empty() && self.expired.is_empty() && self.idled.is_empty())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Whether `session` is inside its MCP priority window at `now`
pub fn is_in_mcp_window(session: &Session, now: u64) -> bool {
    session.last_mcp_update_at > 0
        && now.saturating_sub(session.last_mcp_update_at) < millis(MCP_PRIORITY_WINDOW)
}

/// Registry of active sessions
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    listeners: Vec<ChangeListener>,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn ProcessProbe>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Registry backed by the system clock and signal-0 liveness probing
    pub fn new() -> Self {
        Self::with_env(Arc::new(SystemClock), Arc::new(SignalProbe))
    }

    pub fn with_env(clock: Arc<dyn Clock>, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            sessions: HashMap::new(),
            listeners: Vec::new(),
            clock,
            probe,
        }
    }

    /// Register a change listener. Listeners run synchronously, in
    /// registration order, once per committed batch of mutations.
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: FnMut(&[Session]) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn notify_change(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let snapshot = self.get_all_sessions();
        for listener in &mut self.listeners {
            listener(&snapshot);
        }
    }

    /// Create a session. Deduplication against an existing session is the
    /// caller's concern; an existing entry under the same id is replaced.
    pub fn start_session(&mut self, session_id: &str, request: StartRequest) -> &Session {
        let now = self.clock.now_ms();
        let session = Session::new(session_id.to_string(), request, now);
        info!(
            %session_id,
            pid = session.pid,
            project = %session.project_name,
            "session started"
        );
        self.sessions.insert(session_id.to_string(), session);
        debug!("{} total session(s)", self.sessions.len());
        self.notify_change();
        &self.sessions[session_id]
    }

    /// Apply an activity update subject to priority arbitration.
    ///
    /// Returns `None` for an unknown session. A hook update inside the MCP
    /// priority window is discarded and the unchanged session is returned.
    pub fn update_activity(&mut self, session_id: &str, update: ActivityUpdate) -> Option<&Session> {
        let now = self.clock.now_ms();
        let session = self.sessions.get_mut(session_id)?;

        if update.priority == Some(UpdatePriority::Hook) && is_in_mcp_window(session, now) {
            trace!(%session_id, "hook update discarded inside mcp window");
            return self.sessions.get(session_id);
        }

        if let Some(details) = update.details.filter(|d| !d.is_empty()) {
            session.details = details;
        }
        if let Some(key) = update.small_image_key {
            session.small_image_key = key;
        }
        if let Some(text) = update.small_image_text {
            session.small_image_text = text;
        }
        if update.priority == Some(UpdatePriority::Mcp) {
            session.last_mcp_update_at = now;
        }
        if let Some(counter) = session.small_image_key.counter() {
            session.activity_counts.increment(counter);
        }
        session.last_activity_at = now;
        session.status = SessionStatus::Active;

        debug!(
            %session_id,
            priority = ?update.priority,
            key = session.small_image_key.key(),
            "activity accepted"
        );
        self.notify_change();
        self.sessions.get(session_id)
    }

    /// Remove a session; returns whether it existed
    pub fn end_session(&mut self, session_id: &str) -> bool {
        if self.sessions.remove(session_id).is_none() {
            return false;
        }
        info!(%session_id, "session ended");
        debug!("{} total session(s)", self.sessions.len());
        self.notify_change();
        true
    }

    /// Evict sessions whose process died or that went silent, and demote
    /// quiet ones to idle. Fires at most one change notification.
    pub fn check_stale_sessions(
        &mut self,
        idle_timeout: Duration,
        remove_timeout: Duration,
    ) -> SweepSummary {
        let now = self.clock.now_ms();
        let idle_ms = millis(idle_timeout);
        let remove_ms = millis(remove_timeout);
        let mut summary = SweepSummary::default();

        for session in self.sessions.values_mut() {
            if !self.probe.is_alive(session.pid) {
                summary.dead.push(session.session_id.clone());
                continue;
            }
            let elapsed = now.saturating_sub(session.last_activity_at);
            if elapsed >= remove_ms {
                summary.expired.push(session.session_id.clone());
            } else if elapsed >= idle_ms && session.status != SessionStatus::Idle {
                session.status = SessionStatus::Idle;
                summary.idled.push(session.session_id.clone());
            }
        }

        for session_id in &summary.dead {
            info!(%session_id, reason = "dead", "session evicted");
            self.sessions.remove(session_id);
        }
        for session_id in &summary.expired {
            info!(%session_id, reason = "silent", "session evicted");
            self.sessions.remove(session_id);
        }
        for session_id in &summary.idled {
            debug!(%session_id, "session idle");
        }

        if summary.changed() {
            self.notify_change();
        }
        summary
    }

    /// All sessions, oldest first (ties by id)
    pub fn get_all_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }

    /// Iterate sessions in no particular order
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn get_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn get_session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn find_session_by_project_path(&self, project_path: &str) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.project_path == project_path)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::liveness::FakeProbe;
    use crate::session::{SmallImage, STARTING_DETAILS};
    use std::sync::Mutex;

    const T0: u64 = 1_700_000_000_000;
    const IDLE: Duration = Duration::from_secs(600);
    const REMOVE: Duration = Duration::from_secs(1800);

    struct Fixture {
        registry: SessionRegistry,
        clock: Arc<ManualClock>,
        probe: Arc<FakeProbe>,
        changes: Arc<Mutex<usize>>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let probe = Arc::new(FakeProbe::with_alive([100, 200, 300]));
        let mut registry = SessionRegistry::with_env(clock.clone(), probe.clone());
        let changes = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&changes);
        registry.on_change(move |_| *counter.lock().unwrap() += 1);
        Fixture {
            registry,
            clock,
            probe,
            changes,
        }
    }

    fn start(reg: &mut SessionRegistry, id: &str, pid: u32, path: &str) {
        reg.start_session(
            id,
            StartRequest {
                pid,
                project_path: path.into(),
            },
        );
    }

    fn hook(details: &str, key: SmallImage) -> ActivityUpdate {
        ActivityUpdate {
            details: Some(details.into()),
            small_image_key: Some(key),
            small_image_text: None,
            priority: Some(UpdatePriority::Hook),
        }
    }

    fn mcp(details: &str) -> ActivityUpdate {
        ActivityUpdate {
            details: Some(details.into()),
            small_image_key: None,
            small_image_text: None,
            priority: Some(UpdatePriority::Mcp),
        }
    }

    impl Fixture {
        fn changes(&self) -> usize {
            *self.changes.lock().unwrap()
        }
    }

    #[test]
    fn start_session_creates_active_session() {
        let mut f = fixture();
        let session = f.registry.start_session(
            "s1",
            StartRequest {
                pid: 100,
                project_path: "/home/user/my-project".into(),
            },
        );
        assert_eq!(session.session_id, "s1");
        assert_eq!(session.project_name, "my-project");
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.details, STARTING_DETAILS);
        assert_eq!(session.started_at, T0);
        assert_eq!(f.changes(), 1);
    }

    #[test]
    fn update_applies_supplied_fields_only() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/project");

        let updated = f
            .registry
            .update_activity("s1", hook("Editing file.rs", SmallImage::Coding))
            .unwrap();
        assert_eq!(updated.details, "Editing file.rs");
        assert_eq!(updated.small_image_key, SmallImage::Coding);
        // text not supplied, keeps the starting label
        assert_eq!(updated.small_image_text, "Starting up");
        assert_eq!(updated.activity_counts.edits, 1);
        assert_eq!(f.changes(), 2);
    }

    #[test]
    fn null_or_empty_details_means_no_change() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/project");
        f.registry.update_activity("s1", hook("Reading", SmallImage::Reading));

        let mut update = hook("", SmallImage::Reading);
        let session = f.registry.update_activity("s1", update.clone()).unwrap();
        assert_eq!(session.details, "Reading");

        update.details = None;
        let session = f.registry.update_activity("s1", update).unwrap();
        assert_eq!(session.details, "Reading");
        assert_eq!(session.activity_counts.reads, 3);
    }

    #[test]
    fn counter_follows_resulting_key() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/project");
        f.registry.update_activity("s1", hook("bash", SmallImage::Terminal));
        // key omitted: the session stays in terminal and counts again
        f.registry.update_activity(
            "s1",
            ActivityUpdate {
                details: Some("still going".into()),
                ..Default::default()
            },
        );
        f.registry.update_activity("s1", hook("wait", SmallImage::Idle));
        let counts = f.registry.get_session("s1").unwrap().activity_counts;
        assert_eq!(counts.commands, 2);
        assert_eq!(counts.edits + counts.searches + counts.reads + counts.thinks, 0);
    }

    #[test]
    fn unknown_session_update_is_not_found() {
        let mut f = fixture();
        assert!(f.registry.update_activity("nope", mcp("x")).is_none());
        assert_eq!(f.changes(), 0);
    }

    #[test]
    fn update_reactivates_idle_session() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/project");
        f.clock.advance(millis(IDLE));
        f.registry.check_stale_sessions(IDLE, REMOVE);
        assert_eq!(f.registry.get_session("s1").unwrap().status, SessionStatus::Idle);

        f.registry.update_activity("s1", hook("back", SmallImage::Thinking));
        let session = f.registry.get_session("s1").unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.last_activity_at, T0 + millis(IDLE));
    }

    #[test]
    fn hook_inside_mcp_window_is_discarded() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/project");
        f.registry.update_activity("s1", mcp("Refactoring auth"));
        let before = f.changes();

        f.clock.advance(5_000);
        let session = f
            .registry
            .update_activity("s1", hook("Editing x.rs", SmallImage::Coding))
            .unwrap();
        assert_eq!(session.details, "Refactoring auth");
        assert_eq!(session.small_image_key, SmallImage::Starting);
        assert_eq!(session.activity_counts.edits, 0);
        assert_eq!(session.last_activity_at, T0);
        assert_eq!(f.changes(), before);
    }

    #[test]
    fn hook_after_mcp_window_is_accepted() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/project");
        f.registry.update_activity("s1", mcp("Refactoring auth"));

        f.clock.advance(31_000);
        let session = f
            .registry
            .update_activity("s1", hook("Editing x.rs", SmallImage::Coding))
            .unwrap();
        assert_eq!(session.details, "Editing x.rs");
        assert_eq!(session.activity_counts.edits, 1);
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/project");
        f.registry.update_activity("s1", mcp("explicit"));
        f.clock.advance(29_999);
        assert!(is_in_mcp_window(f.registry.get_session("s1").unwrap(), f.clock.now_ms()));
        f.clock.advance(1);
        assert!(!is_in_mcp_window(f.registry.get_session("s1").unwrap(), f.clock.now_ms()));
    }

    #[test]
    fn mcp_updates_are_never_discarded() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/project");
        f.registry.update_activity("s1", mcp("first"));
        f.clock.advance(1_000);
        let session = f.registry.update_activity("s1", mcp("second")).unwrap();
        assert_eq!(session.details, "second");
        assert_eq!(session.last_mcp_update_at, T0 + 1_000);
    }

    #[test]
    fn unprioritized_update_ignores_window() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/project");
        f.registry.update_activity("s1", mcp("explicit"));
        let session = f
            .registry
            .update_activity(
                "s1",
                ActivityUpdate {
                    details: Some("plain".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(session.details, "plain");
    }

    #[test]
    fn end_session_removes_and_notifies_once() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/a");
        start(&mut f.registry, "s2", 200, "/tmp/b");
        assert!(f.registry.end_session("s1"));
        assert!(f.registry.get_session("s1").is_none());
        assert!(f.registry.get_session("s2").is_some());
        assert_eq!(f.changes(), 3);

        assert!(!f.registry.end_session("s1"));
        assert_eq!(f.changes(), 3);
    }

    #[test]
    fn sweep_removes_dead_process() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/a");
        start(&mut f.registry, "s2", 200, "/tmp/b");
        f.probe.kill(100);

        let summary = f.registry.check_stale_sessions(IDLE, REMOVE);
        assert_eq!(summary.dead, vec!["s1".to_string()]);
        assert!(f.registry.get_session("s1").is_none());
        assert_eq!(f.registry.get_session_count(), 1);
    }

    #[test]
    fn sweep_idles_then_removes() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/a");

        f.clock.advance(millis(IDLE) + 60_000);
        let summary = f.registry.check_stale_sessions(IDLE, REMOVE);
        assert_eq!(summary.idled, vec!["s1".to_string()]);
        assert_eq!(f.registry.get_session("s1").unwrap().status, SessionStatus::Idle);

        // already idle: no further change
        let changes = f.changes();
        assert!(!f.registry.check_stale_sessions(IDLE, REMOVE).changed());
        assert_eq!(f.changes(), changes);

        f.clock.set(T0 + millis(REMOVE));
        let summary = f.registry.check_stale_sessions(IDLE, REMOVE);
        assert_eq!(summary.expired, vec!["s1".to_string()]);
        assert!(f.registry.is_empty());
    }

    #[test]
    fn sweep_batches_notifications() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/a");
        start(&mut f.registry, "s2", 200, "/tmp/b");
        start(&mut f.registry, "s3", 300, "/tmp/c");
        let before = f.changes();

        f.probe.kill(100);
        f.clock.advance(millis(REMOVE));
        f.registry.update_activity("s3", hook("fresh", SmallImage::Coding));
        let before_sweep = f.changes();
        assert_eq!(before_sweep, before + 1);

        let summary = f.registry.check_stale_sessions(IDLE, REMOVE);
        assert_eq!(summary.dead.len(), 1);
        assert_eq!(summary.expired.len(), 1);
        assert_eq!(f.changes(), before_sweep + 1);
        assert_eq!(f.registry.get_session_count(), 1);
    }

    #[test]
    fn listeners_run_in_registration_order_with_snapshot() {
        let mut f = fixture();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&log);
        f.registry
            .on_change(move |sessions| first.lock().unwrap().push(("first", sessions.len())));
        let second = Arc::clone(&log);
        f.registry
            .on_change(move |sessions| second.lock().unwrap().push(("second", sessions.len())));

        start(&mut f.registry, "s1", 100, "/tmp/a");
        assert_eq!(*log.lock().unwrap(), vec![("first", 1), ("second", 1)]);
    }

    #[test]
    fn find_by_project_path() {
        let mut f = fixture();
        start(&mut f.registry, "s1", 100, "/tmp/a");
        start(&mut f.registry, "s2", 200, "/tmp/b");
        let found = f.registry.find_session_by_project_path("/tmp/b").unwrap();
        assert_eq!(found.session_id, "s2");
        assert!(f.registry.find_session_by_project_path("/tmp/c").is_none());
    }

    #[test]
    fn all_sessions_oldest_first() {
        let mut f = fixture();
        start(&mut f.registry, "b", 100, "/tmp/a");
        f.clock.advance(10);
        start(&mut f.registry, "a", 200, "/tmp/b");
        let ids: Vec<_> = f
            .registry
            .get_all_sessions()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
