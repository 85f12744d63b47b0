//! Process liveness probing
//!
//! The sweep asks a [`ProcessProbe`] whether each session's owning process is
//! still running. A probe that cannot decide (e.g. permission denied) answers
//! "not alive", so such sessions are evicted rather than leaked.

use std::collections::HashSet;
use std::sync::Mutex;

/// Answers whether a process is still alive
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probes real processes with signal 0
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProbe;

#[cfg(unix)]
impl ProcessProbe for SignalProbe {
    fn is_alive(&self, pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // pid 0 and negative pids address process groups, never a single session owner
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        kill(Pid::from_raw(raw), None).is_ok()
    }
}

#[cfg(not(unix))]
impl ProcessProbe for SignalProbe {
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

/// Probe with an explicit set of live pids
#[derive(Debug, Default)]
pub struct FakeProbe {
    alive: Mutex<HashSet<u32>>,
}

impl FakeProbe {
    pub fn with_alive(pids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            alive: Mutex::new(pids.into_iter().collect()),
        }
    }

    pub fn kill(&self, pid: u32) {
        if let Ok(mut alive) = self.alive.lock() {
            alive.remove(&pid);
        }
    }

}

impl ProcessProbe for FakeProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive
            .lock()
            .map(|alive| alive.contains(&pid))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn own_process_is_alive() {
        assert!(SignalProbe.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn out_of_range_pids_are_dead() {
        assert!(!SignalProbe.is_alive(0));
        assert!(!SignalProbe.is_alive(u32::MAX));
    }

    #[test]
    fn fake_probe_tracks_pids() {
        let probe = FakeProbe::with_alive([1, 2]);
        assert!(probe.is_alive(1));
        probe.kill(1);
        assert!(!probe.is_alive(1));
        assert!(probe.is_alive(2));
        assert!(!probe.is_alive(4));
    }
}
