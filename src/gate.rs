//! Sliding-window rate gate.
//!
//! Each identifier gets a window of request timestamps covering the trailing
//! 60 seconds. A request is recorded before the threshold comparison, so
//! exactly `max_requests_per_minute` requests pass and the next one trips
//! the block. On a trip the gate signals the [`BlocklistStore`]; it never
//! owns membership itself, and once blocked an address stays blocked until
//! an explicit unblock regardless of later quiet periods.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Duration, Utc};

use crate::blocklist::BlocklistStore;

pub const WINDOW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Throttled,
}

pub struct RateGate {
    limit: usize,
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    blocklist: Arc<BlocklistStore>,
}

impl RateGate {
    pub fn new(limit: usize, blocklist: Arc<BlocklistStore>) -> Self {
        Self {
            limit,
            windows: Mutex::new(HashMap::new()),
            blocklist,
        }
    }

    /// Record a request from `id` at `now` and decide whether it passes.
    ///
    /// Prune, append and compare all happen under one lock so concurrent
    /// requests from the same identifier cannot race past the threshold.
    pub fn check(&self, id: &str, now: DateTime<Utc>) -> Decision {
        let cutoff = now - Duration::seconds(WINDOW_SECONDS);
        let mut windows = self.windows.lock().unwrap();
        let hits = windows.entry(id.to_string()).or_default();
        hits.retain(|t| *t > cutoff);
        hits.push_back(now);

        if hits.len() > self.limit {
            // The window is useless once the address is blocklisted: the
            // blocklist check short-circuits ahead of the gate, and a manual
            // unblock must not replay stale history.
            windows.remove(id);
            if let Err(e) = self.blocklist.add(id) {
                tracing::error!(ip = %id, error = %e, "failed to persist automatic block");
            }
            return Decision::Throttled;
        }
        Decision::Allow
    }

    #[cfg(test)]
    fn window_len(&self, id: &str) -> usize {
        self.windows
            .lock()
            .unwrap()
            .get(id)
            .map(|w| w.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(limit: usize) -> (RateGate, Arc<BlocklistStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let blocklist = Arc::new(BlocklistStore::load(dir.path().join("ips.json")));
        (RateGate::new(limit, blocklist.clone()), blocklist, dir)
    }

    #[test]
    fn exactly_limit_requests_pass() {
        let (gate, blocklist, _dir) = gate(3);
        let t0 = Utc::now();
        for i in 0..3 {
            assert_eq!(
                gate.check("1.2.3.4", t0 + Duration::seconds(i)),
                Decision::Allow
            );
        }
        assert!(!blocklist.contains("1.2.3.4"));
    }

    #[test]
    fn limit_plus_one_trips_the_block() {
        let (gate, blocklist, _dir) = gate(3);
        let t0 = Utc::now();
        for i in 0..3 {
            gate.check("1.2.3.4", t0 + Duration::seconds(i));
        }
        assert_eq!(
            gate.check("1.2.3.4", t0 + Duration::seconds(3)),
            Decision::Throttled
        );
        assert!(blocklist.contains("1.2.3.4"));
    }

    #[test]
    fn block_outlives_the_window() {
        let (gate, blocklist, _dir) = gate(2);
        let t0 = Utc::now();
        for i in 0..3 {
            gate.check("5.6.7.8", t0 + Duration::seconds(i));
        }
        assert!(blocklist.contains("5.6.7.8"));
        // Two minutes of silence drain the window, but the blocklist entry
        // is independent of rate history.
        assert_eq!(
            gate.check("5.6.7.8", t0 + Duration::seconds(180)),
            Decision::Allow
        );
        assert!(blocklist.contains("5.6.7.8"));
    }

    #[test]
    fn old_timestamps_are_pruned() {
        let (gate, _blocklist, _dir) = gate(10);
        let t0 = Utc::now();
        gate.check("9.9.9.9", t0);
        gate.check("9.9.9.9", t0 + Duration::seconds(1));
        assert_eq!(gate.window_len("9.9.9.9"), 2);

        // 61s later both earlier hits fall outside the trailing window.
        gate.check("9.9.9.9", t0 + Duration::seconds(62));
        assert_eq!(gate.window_len("9.9.9.9"), 1);
    }

    #[test]
    fn unblock_does_not_replay_history() {
        let (gate, blocklist, _dir) = gate(2);
        let t0 = Utc::now();
        for i in 0..3 {
            gate.check("4.4.4.4", t0 + Duration::seconds(i));
        }
        assert!(blocklist.contains("4.4.4.4"));

        blocklist.remove("4.4.4.4").unwrap();
        // Immediately allowed again: the trip discarded the old window.
        assert_eq!(
            gate.check("4.4.4.4", t0 + Duration::seconds(4)),
            Decision::Allow
        );
        assert!(!blocklist.contains("4.4.4.4"));
    }

    #[test]
    fn identifiers_are_independent() {
        let (gate, blocklist, _dir) = gate(1);
        let t0 = Utc::now();
        assert_eq!(gate.check("a", t0), Decision::Allow);
        assert_eq!(gate.check("b", t0), Decision::Allow);
        assert_eq!(gate.check("a", t0), Decision::Throttled);
        assert!(blocklist.contains("a"));
        assert!(!blocklist.contains("b"));
    }
}
