//! Log analysis.
//!
//! [`LogAnalyzer::compute`] makes one full pass over a snapshot of the event
//! log and produces an [`AnalysisReport`]. No state is kept between calls.
//!
//! Lines are parsed permissively: a JSON object is read structurally, a
//! plain-text line falls back to the `" - IP: "` heuristic, and anything
//! else is attributed to the `"Unknown"` bucket. Every stored line counts
//! toward `total_entries`; unattributable lines count as `"Unknown"` for
//! identifiers and user agents and contribute nothing to the hourly
//! histogram, since no timestamp can be recovered from them.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Timelike};
use serde::Serialize;
use serde_json::Value;

use crate::{blocklist::BlocklistStore, events::EventLog};

/// Coarse heuristic, not a security control: any line containing one of
/// these (case-insensitively) counts as a potential attack.
const ATTACK_KEYWORDS: [&str; 5] = ["sql", "admin", "login", "password", "phpmyadmin"];

const PLAIN_IP_MARKER: &str = " - IP: ";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub total_entries: u64,
    pub unique_ips: u64,
    pub most_active_ip: Option<String>,
    pub most_active_ip_count: u64,
    /// Bounded top-5, ties broken by first appearance in the log.
    pub top_user_agents: Vec<(String, u64)>,
    pub attack_patterns: BTreeMap<String, u64>,
    /// 24 buckets keyed by hour-of-day of each event's timestamp.
    pub hourly_activity: [u64; 24],
    pub blocked_ips_count: u64,
}

pub struct LogAnalyzer {
    events: Arc<EventLog>,
    blocklist: Arc<BlocklistStore>,
}

impl LogAnalyzer {
    pub fn new(events: Arc<EventLog>, blocklist: Arc<BlocklistStore>) -> Self {
        Self { events, blocklist }
    }

    pub fn compute(&self) -> AnalysisReport {
        let lines = self.events.read_all();

        let mut ips = FirstSeenCounter::default();
        let mut user_agents = FirstSeenCounter::default();
        let mut attack_patterns = BTreeMap::new();
        let mut hourly_activity = [0u64; 24];

        for line in &lines {
            let parsed = parse_line(line);
            ips.bump(&parsed.ip);
            user_agents.bump(&parsed.user_agent);
            if let Some(hour) = parsed.hour {
                hourly_activity[hour as usize % 24] += 1;
            }

            let low = line.to_lowercase();
            if ATTACK_KEYWORDS.iter().any(|k| low.contains(k)) {
                *attack_patterns
                    .entry("potential_attack".to_string())
                    .or_insert(0) += 1;
            }
        }

        let (most_active_ip, most_active_ip_count) = match ips.most_common() {
            Some((ip, count)) => (Some(ip), count),
            None => (None, 0),
        };

        AnalysisReport {
            total_entries: lines.len() as u64,
            unique_ips: ips.len() as u64,
            most_active_ip,
            most_active_ip_count,
            top_user_agents: user_agents.top(5),
            attack_patterns,
            hourly_activity,
            blocked_ips_count: self.blocklist.len() as u64,
        }
    }
}

/// Best-effort source IP of a stored line, for the quick `/stats` view.
/// Returns None when the line is unattributable.
pub fn extract_ip(line: &str) -> Option<String> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) {
        return Some(
            map.get("ip")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
        );
    }
    line.rfind(PLAIN_IP_MARKER)
        .map(|idx| line[idx + PLAIN_IP_MARKER.len()..].trim().to_string())
}

struct ParsedLine {
    ip: String,
    user_agent: String,
    hour: Option<u32>,
}

fn parse_line(line: &str) -> ParsedLine {
    // Structured parse first.
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) {
        let ip = map
            .get("ip")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let user_agent = map
            .get("user_agent")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let hour = map
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.hour());
        return ParsedLine {
            ip,
            user_agent,
            hour,
        };
    }

    // Plain-text fallback: "<timestamp> - <summary> - IP: <ip>".
    if let Some(idx) = line.rfind(PLAIN_IP_MARKER) {
        let ip = line[idx + PLAIN_IP_MARKER.len()..].trim();
        let hour = line
            .split(" - ")
            .next()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|t| t.hour());
        return ParsedLine {
            ip: if ip.is_empty() {
                "Unknown".to_string()
            } else {
                ip.to_string()
            },
            user_agent: "Unknown".to_string(),
            hour,
        };
    }

    ParsedLine {
        ip: "Unknown".to_string(),
        user_agent: "Unknown".to_string(),
        hour: None,
    }
}

/// Occurrence counter that remembers insertion order so ties rank by first
/// appearance.
#[derive(Default)]
struct FirstSeenCounter {
    entries: HashMap<String, (usize, u64)>,
}

impl FirstSeenCounter {
    fn bump(&mut self, key: &str) {
        let order = self.entries.len();
        let entry = self.entries.entry(key.to_string()).or_insert((order, 0));
        entry.1 += 1;
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn ranked(&self) -> Vec<(String, u64)> {
        let mut all: Vec<(&String, &(usize, u64))> = self.entries.iter().collect();
        all.sort_by(|a, b| b.1 .1.cmp(&a.1 .1).then(a.1 .0.cmp(&b.1 .0)));
        all.into_iter()
            .map(|(key, &(_, count))| (key.clone(), count))
            .collect()
    }

    fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }

    fn most_common(&self) -> Option<(String, u64)> {
        self.ranked().into_iter().next()
    }
}
