//! Append-only structured event sink.
//!
//! Every capture, block and admin action becomes one [`CapturedEvent`] line
//! in the event log. With advanced logging on, a line is one JSON object;
//! with it off, a plain-text fallback keeps the timestamp, a summary and the
//! source IP. The analyzer tolerates logs containing both shapes, so a
//! config change mid-file is harmless.

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    System,
    Credentials,
    Keylogger,
    Trap,
    Blocked,
    RateLimit,
    Admin,
    Error,
}

/// One observed interaction. `data` is the open-ended payload map; the
/// remaining fields are fixed so analysis can rely on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
    pub data: BTreeMap<String, String>,
}

impl CapturedEvent {
    pub fn new(kind: EventKind, ip: &str, user_agent: &str, referer: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            referer: referer.to_string(),
            data: BTreeMap::new(),
        }
    }

    /// Event originating from the honeypot itself rather than a client.
    pub fn system(kind: EventKind) -> Self {
        Self::new(kind, "SYSTEM", "SYSTEM", "SYSTEM")
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_data(mut self, data: BTreeMap<String, String>) -> Self {
        self.data.extend(data);
        self
    }

    fn summary(&self) -> String {
        match self.data.get("message") {
            Some(msg) => msg.clone(),
            None => serde_json::to_string(&self.data).unwrap_or_default(),
        }
    }
}

/// Append-only event log. Physical writes are serialized under a lock so
/// concurrent appends never interleave partial lines; reads take a snapshot
/// without locking.
pub struct EventLog {
    path: PathBuf,
    advanced: bool,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, advanced: bool) -> Self {
        Self {
            path: path.into(),
            advanced,
            write_lock: Mutex::new(()),
        }
    }

    pub fn append(&self, event: &CapturedEvent) -> Result<(), PersistError> {
        let line = if self.advanced {
            serde_json::to_string(event)?
        } else {
            format!(
                "{} - {} - IP: {}",
                event.timestamp.to_rfc3339(),
                event.summary(),
                event.ip
            )
        };

        let _guard = self.write_lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Snapshot of all stored lines. Appends racing this read may or may not
    /// be included; a writer always sees its own completed appends.
    pub fn read_all(&self) -> Vec<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => raw.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Truncate the log, then record the wipe itself as an ADMIN event.
    pub fn clear(&self) -> Result<(), PersistError> {
        {
            let _guard = self.write_lock.lock().unwrap();
            fs::write(&self.path, "")?;
        }
        self.append(
            &CapturedEvent::system(EventKind::Admin).with("message", "Logs limpiados manualmente"),
        )
    }
}

/// Separately accumulated captured-credentials log.
pub struct CapturedDataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CapturedDataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn append(&self, data: &BTreeMap<String, String>) -> Result<(), PersistError> {
        let line = format!("{} - {}", Utc::now().to_rfc3339(), serde_json::to_string(data)?);
        let _guard = self.write_lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn read_lines(&self) -> Vec<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => raw.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }
}
