//! Session configuration.
//!
//! Options are read once at startup from a TOML file and merged over the
//! hard-coded defaults: any field missing from the file keeps its default,
//! and a missing or unparseable file falls back to the full default set
//! without halting startup. The only mutation path afterwards is an explicit
//! update-and-persist via [`Config::save`].

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PersistError;

pub const CONFIG_FILE: &str = "config_honeypot.toml";
pub const EVENT_LOG_FILE: &str = "honeypot_carnitas.log";
pub const BLOCKLIST_FILE: &str = "ips_bloqueadas.json";
pub const CAPTURED_DATA_FILE: &str = "datos_capturados.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Requests allowed per identifier in the trailing 60s window. Exactly
    /// this many pass; one more trips the automatic block.
    pub max_requests_per_minute: usize,
    pub auto_block_threshold: u32,
    pub log_level: String,
    /// Inject hidden trap links and the keystroke beacon into clones.
    pub trap_injection: bool,
    /// Write events as JSON lines; disabled falls back to plain text.
    pub advanced_logging: bool,
    pub stealth_mode: bool,
    pub capture_cookies: bool,
    pub simulate_vulnerabilities: bool,
    pub active_ports: Vec<u16>,
    pub clone_depth: u32,
    /// Site to clone at startup. None skips the startup clone; the mirror
    /// then serves a load-error page until a clone succeeds.
    pub target_url: Option<String>,
    /// Directory holding the event log, blocklist and captured-data files.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
            auto_block_threshold: 10,
            log_level: "info".to_string(),
            trap_injection: true,
            advanced_logging: true,
            stealth_mode: false,
            capture_cookies: true,
            simulate_vulnerabilities: true,
            active_ports: vec![8080],
            clone_depth: 3,
            target_url: None,
            data_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load from `path`, merging over defaults. Never fails: a missing file
    /// is written back with the defaults so the operator has something to
    /// edit, a broken file is ignored with a warning.
    pub fn load(path: &Path) -> Config {
        match fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unparseable config, using defaults");
                    Config::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Config::default();
                if let Err(e) = cfg.save(path) {
                    warn!(path = %path.display(), error = %e, "could not write default config");
                }
                cfg
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read config, using defaults");
                Config::default()
            }
        }
    }

    /// Persist the full current configuration, overwriting the file.
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join(EVENT_LOG_FILE)
    }

    pub fn blocklist_path(&self) -> PathBuf {
        self.data_dir.join(BLOCKLIST_FILE)
    }

    pub fn captured_data_path(&self) -> PathBuf {
        self.data_dir.join(CAPTURED_DATA_FILE)
    }
}
