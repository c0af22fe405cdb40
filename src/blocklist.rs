//! Persisted set of blocked client addresses.
//!
//! The store is the sole owner of blocklist membership: the rate gate only
//! signals it, handlers only query it. Every mutation rewrites the full set
//! to disk under the same lock that guards the in-memory set, so durable
//! state never lags a completed call.

use std::{
    collections::HashSet,
    fs,
    path::PathBuf,
    sync::Mutex,
};

use tracing::warn;

use crate::error::PersistError;

pub struct BlocklistStore {
    path: PathBuf,
    inner: Mutex<HashSet<String>>,
}

impl BlocklistStore {
    /// Load the persisted set. A missing or unparseable file yields an empty
    /// set; startup never fails on bad blocklist state.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let set = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(ips) => ips.into_iter().collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unparseable blocklist, starting empty");
                    HashSet::new()
                }
            },
            Err(_) => HashSet::new(),
        };
        Self {
            path,
            inner: Mutex::new(set),
        }
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.inner.lock().unwrap().contains(ip)
    }

    /// Block `ip`. Returns whether it was newly inserted. The set is
    /// persisted before returning; a write failure leaves the in-memory
    /// block in place and surfaces the error for the caller to log.
    pub fn add(&self, ip: &str) -> Result<bool, PersistError> {
        let mut set = self.inner.lock().unwrap();
        let inserted = set.insert(ip.to_string());
        if inserted {
            self.persist(&set)?;
        }
        Ok(inserted)
    }

    /// Unblock `ip`. Returns whether it was present.
    pub fn remove(&self, ip: &str) -> Result<bool, PersistError> {
        let mut set = self.inner.lock().unwrap();
        let removed = set.remove(ip);
        if removed {
            self.persist(&set)?;
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<String> {
        let mut ips: Vec<String> = self.inner.lock().unwrap().iter().cloned().collect();
        ips.sort();
        ips
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    // Overwrite, not append: the file always holds the complete current set.
    fn persist(&self, set: &HashSet<String>) -> Result<(), PersistError> {
        let mut ips: Vec<&String> = set.iter().collect();
        ips.sort();
        let raw = serde_json::to_string_pretty(&ips)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}
