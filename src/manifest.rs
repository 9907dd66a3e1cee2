use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the manifest document, stored next to the config file.
const STORE_NAME: &str = "theme.lock";

/// What the manifest remembers about one asset in one environment: the
/// server-reported modification time from the last successful sync, and the
/// checksum the file had at that point. The checksum feeds the optimistic
/// concurrency header on later uploads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

type Entries = BTreeMap<String, BTreeMap<String, Entry>>;

/// Per-environment version map persisted across runs. Updated after every
/// successful remote mutation and consulted before pushes so that a remote
/// side mutated since the last sync is detected instead of overwritten.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl Manifest {
    /// Load the manifest stored next to the given config file. A missing
    /// document is an empty manifest.
    pub fn load(config_path: &Path) -> Result<Manifest> {
        let dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let path = dir.join(STORE_NAME);

        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Other(format!("corrupt manifest {:?}: {}", path, e)))?
        } else {
            Entries::new()
        };

        Ok(Manifest {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn get(&self, key: &str, environment: &str) -> Option<Entry> {
        let entries = self.entries.lock().expect("manifest poisoned");
        entries.get(key).and_then(|envs| envs.get(environment)).cloned()
    }

    /// Record a successful sync of an asset and persist the change.
    pub fn set(&self, key: &str, environment: &str, entry: Entry) -> Result<()> {
        let mut entries = self.entries.lock().expect("manifest poisoned");
        entries
            .entry(key.to_string())
            .or_default()
            .insert(environment.to_string(), entry);
        self.persist(&entries)
    }

    /// Forget an asset for an environment, dropping the path entirely once
    /// no environment references it.
    pub fn delete(&self, key: &str, environment: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("manifest poisoned");
        if let Some(envs) = entries.get_mut(key) {
            envs.remove(environment);
            if envs.is_empty() {
                entries.remove(key);
            }
        }
        self.persist(&entries)
    }

    /// Drop entries for paths that exist neither locally nor remotely any
    /// more.
    pub fn prune(&self, local_exists: impl Fn(&str) -> bool, remote_keys: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().expect("manifest poisoned");
        entries.retain(|key, _| local_exists(key) || remote_keys.contains(key));
        self.persist(&entries)
    }

    /// Batched writes commit atomically: serialize to a temp file in the
    /// same directory, then rename over the store.
    fn persist(&self, entries: &Entries) -> Result<()> {
        let body = serde_yaml::to_string(entries)
            .map_err(|e| Error::Other(format!("could not serialize manifest: {}", e)))?;

        let temp = self.path.with_file_name(format!(
            ".{}.tmp.{}",
            STORE_NAME,
            std::process::id()
        ));
        fs::write(&temp, body)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}
