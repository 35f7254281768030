//! Configuration file handling
//!
//! Settings persist as a single JSON document. Environment variables
//! override the share link, local folder and poll interval so a deployment
//! can pin them without touching the file.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Cloud shared-folder URL (Edit permissions required). Required to start.
    #[serde(default)]
    pub share_link: String,

    /// Absolute path of the local sync root
    #[serde(default = "default_local_folder")]
    pub local_folder: PathBuf,

    /// Seconds between background delta syncs
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// OAuth application id
    #[serde(default)]
    pub client_id: String,

    /// OAuth tenant
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// Glob patterns matched against basenames
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Include-subtree prefixes; empty means sync everything
    #[serde(default)]
    pub sync_folders: Vec<String>,

    /// Exclude-subtree prefixes
    #[serde(default)]
    pub exclude_folders: Vec<String>,

    /// Parallel-transfer pool size
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Desktop notification toggle
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,

    /// Push-notification receiver toggle (requires a public URL)
    #[serde(default)]
    pub webhook_enabled: bool,

    /// Push-notification receiver URL
    #[serde(default)]
    pub webhook_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            share_link: String::new(),
            local_folder: default_local_folder(),
            poll_interval: default_poll_interval(),
            client_id: String::new(),
            tenant_id: default_tenant_id(),
            ignore_patterns: default_ignore_patterns(),
            sync_folders: Vec::new(),
            exclude_folders: Vec::new(),
            max_workers: default_max_workers(),
            notifications_enabled: true,
            webhook_enabled: false,
            webhook_url: String::new(),
        }
    }
}

fn default_local_folder() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("DriveSync")
}

fn default_poll_interval() -> u64 {
    300
}

fn default_tenant_id() -> String {
    "consumers".to_string()
}

fn default_ignore_patterns() -> Vec<String> {
    ["~$*", "*.tmp", ".DS_Store", "Thumbs.db"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Directory holding the config file, sync state and history
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| SyncError::Config("Could not determine home directory".to_string()))?;
        Ok(home.join(".drivesync"))
    }

    /// Default config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load configuration from a file, falling back to defaults when the
    /// file is absent. Environment overrides are applied afterwards.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.max_workers = config.max_workers.max(1);
        Ok(config)
    }

    /// Save configuration to a file, creating the parent directory
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(link) = std::env::var("DRIVESYNC_SHARE_LINK") {
            self.share_link = link;
        }
        if let Ok(folder) = std::env::var("DRIVESYNC_LOCAL_FOLDER") {
            self.local_folder = PathBuf::from(folder);
        }
        if let Ok(interval) = std::env::var("DRIVESYNC_POLL_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.poll_interval = secs;
            }
        }
    }

    /// Path of the persistent sync state document
    pub fn state_db_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("sync_state.json"))
    }

    /// Path of the JSONL sync history
    pub fn history_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("sync_history.jsonl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.poll_interval, 300);
        assert_eq!(config.max_workers, 4);
        assert!(config.notifications_enabled);
        assert!(config.sync_folders.is_empty());
        assert!(config.ignore_patterns.contains(&".DS_Store".to_string()));
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.poll_interval, 300);
        assert!(config.share_link.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.share_link = "https://1drv.ms/f/s!abc".to_string();
        config.max_workers = 8;
        config.exclude_folders = vec!["archive".to_string()];
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.share_link, "https://1drv.ms/f/s!abc");
        assert_eq!(loaded.max_workers, 8);
        assert_eq!(loaded.exclude_folders, vec!["archive".to_string()]);
    }

    #[test]
    fn test_partial_document_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"share_link": "https://example.com/share"}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.share_link, "https://example.com/share");
        assert_eq!(config.poll_interval, 300);
        assert_eq!(config.tenant_id, "consumers");
    }

    #[test]
    fn test_max_workers_floor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"max_workers": 0}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_workers, 1);
    }
}
