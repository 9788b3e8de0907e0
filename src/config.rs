//! Persisted version-manager configuration — `update_cfg.json`.
//!
//! Everything the version manager needs to resume after a restart without
//! re-deriving it from the feed logs: which feed is bound to which file,
//! which versions are currently applied, and anything still queued waiting
//! on a feed that has not arrived yet. Fids are hex-encoded since JSON has
//! no native byte-string type and every other wire format in this crate
//! already uses hex for human-facing fid display.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::packet::{PREFIX_CURRENT, PREFIX_LEGACY, PREFIX_LEN};

pub const CONFIG_FILE_NAME: &str = "update_cfg.json";

/// Runtime configuration for a [`crate::store::FeedStore`] — never
/// persisted, constructed once by the embedding application. This is
/// distinct from [`StoreConfig`] below, which is the version manager's
/// *persisted* snapshot (mutable state, not configuration).
///
/// The protocol prefix is a per-build constant in practice (two peers must
/// agree on it), but it is threaded through as data rather than hardcoded
/// at every call site so a legacy-prefix build is a one-line change here.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_dir: PathBuf,
    pub prefix: [u8; PREFIX_LEN],
}

impl EngineConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            prefix: *PREFIX_CURRENT,
        }
    }

    /// Same directory layout, but speaking the legacy `"tiny-v01"` prefix
    /// for interop with peers that have not upgraded.
    pub fn legacy(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            prefix: *PREFIX_LEGACY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileBinding {
    pub file_fid: String,
    pub emergency_fid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// file_name -> (current file feed fid, its emergency feed fid)
    pub vc_dict: std::collections::HashMap<String, FileBinding>,
    /// file_fid (hex) -> version we are waiting to apply once the feed catches up
    pub apply_queue: std::collections::HashMap<String, u32>,
    /// file_name -> version currently applied to the workspace copy (0 = none)
    pub apply_dict: std::collections::HashMap<String, u32>,
    /// fid of the update feed, once bound via `set_update_feed`
    pub update_fid: Option<String>,
    /// fid of the version-control feed, once bound
    pub vc_fid: Option<String>,
}

impl StoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn config_path(base_dir: &Path) -> PathBuf {
        base_dir.join(CONFIG_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = StoreConfig::config_path(dir.path());

        let mut cfg = StoreConfig::default();
        cfg.vc_dict.insert(
            "notes.txt".into(),
            FileBinding {
                file_fid: "aa".repeat(32),
                emergency_fid: "bb".repeat(32),
            },
        );
        cfg.apply_dict.insert("notes.txt".into(), 3);
        cfg.update_fid = Some("cc".repeat(32));
        cfg.save(&path).unwrap();

        let loaded = StoreConfig::load(&path).unwrap();
        assert_eq!(loaded.apply_dict.get("notes.txt"), Some(&3));
        assert_eq!(loaded.update_fid.as_deref(), Some("cc".repeat(32).as_str()));
    }

    #[test]
    fn missing_file_loads_as_default() {
        let dir = tempdir().unwrap();
        let path = StoreConfig::config_path(dir.path());
        let cfg = StoreConfig::load(&path).unwrap();
        assert!(cfg.vc_dict.is_empty());
    }
}
